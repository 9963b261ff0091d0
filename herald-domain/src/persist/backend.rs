//! 存储后端协议（EventStorageBackend）
//!
//! 事件存储对持久化实现的全部要求：追加记录、按条件查询、按条件删除。
//! 任何后端都需保持与内存实现相同的过滤语义：
//! - 所有条件取交集，未设置的条件不参与过滤；
//! - 时间区间两端均包含；
//! - 结果按 `occurred_at` 升序，`limit` 作用于排序之后。
//!
use super::serialized_event::SerializedEvent;
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// 查询条件
#[derive(Debug, Clone, Default, Builder)]
pub struct EventQuery {
    #[builder(into)]
    pub aggregate_id: Option<String>,
    pub event_types: Option<Vec<String>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn for_aggregate(aggregate_id: impl Into<String>) -> Self {
        Self::builder().aggregate_id(aggregate_id).build()
    }

    pub fn matches(&self, record: &SerializedEvent) -> bool {
        self.aggregate_id
            .as_deref()
            .is_none_or(|id| record.aggregate_id() == Some(id))
            && self
                .event_types
                .as_ref()
                .is_none_or(|types| types.iter().any(|t| t == record.event_type()))
            && self.start_time.is_none_or(|start| record.occurred_at() >= start)
            && self.end_time.is_none_or(|end| record.occurred_at() <= end)
    }
}

/// 删除条件；均未设置时删除全部记录
#[derive(Debug, Clone, Default, Builder)]
pub struct EventDeletion {
    #[builder(into)]
    pub aggregate_id: Option<String>,
    /// 删除早于该时间的记录（不含）
    pub before: Option<DateTime<Utc>>,
}

impl EventDeletion {
    pub fn for_aggregate(aggregate_id: impl Into<String>) -> Self {
        Self::builder().aggregate_id(aggregate_id).build()
    }

    pub fn matches(&self, record: &SerializedEvent) -> bool {
        self.aggregate_id
            .as_deref()
            .is_none_or(|id| record.aggregate_id() == Some(id))
            && self.before.is_none_or(|before| record.occurred_at() < before)
    }
}

#[async_trait]
pub trait EventStorageBackend: Send + Sync {
    /// 追加一条记录
    async fn save_raw(&self, record: SerializedEvent) -> Result<()>;

    async fn save_raw_batch(&self, records: Vec<SerializedEvent>) -> Result<()> {
        for record in records {
            self.save_raw(record).await?;
        }
        Ok(())
    }

    /// 按条件查询，按 `occurred_at` 升序
    async fn load_raw(&self, query: &EventQuery) -> Result<Vec<SerializedEvent>>;

    /// 按条件删除，返回删除数量
    async fn delete_raw(&self, deletion: &EventDeletion) -> Result<usize>;

    async fn count_raw(&self, query: &EventQuery) -> Result<usize> {
        Ok(self.load_raw(query).await?.len())
    }
}

#[async_trait]
impl<T> EventStorageBackend for Arc<T>
where
    T: EventStorageBackend + ?Sized,
{
    async fn save_raw(&self, record: SerializedEvent) -> Result<()> {
        (**self).save_raw(record).await
    }

    async fn save_raw_batch(&self, records: Vec<SerializedEvent>) -> Result<()> {
        (**self).save_raw_batch(records).await
    }

    async fn load_raw(&self, query: &EventQuery) -> Result<Vec<SerializedEvent>> {
        (**self).load_raw(query).await
    }

    async fn delete_raw(&self, deletion: &EventDeletion) -> Result<usize> {
        (**self).delete_raw(deletion).await
    }

    async fn count_raw(&self, query: &EventQuery) -> Result<usize> {
        (**self).count_raw(query).await
    }
}

//! 内存版存储后端（InMemoryEventBackend）
//!
//! 基于有序 `Vec` 的参考实现：插入时按 `occurred_at` 保持有序，查询线性扫描。
//! 典型用途：测试环境、示例与本地开发。
//!
use super::backend::{EventDeletion, EventQuery, EventStorageBackend};
use super::serialized_event::SerializedEvent;
use crate::error::DomainResult as Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct InMemoryEventBackend {
    records: RwLock<Vec<SerializedEvent>>,
}

impl InMemoryEventBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn insert_sorted(records: &mut Vec<SerializedEvent>, record: SerializedEvent) {
    let at = records.partition_point(|r| r.occurred_at() <= record.occurred_at());
    records.insert(at, record);
}

#[async_trait]
impl EventStorageBackend for InMemoryEventBackend {
    async fn save_raw(&self, record: SerializedEvent) -> Result<()> {
        insert_sorted(&mut *self.records.write().await, record);
        Ok(())
    }

    async fn save_raw_batch(&self, records: Vec<SerializedEvent>) -> Result<()> {
        let mut guard = self.records.write().await;
        for record in records {
            insert_sorted(&mut guard, record);
        }
        Ok(())
    }

    async fn load_raw(&self, query: &EventQuery) -> Result<Vec<SerializedEvent>> {
        let records = self.records.read().await;
        let matched = records.iter().filter(|r| query.matches(r));
        Ok(match query.limit {
            Some(limit) => matched.take(limit).cloned().collect(),
            None => matched.cloned().collect(),
        })
    }

    async fn delete_raw(&self, deletion: &EventDeletion) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| !deletion.matches(r));
        Ok(before - records.len())
    }

    async fn count_raw(&self, query: &EventQuery) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| query.matches(r)).count())
    }
}

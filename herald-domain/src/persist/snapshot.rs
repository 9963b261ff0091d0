//! 聚合快照与快照策略
//!
//! 快照只是避免全量重放的优化，正确性从不依赖快照。
//!
use crate::aggregate::Aggregate;
use crate::error::{DomainError, DomainResult as Result};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
pub struct Snapshot {
    #[builder(into)]
    aggregate_id: String,
    #[builder(into)]
    aggregate_type: String,
    version: usize,
    state: Value,
    #[builder(default = Utc::now())]
    timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn version(&self) -> usize {
        self.version
    }

    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// 将快照反序列化为聚合实例
    pub fn to_aggregate<A>(&self) -> Result<A>
    where
        A: Aggregate,
    {
        if A::TYPE != self.aggregate_type {
            return Err(DomainError::TypeMismatch {
                expected: A::TYPE.to_string(),
                found: self.aggregate_type.clone(),
            });
        }

        let mut aggregate: A = serde_json::from_value(self.state.clone())?;
        aggregate.set_version(self.version);
        Ok(aggregate)
    }

    /// 从聚合实例创建快照
    pub fn from_aggregate<A>(aggregate: &A, timestamp: DateTime<Utc>) -> Result<Self>
    where
        A: Aggregate,
    {
        Ok(Self {
            aggregate_id: aggregate.id().to_string(),
            aggregate_type: A::TYPE.to_string(),
            version: aggregate.version(),
            state: serde_json::to_value(aggregate)?,
            timestamp,
        })
    }
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 最新快照
    async fn latest(&self, aggregate_id: &str) -> Result<Option<Snapshot>>;

    async fn save(&self, snapshot: Snapshot) -> Result<()>;

    /// 删除聚合的快照，返回删除数量
    async fn delete(&self, aggregate_id: &str) -> Result<usize>;
}

#[async_trait]
impl<T> SnapshotStore for Arc<T>
where
    T: SnapshotStore + ?Sized,
{
    async fn latest(&self, aggregate_id: &str) -> Result<Option<Snapshot>> {
        (**self).latest(aggregate_id).await
    }

    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        (**self).save(snapshot).await
    }

    async fn delete(&self, aggregate_id: &str) -> Result<usize> {
        (**self).delete(aggregate_id).await
    }
}

/// 内存快照存储：每个聚合仅保留版本最高的快照
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: DashMap<String, Snapshot>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn latest(&self, aggregate_id: &str) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.get(aggregate_id).map(|s| s.value().clone()))
    }

    async fn save(&self, snapshot: Snapshot) -> Result<()> {
        self.snapshots
            .entry(snapshot.aggregate_id.clone())
            .and_modify(|current| {
                if snapshot.version >= current.version {
                    *current = snapshot.clone();
                }
            })
            .or_insert_with(|| snapshot.clone());
        Ok(())
    }

    async fn delete(&self, aggregate_id: &str) -> Result<usize> {
        Ok(usize::from(self.snapshots.remove(aggregate_id).is_some()))
    }
}

/// 快照策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotPolicy {
    #[default]
    Never,
    Every(usize),
}

impl SnapshotPolicy {
    pub fn should_snapshot(&self, version: usize) -> bool {
        match self {
            SnapshotPolicy::Never => false,
            SnapshotPolicy::Every(interval) => {
                let interval = (*interval).max(1);
                version > 0 && version.is_multiple_of(interval)
            }
        }
    }

    /// 版本从 `previous` 推进到 `current` 时是否跨越了快照边界
    pub fn should_snapshot_between(&self, previous: usize, current: usize) -> bool {
        match self {
            SnapshotPolicy::Never => false,
            SnapshotPolicy::Every(interval) => {
                let interval = (*interval).max(1);
                current > previous && current / interval > previous / interval
            }
        }
    }
}

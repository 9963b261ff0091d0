//! 聚合事件溯源（EventSourcing）
//!
//! 基于 `EventStore` 保存与重建聚合：
//! - 保存：仅持久化未提交事件，写入前校验存储版本等于这些事件的基准版本（乐观并发）；
//!   同一聚合的“校验 + 追加”在按聚合 id 加锁的临界区内完成；
//! - 加载：从最新快照（若有）开始，按版本顺序折叠其后的事件；
//!   指定期望版本且与重建结果不符时返回 `DomainError::Concurrency`；
//! - 快照按 `SnapshotPolicy` 在保存时写入，读写失败只记录告警，不影响正确性。
//!
use super::backend::{EventDeletion, EventQuery};
use super::event_store::EventStore;
use super::snapshot::{Snapshot, SnapshotPolicy, SnapshotStore};
use crate::aggregate::Aggregate;
use crate::clock::{Clock, system_clock};
use crate::domain_event::Event;
use crate::error::{DomainError, DomainResult as Result};
use bon::Builder;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Builder)]
pub struct EventSourcing {
    event_store: Arc<EventStore>,
    snapshot_store: Option<Arc<dyn SnapshotStore>>,
    #[builder(default)]
    snapshot_policy: SnapshotPolicy,
    #[builder(default = system_clock())]
    clock: Arc<dyn Clock>,
    #[builder(skip)]
    aggregate_types: DashMap<&'static str, TypeId>,
    #[builder(skip)]
    write_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EventSourcing {
    pub fn new(event_store: Arc<EventStore>) -> Self {
        Self::builder().event_store(event_store).build()
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.event_store
    }

    pub fn snapshot_policy(&self) -> SnapshotPolicy {
        self.snapshot_policy
    }

    /// 注册聚合类型
    pub fn register_aggregate_type<A>(&self)
    where
        A: Aggregate,
    {
        self.aggregate_types.insert(A::TYPE, TypeId::of::<A>());
    }

    fn ensure_registered<A>(&self) -> Result<()>
    where
        A: Aggregate,
    {
        match self.aggregate_types.get(A::TYPE).map(|t| *t.value()) {
            Some(type_id) if type_id == TypeId::of::<A>() => Ok(()),
            Some(_) => Err(DomainError::TypeMismatch {
                expected: A::TYPE.to_string(),
                found: std::any::type_name::<A>().to_string(),
            }),
            None => Err(DomainError::UnknownAggregateType {
                aggregate_type: A::TYPE.to_string(),
            }),
        }
    }

    /// 持久化聚合的未提交事件，返回写入的事件数
    pub async fn save_aggregate<A>(&self, aggregate: &mut A) -> Result<usize>
    where
        A: Aggregate,
    {
        let pending = aggregate.uncommitted_events().len();
        if pending == 0 {
            return Ok(0);
        }
        self.ensure_registered::<A>()?;

        let lock = self
            .write_locks
            .entry(aggregate.id().to_string())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let base = aggregate.version().saturating_sub(pending);
        let stored = self.event_store.aggregate_version(aggregate.id()).await?;
        if stored != base {
            return Err(DomainError::Concurrency {
                aggregate_id: aggregate.id().to_string(),
                expected: base,
                actual: stored,
            });
        }

        self.event_store
            .save_all(aggregate.uncommitted_events())
            .await?;
        aggregate.mark_events_committed();

        tracing::debug!(
            aggregate_type = A::TYPE,
            aggregate_id = %aggregate.id(),
            version = aggregate.version(),
            events = pending,
            "aggregate saved"
        );

        if self
            .snapshot_policy
            .should_snapshot_between(base, aggregate.version())
        {
            self.write_snapshot(aggregate).await;
        }

        Ok(pending)
    }

    async fn write_snapshot<A>(&self, aggregate: &A)
    where
        A: Aggregate,
    {
        let Some(store) = &self.snapshot_store else {
            return;
        };

        let result = match Snapshot::from_aggregate(aggregate, self.clock.now()) {
            Ok(snapshot) => store.save(snapshot).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(
                aggregate_type = A::TYPE,
                aggregate_id = %aggregate.id(),
                error = %err,
                "failed to write snapshot"
            );
        }
    }

    async fn restore_snapshot<A>(&self, aggregate_id: &str) -> Option<A>
    where
        A: Aggregate,
    {
        let store = self.snapshot_store.as_ref()?;
        let restored = match store.latest(aggregate_id).await {
            Ok(Some(snapshot)) => snapshot.to_aggregate::<A>(),
            Ok(None) => return None,
            Err(err) => Err(err),
        };

        match restored {
            Ok(aggregate) => Some(aggregate),
            Err(err) => {
                tracing::warn!(
                    aggregate_type = A::TYPE,
                    aggregate_id,
                    error = %err,
                    "ignoring unusable snapshot, replaying full history"
                );
                None
            }
        }
    }

    /// 重建聚合；无任何事件时返回 `None`
    pub async fn load_aggregate<A>(
        &self,
        aggregate_id: &str,
        expected_version: Option<usize>,
    ) -> Result<Option<A>>
    where
        A: Aggregate,
    {
        self.ensure_registered::<A>()?;

        let (mut aggregate, restored) = match self.restore_snapshot::<A>(aggregate_id).await {
            Some(aggregate) => (aggregate, true),
            None => (A::new(aggregate_id.to_string()), false),
        };

        let events = self
            .event_store
            .replay(aggregate_id, aggregate.version() + 1, None)
            .await?;
        if events.is_empty() && !restored {
            return Ok(None);
        }
        aggregate.load_from_history(&events)?;

        match expected_version {
            Some(expected) if expected != aggregate.version() => Err(DomainError::Concurrency {
                aggregate_id: aggregate_id.to_string(),
                expected,
                actual: aggregate.version(),
            }),
            _ => Ok(Some(aggregate)),
        }
    }

    /// 从头重放到 `to_version`（缺省为最新），不使用快照
    pub async fn replay_aggregate<A>(
        &self,
        aggregate_id: &str,
        to_version: Option<usize>,
    ) -> Result<Option<A>>
    where
        A: Aggregate,
    {
        self.ensure_registered::<A>()?;

        let events = self.event_store.replay(aggregate_id, 1, to_version).await?;
        if events.is_empty() {
            return Ok(None);
        }

        let mut aggregate = A::new(aggregate_id.to_string());
        aggregate.load_from_history(&events)?;
        Ok(Some(aggregate))
    }

    pub async fn exists(&self, aggregate_id: &str) -> Result<bool> {
        Ok(self.version(aggregate_id).await? > 0)
    }

    /// 已存储的最高版本，无事件时为 0
    pub async fn version(&self, aggregate_id: &str) -> Result<usize> {
        self.event_store.aggregate_version(aggregate_id).await
    }

    /// 删除聚合的全部事件与快照，返回删除的事件数
    pub async fn delete_aggregate(&self, aggregate_id: &str) -> Result<usize> {
        let deleted = self
            .event_store
            .delete(&EventDeletion::for_aggregate(aggregate_id))
            .await?;

        if let Some(store) = &self.snapshot_store {
            store.delete(aggregate_id).await?;
        }

        tracing::info!(aggregate_id, events = deleted, "aggregate deleted");
        Ok(deleted)
    }

    /// 聚合的事件时间线（按时间升序），可按事件类型过滤
    pub async fn aggregate_timeline(
        &self,
        aggregate_id: &str,
        event_types: Option<&[&str]>,
    ) -> Result<Vec<Event>> {
        let query = EventQuery::builder()
            .aggregate_id(aggregate_id)
            .maybe_event_types(event_types.map(|ts| ts.iter().map(|t| t.to_string()).collect()))
            .build();
        self.event_store.load(&query).await
    }
}

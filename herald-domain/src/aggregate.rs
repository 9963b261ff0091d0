//! 聚合（Aggregate）抽象
//!
//! 约束一个事件溯源聚合的核心行为：
//! - `when` 将事件投影到状态（唯一的状态变更入口）；
//! - `load_from_history` 按序重放历史事件，版本取自事件元数据；
//! - `apply_change` 应用新事件，版本在本地递增并记入未提交事件。
//!
use crate::domain_event::{Event, EventPayload, MetadataPatch};
use crate::entity::Entity;
use crate::error::DomainResult;
use serde::{Serialize, de::DeserializeOwned};

/// 事件溯源聚合接口
pub trait Aggregate: Entity + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 聚合类型名（用于注册与快照）
    const TYPE: &'static str;

    /// 状态转移函数：将单个事件应用到状态
    fn when(&mut self, event: &Event) -> DomainResult<()>;

    /// 重放历史：信任已持久化的 `aggregate_version`
    fn load_from_history<'a, I>(&mut self, events: I) -> DomainResult<()>
    where
        I: IntoIterator<Item = &'a Event>,
    {
        for event in events {
            self.when(event)?;
            self.set_version(event.metadata().aggregate_version());
        }
        Ok(())
    }

    /// 应用新事件：版本为当前版本 + 1，事件追加到未提交列表
    ///
    /// 事件元数据中的 `aggregate_id` 与 `aggregate_version` 会被覆写为本聚合的值。
    fn apply_change(&mut self, event: Event) -> DomainResult<()> {
        let next = self.version() + 1;
        let event = event.with_metadata(
            MetadataPatch::builder()
                .aggregate_id(self.id())
                .aggregate_version(next)
                .build(),
        );

        self.when(&event)?;
        self.set_version(next);
        self.uncommitted_events_mut().push(event);
        Ok(())
    }

    /// 由类型化载荷构造事件并应用
    fn record<P>(&mut self, payload: &P) -> DomainResult<()>
    where
        P: EventPayload,
    {
        let event = Event::from_payload(payload)?;
        self.apply_change(event)
    }

    /// 取出全部未提交事件（列表被清空）
    fn take_uncommitted_events(&mut self) -> Vec<Event> {
        std::mem::take(self.uncommitted_events_mut())
    }

    fn mark_events_committed(&mut self) {
        self.uncommitted_events_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::{EventMetadata, Payload};
    use crate::error::DomainError;
    use herald_macros::{entity, event};
    use serde_json::json;

    #[entity]
    #[derive(Clone)]
    struct Counter {
        value: i64,
    }

    #[event(event_type = "counter.added")]
    struct Added {
        amount: i64,
    }

    #[event(event_type = "counter.closed")]
    struct Closed {}

    impl Aggregate for Counter {
        const TYPE: &'static str = "counter";

        fn when(&mut self, event: &Event) -> DomainResult<()> {
            match event.event_type() {
                Added::EVENT_TYPE => {
                    let added: Added = event.decode()?;
                    self.value += added.amount;
                }
                Closed::EVENT_TYPE => self.set_deleted(true),
                other => {
                    return Err(DomainError::UnknownEventType {
                        event_type: other.to_string(),
                    });
                }
            }
            Ok(())
        }
    }

    fn stored(version: usize, amount: i64) -> Event {
        let payload: Payload = json!({ "amount": amount })
            .as_object()
            .cloned()
            .unwrap_or_default();
        Event::with_parts(
            Added::EVENT_TYPE,
            EventMetadata::builder()
                .aggregate_id("c-1")
                .aggregate_version(version)
                .build(),
            payload,
        )
    }

    #[test]
    fn new_entity_starts_empty() {
        let counter = Counter::new("c-1".to_string());
        assert_eq!(counter.id(), "c-1");
        assert_eq!(counter.version(), 0);
        assert!(counter.uncommitted_events().is_empty());
        assert!(!counter.is_deleted());
    }

    #[test]
    fn apply_change_increments_version_by_one() {
        let mut counter = Counter::new("c-1".to_string());
        counter.record(&Added { amount: 2 }).unwrap();
        counter.record(&Added { amount: 3 }).unwrap();

        assert_eq!(counter.value, 5);
        assert_eq!(counter.version(), 2);

        let pending = counter.uncommitted_events();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].metadata().aggregate_version(), 1);
        assert_eq!(pending[1].metadata().aggregate_version(), 2);
        assert_eq!(pending[1].metadata().aggregate_id(), Some("c-1"));
    }

    #[test]
    fn replay_trusts_stored_versions() {
        let history = vec![stored(3, 1), stored(7, 4)];
        let mut counter = Counter::new("c-1".to_string());
        counter.load_from_history(&history).unwrap();

        assert_eq!(counter.value, 5);
        assert_eq!(counter.version(), 7);
        assert!(counter.uncommitted_events().is_empty());
    }

    #[test]
    fn unknown_event_aborts_replay() {
        let mut counter = Counter::new("c-1".to_string());
        let bogus = Event::new("counter.renamed", Payload::new());
        let err = counter.load_from_history([&bogus]).unwrap_err();
        assert!(matches!(err, DomainError::UnknownEventType { .. }));
    }

    #[test]
    fn take_uncommitted_drains_pending_events() {
        let mut counter = Counter::new("c-1".to_string());
        counter.record(&Added { amount: 1 }).unwrap();
        counter.record(&Closed {}).unwrap();

        assert!(counter.is_deleted());
        let taken = counter.take_uncommitted_events();
        assert_eq!(taken.len(), 2);
        assert!(counter.uncommitted_events().is_empty());
        assert_eq!(counter.version(), 2);
    }

    #[test]
    fn uncommitted_events_are_not_serialized() {
        let mut counter = Counter::new("c-1".to_string());
        counter.record(&Added { amount: 9 }).unwrap();

        let state = serde_json::to_value(&counter).unwrap();
        assert!(state.get("uncommitted_events").is_none());

        let restored: Counter = serde_json::from_value(state).unwrap();
        assert_eq!(restored.value, 9);
        assert_eq!(restored.version(), 1);
        assert!(restored.uncommitted_events().is_empty());
    }
}

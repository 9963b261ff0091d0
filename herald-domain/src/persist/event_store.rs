//! 事件存储（EventStore）
//!
//! 追加写的事件持久化层，物理存储委托给可插拔的 `EventStorageBackend`：
//! - 按事件类型注册编解码器，未注册类型写入时按信封原样存储；
//! - 读取时未注册类型或解码失败的记录记录告警后跳过，不影响整体加载；
//! - `replay` 在聚合全部历史上按 `[from, to]` 版本窗口过滤，并按版本升序返回。
//!
use super::backend::{EventDeletion, EventQuery, EventStorageBackend};
use super::backend_inmemory::InMemoryEventBackend;
use super::codec::{EventCodec, JsonEventCodec, TypedEventCodec};
use super::serialized_event::SerializedEvent;
use crate::domain_event::{Event, EventPayload};
use crate::error::{DomainError, DomainResult as Result};
use dashmap::DashMap;
use std::sync::Arc;

pub struct EventStore {
    backend: Arc<dyn EventStorageBackend>,
    codecs: DashMap<String, Arc<dyn EventCodec>>,
}

impl EventStore {
    pub fn new(backend: Arc<dyn EventStorageBackend>) -> Self {
        Self {
            backend,
            codecs: DashMap::new(),
        }
    }

    /// 使用内存后端
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEventBackend::new()))
    }

    pub fn backend(&self) -> &Arc<dyn EventStorageBackend> {
        &self.backend
    }

    /// 注册事件类型及其编解码器；读取时只有已注册类型会被还原
    pub fn register_event_type(&self, event_type: impl Into<String>, codec: Arc<dyn EventCodec>) {
        self.codecs.insert(event_type.into(), codec);
    }

    /// 以类型化载荷注册事件类型
    pub fn register_payload<P>(&self)
    where
        P: EventPayload,
    {
        self.register_event_type(P::EVENT_TYPE, Arc::new(TypedEventCodec::<P>::new()));
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.codecs.contains_key(event_type)
    }

    fn codec(&self, event_type: &str) -> Option<Arc<dyn EventCodec>> {
        self.codecs.get(event_type).map(|c| c.value().clone())
    }

    fn encode(&self, event: &Event) -> Result<SerializedEvent> {
        match self.codec(event.event_type()) {
            Some(codec) => codec.encode(event),
            None => JsonEventCodec.encode(event),
        }
    }

    fn decode_all(&self, records: Vec<SerializedEvent>) -> Vec<Event> {
        records
            .into_iter()
            .filter_map(|record| {
                let Some(codec) = self.codec(record.event_type()) else {
                    tracing::warn!(
                        event_id = %record.event_id(),
                        event_type = %record.event_type(),
                        "skipping stored event of unregistered type"
                    );
                    return None;
                };
                match codec.decode(&record) {
                    Ok(event) => Some(event),
                    Err(err) => {
                        tracing::warn!(
                            event_id = %record.event_id(),
                            event_type = %record.event_type(),
                            error = %err,
                            "skipping stored event that failed to decode"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    pub async fn save(&self, event: &Event) -> Result<()> {
        let record = self.encode(event)?;
        self.backend
            .save_raw(record)
            .await
            .map_err(|e| DomainError::event_store("save", e))
    }

    pub async fn save_all(&self, events: &[Event]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let records = events
            .iter()
            .map(|e| self.encode(e))
            .collect::<Result<Vec<_>>>()?;
        self.backend
            .save_raw_batch(records)
            .await
            .map_err(|e| DomainError::event_store("save_all", e))
    }

    /// 按条件加载，按时间升序
    ///
    /// `limit` 在跳过无法解码的记录之后生效。
    pub async fn load(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let mut unbounded = query.clone();
        let limit = unbounded.limit.take();
        let records = self
            .backend
            .load_raw(&unbounded)
            .await
            .map_err(|e| DomainError::event_store("load", e))?;

        let mut events = self.decode_all(records);
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    pub async fn load_aggregate_events(&self, aggregate_id: &str) -> Result<Vec<Event>> {
        self.load(&EventQuery::for_aggregate(aggregate_id)).await
    }

    pub async fn delete(&self, deletion: &EventDeletion) -> Result<usize> {
        self.backend
            .delete_raw(deletion)
            .await
            .map_err(|e| DomainError::event_store("delete", e))
    }

    /// 满足条件的记录数（含未注册类型）
    pub async fn event_count(&self, query: &EventQuery) -> Result<usize> {
        self.backend
            .count_raw(query)
            .await
            .map_err(|e| DomainError::event_store("count", e))
    }

    /// 聚合在 `[from_version, to_version]` 内的事件，按版本升序；`to_version` 缺省为最新
    pub async fn replay(
        &self,
        aggregate_id: &str,
        from_version: usize,
        to_version: Option<usize>,
    ) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .load_aggregate_events(aggregate_id)
            .await?
            .into_iter()
            .filter(|e| {
                let version = e.metadata().aggregate_version();
                version >= from_version && to_version.is_none_or(|to| version <= to)
            })
            .collect();
        events.sort_by_key(|e| e.metadata().aggregate_version());
        Ok(events)
    }

    /// 聚合已存储的最高版本，无事件时为 0
    pub async fn aggregate_version(&self, aggregate_id: &str) -> Result<usize> {
        let records = self
            .backend
            .load_raw(&EventQuery::for_aggregate(aggregate_id))
            .await
            .map_err(|e| DomainError::event_store("aggregate_version", e))?;
        Ok(records
            .iter()
            .map(SerializedEvent::aggregate_version)
            .max()
            .unwrap_or(0))
    }
}

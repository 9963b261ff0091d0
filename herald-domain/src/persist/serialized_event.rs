use crate::domain_event::Event;
use crate::error::DomainResult as Result;
use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 存储后端看到的事件记录
///
/// 索引字段（类型、聚合、版本、时间）单独存放以便过滤，
/// `body` 为完整的事件传输形态 `{"name", "metadata", "payload"}`。
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
pub struct SerializedEvent {
    #[builder(into)]
    event_id: String,
    #[builder(into)]
    event_type: String,
    #[builder(into)]
    aggregate_id: Option<String>,
    aggregate_version: usize,
    occurred_at: DateTime<Utc>,
    body: Value,
}

impl SerializedEvent {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> Option<&str> {
        self.aggregate_id.as_deref()
    }

    pub fn aggregate_version(&self) -> usize {
        self.aggregate_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }

    /// 以事件本身的元数据填充索引字段
    pub fn from_event(event: &Event, body: Value) -> Self {
        let metadata = event.metadata();
        Self::builder()
            .event_id(event.id())
            .event_type(event.event_type())
            .maybe_aggregate_id(metadata.aggregate_id())
            .aggregate_version(metadata.aggregate_version())
            .occurred_at(metadata.timestamp())
            .body(body)
            .build()
    }

    /// 以信封原样序列化
    pub fn encode(event: &Event) -> Result<Self> {
        Ok(Self::from_event(event, event.to_json()?))
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::event_payload::EventPayload;
use super::metadata::{EventMetadata, MetadataPatch};
use crate::error::{DomainError, DomainResult};

/// 事件载荷（不透明的键值集合）
pub type Payload = Map<String, Value>;

/// 不可变事件信封：元数据 + 载荷 + 事件类型名
///
/// 持久化/传输形态：
/// `{"name": ..., "metadata": {...}, "payload": {...}}`
///
/// 相等性仅由 `metadata.id` 决定。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    name: String,
    metadata: EventMetadata,
    #[serde(default)]
    payload: Payload,
}

impl Event {
    /// 创建事件，自动分配 id 与时间戳
    pub fn new(name: impl Into<String>, payload: Payload) -> Self {
        Self::with_parts(name, EventMetadata::default(), payload)
    }

    pub fn with_parts(name: impl Into<String>, metadata: EventMetadata, payload: Payload) -> Self {
        Self {
            name: name.into(),
            metadata,
            payload,
        }
    }

    /// 由类型化载荷创建事件，事件类型与类别取自载荷定义
    pub fn from_payload<P>(payload: &P) -> DomainResult<Self>
    where
        P: EventPayload,
    {
        let metadata = EventMetadata::builder().kind(P::KIND).build();
        Self::from_payload_with(payload, metadata)
    }

    pub fn from_payload_with<P>(payload: &P, metadata: EventMetadata) -> DomainResult<Self>
    where
        P: EventPayload,
    {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(Self::with_parts(P::EVENT_TYPE, metadata, map)),
            other => Err(DomainError::TypeMismatch {
                expected: "json object payload".to_string(),
                found: other.to_string(),
            }),
        }
    }

    /// 将载荷解码为类型化结构
    pub fn decode<P>(&self) -> DomainResult<P>
    where
        P: EventPayload,
    {
        if self.name != P::EVENT_TYPE {
            return Err(DomainError::TypeMismatch {
                expected: P::EVENT_TYPE.to_string(),
                found: self.name.clone(),
            });
        }

        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }

    /// 事件类型名，用于路由与存储过滤
    pub fn event_type(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        self.metadata.id()
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// 返回覆写元数据后的新事件，原事件不变
    pub fn with_metadata(&self, patch: MetadataPatch) -> Self {
        Self {
            name: self.name.clone(),
            metadata: self.metadata.patched(patch),
            payload: self.payload.clone(),
        }
    }

    /// 标记为由 `parent` 引发：沿用其关联 ID（缺省为其事件 ID），因果 ID 指向 `parent`
    pub fn caused_by(&self, parent: &Event) -> Self {
        let correlation_id = parent
            .metadata
            .correlation_id()
            .unwrap_or(parent.id())
            .to_string();

        self.with_metadata(
            MetadataPatch::builder()
                .correlation_id(correlation_id)
                .causation_id(parent.id())
                .build(),
        )
    }

    pub fn to_json(&self) -> DomainResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> DomainResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.metadata.id() == other.metadata.id()
    }
}

impl Eq for Event {}

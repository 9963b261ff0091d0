//! 事件编解码
//!
//! 事件存储按事件类型查找编解码器：
//! - `JsonEventCodec`：信封原样存取；
//! - `TypedEventCodec<P>`：解码时额外校验载荷能解析为 `P`，不合法的记录会被跳过。
//!
use super::serialized_event::SerializedEvent;
use crate::domain_event::{Event, EventPayload};
use crate::error::DomainResult as Result;
use std::marker::PhantomData;

pub trait EventCodec: Send + Sync {
    fn encode(&self, event: &Event) -> Result<SerializedEvent>;

    fn decode(&self, record: &SerializedEvent) -> Result<Event>;
}

/// 原样存取的 JSON 编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventCodec;

impl EventCodec for JsonEventCodec {
    fn encode(&self, event: &Event) -> Result<SerializedEvent> {
        SerializedEvent::encode(event)
    }

    fn decode(&self, record: &SerializedEvent) -> Result<Event> {
        Event::from_json(record.body().clone())
    }
}

/// 绑定类型化载荷的编解码器
pub struct TypedEventCodec<P> {
    _payload: PhantomData<fn() -> P>,
}

impl<P> TypedEventCodec<P> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<P> Default for TypedEventCodec<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> EventCodec for TypedEventCodec<P>
where
    P: EventPayload,
{
    fn encode(&self, event: &Event) -> Result<SerializedEvent> {
        event.decode::<P>()?;
        SerializedEvent::encode(event)
    }

    fn decode(&self, record: &SerializedEvent) -> Result<Event> {
        let event = Event::from_json(record.body().clone())?;
        event.decode::<P>()?;
        Ok(event)
    }
}

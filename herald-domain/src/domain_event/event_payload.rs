use serde::Serialize;
use serde::de::DeserializeOwned;

use super::metadata::EventKind;

/// 类型化事件载荷需要满足的能力边界（通常由 `#[event]` 宏实现）
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// 事件类型名（形如 `user.registered`）
    const EVENT_TYPE: &'static str;

    /// 事件类别
    const KIND: EventKind = EventKind::Domain;
}

//! 事件（Event）与元数据
//!
//! 定义不可变事件信封 `Event`、元数据 `EventMetadata` 及其覆写补丁，
//! 以及类型化载荷需要实现的最小接口 `EventPayload`。

mod event;
mod event_payload;
mod metadata;

pub use event::{Event, Payload};
pub use event_payload::EventPayload;
pub use metadata::{EventKind, EventMetadata, MetadataPatch};

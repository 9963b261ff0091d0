//! 持久化与事件溯源（persist）
//!
//! 定义事件存储、存储后端协议、快照及聚合事件溯源，支持：
//! - 可插拔存储后端（`EventStorageBackend`）与内存参考实现（`InMemoryEventBackend`）；
//! - 按类型注册编解码器的事件存储（`EventStore`），过滤加载、删除与按版本重放；
//! - 快照读写与策略（`SnapshotStore`/`SnapshotPolicy`）；
//! - 聚合保存与重建（`EventSourcing`），带乐观并发校验。
//!
//! 该模块聚焦协议与装配逻辑，具体存储后端由上层提供实现并注入。
//!
mod backend;
mod backend_inmemory;
mod codec;
mod event_sourcing;
mod event_store;
mod serialized_event;
mod snapshot;

pub use backend::{EventDeletion, EventQuery, EventStorageBackend};
pub use backend_inmemory::InMemoryEventBackend;
pub use codec::{EventCodec, JsonEventCodec, TypedEventCodec};
pub use event_sourcing::EventSourcing;
pub use event_store::EventStore;
pub use serialized_event::SerializedEvent;
pub use snapshot::{InMemorySnapshotStore, Snapshot, SnapshotPolicy, SnapshotStore};

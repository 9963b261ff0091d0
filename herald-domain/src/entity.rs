//! 实体（Entity）基础抽象
//!
//! 为聚合提供统一的标识、版本（乐观并发）与未提交事件跟踪能力。
//! 通常由 `#[entity]` 宏生成实现。
//!
use crate::domain_event::Event;

/// 具备唯一标识、版本与未提交事件列表的实体抽象
pub trait Entity: Send + Sync {
    /// 使用给定标识创建实体（聚合），版本为 0
    fn new(aggregate_id: String) -> Self;

    /// 获取实体标识
    fn id(&self) -> &str;

    /// 获取当前版本（已应用的最后一个事件版本，0 表示无事件）
    fn version(&self) -> usize;

    fn set_version(&mut self, version: usize);

    /// 尚未持久化的事件（按产生顺序）
    fn uncommitted_events(&self) -> &[Event];

    fn uncommitted_events_mut(&mut self) -> &mut Vec<Event>;

    /// 是否已被标记删除
    fn is_deleted(&self) -> bool;

    fn set_deleted(&mut self, deleted: bool);
}

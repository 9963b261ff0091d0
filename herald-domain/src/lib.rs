//! 事件驱动核心（herald-domain）
//!
//! 提供进程内事件系统与事件溯源的通用构件：
//! - 事件与元数据（`domain_event`）：不可变事件信封、类型化载荷；
//! - 事件系统（`eventing`）：处理器注册表、同步/并发总线、中间件与死信队列；
//! - 持久化（`persist`）：可插拔存储后端、事件存储、快照与聚合事件溯源；
//! - 聚合（`aggregate`）与实体（`entity`）：按事件历史折叠状态，跟踪未提交事件。
//!
//! 本 crate 不绑定具体存储与传输实现，仅定义协议与参考的内存实现，
//! 以便在不同基础设施上进行适配。
//!
//! 典型用法：
//! 1. 使用 `#[event]` 定义类型化载荷，使用 `#[entity]` + `Aggregate` 定义聚合；
//! 2. 在 `EventBus` / `ConcurrentEventBus` 上注册处理器并挂载 `DeadLetterQueue`；
//! 3. 通过 `EventSourcing` 保存与重建聚合，依赖 `EventStore` 完成持久化。
//!
pub mod aggregate;
pub mod clock;
pub mod domain_event;
pub mod entity;
pub mod error;
pub mod eventing;
pub mod persist;

// 允许在本 crate 内部通过 ::herald_domain 进行自引用，
// 以便过程宏在本 crate 的单元测试中也能解析到 ::herald_domain 路径。
extern crate self as herald_domain;

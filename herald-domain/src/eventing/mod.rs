//! 事件子系统（eventing）
//!
//! 提供进程内事件发布/订阅与失败处理的基础构件：
//! - `EventHandler` / `AsyncEventHandler`：事件处理器，`RegisteredHandler` 显式标记执行模式；
//! - `HandlerRegistry`：事件类型到有序处理器列表的映射；
//! - `EventBus`：同步总线，在调用方线程内执行处理器；
//! - `ConcurrentEventBus`：并发总线，在信号量限制下并发执行处理器；
//! - `DeadLetterQueue`：记录失败、归类原因并按指数退避安排重试。
//!
pub mod bus;
pub mod concurrent_bus;
pub mod dead_letter;
pub mod failure;
pub mod handler;
pub mod middleware;
pub mod registry;

pub use bus::EventBus;
pub use concurrent_bus::{BusConfig, ConcurrentEventBus, DEFAULT_CONCURRENCY_LIMIT, execute_handler};
pub use dead_letter::{
    DeadLetterConfig, DeadLetterQueue, DeadLetterSink, DeadLetterStats, FailedEvent,
    FailedEventFilter, retry_backoff,
};
pub use failure::{BUS_ORIGIN, FailedInvocation, FailureReason, HandlerFailure, classify};
pub use handler::{
    AsyncEventHandler, AsyncFnHandler, EventHandler, ExecutionMode, FnHandler, HandledEventType,
    RegisteredHandler, WILDCARD,
};
pub use middleware::{Middleware, MiddlewareResult, SyncMiddleware};
pub use registry::HandlerRegistry;

//! herald 应用层
//!
//! 在领域层的总线、死信队列与事件溯源之上提供：
//! - `EventDispatcher`：同步/并发两条总线的统一订阅与发布入口；
//! - `DeadLetterRetrier`：按退避计划重试死信，并可作为后台任务周期运行；
//! - `HeraldContext`：进程级上下文，统一构建并持有上述组件；
//! - `HeraldConfig` 与 `telemetry`：配置加载与日志初始化。
//!
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod retry;
pub mod telemetry;

pub use config::{HeraldConfig, RetryConfig, TelemetryConfig};
pub use context::HeraldContext;
pub use dispatcher::{EventDispatcher, Subscriber};
pub use error::{AppError, AppResult};
pub use retry::{DeadLetterRetrier, RetryHandle, RetryReport};

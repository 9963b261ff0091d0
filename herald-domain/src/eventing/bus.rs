//! 同步事件总线（EventBus）
//!
//! 在调用方线程内完成整个发布流程：
//! 中间件链 → 注册表解析 → 按序调用处理器 → 失败转入死信队列。
//!
//! 单个处理器失败（含 panic）被隔离，不影响后续处理器；
//! 仅中间件或注册表故障会以 `DomainError::EventBus` 返回给调用方，
//! 并以合成处理器名 `bus` 记入死信队列。
//!
use super::dead_letter::DeadLetterSink;
use super::failure::{BUS_ORIGIN, FailedInvocation};
use super::handler::{EventHandler, ExecutionMode, RegisteredHandler};
use super::middleware::{MiddlewareResult, SyncMiddleware, run_sync_chain};
use super::registry::HandlerRegistry;
use crate::domain_event::Event;
use crate::error::{DomainError, DomainResult};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

/// 同步事件总线
#[derive(Default)]
pub struct EventBus {
    registry: HandlerRegistry,
    middleware: RwLock<Vec<SyncMiddleware>>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂载死信接收端
    pub fn with_dead_letters(dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            dead_letters: Some(dead_letters),
            ..Self::default()
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 注册同步处理器；`event_types` 为 `None` 时使用处理器声明的类型
    pub fn register_handler(
        &self,
        handler: Arc<dyn EventHandler>,
        event_types: Option<Vec<String>>,
    ) -> DomainResult<()> {
        self.registry
            .register(RegisteredHandler::Sync(handler), event_types)
    }

    /// 按名称注销处理器，返回是否有条目被移除
    pub fn unregister_handler(&self, handler_name: &str) -> DomainResult<bool> {
        Ok(self.registry.unregister(handler_name)? > 0)
    }

    pub fn add_middleware<F>(&self, f: F)
    where
        F: Fn(Event) -> MiddlewareResult + Send + Sync + 'static,
    {
        self.add_shared_middleware(Arc::new(f));
    }

    pub fn add_shared_middleware(&self, middleware: SyncMiddleware) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    pub fn clear_middleware(&self) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// 发布事件，阻塞直至所有匹配的处理器执行完毕
    pub fn publish(&self, event: Event) -> DomainResult<()> {
        let original = event.clone();
        match self.dispatch(event) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(
                    event_id = %original.id(),
                    event_type = %original.event_type(),
                    error = %format!("{err:#}"),
                    "event bus failure"
                );
                let reason = format!("{err:#}");
                self.record_failures(&original, vec![FailedInvocation::new(BUS_ORIGIN, err)]);
                Err(DomainError::event_bus(reason))
            }
        }
    }

    fn dispatch(&self, event: Event) -> anyhow::Result<()> {
        let chain = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let Some(event) = run_sync_chain(&chain, event)? else {
            tracing::debug!("event dropped by middleware");
            return Ok(());
        };

        let handlers = self.registry.resolve_mode(&event, ExecutionMode::Sync)?;
        if handlers.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            handlers = handlers.len(),
            "dispatching event"
        );

        let mut failures = Vec::new();
        for handler in handlers {
            let RegisteredHandler::Sync(handler) = handler else {
                continue;
            };
            if let Some(failure) = invoke(handler.as_ref(), &event) {
                tracing::warn!(
                    event_id = %event.id(),
                    handler = %failure.handler_name,
                    error = %failure.error,
                    "event handler failed"
                );
                failures.push(failure);
            }
        }

        if !failures.is_empty() {
            self.record_failures(&event, failures);
        }
        Ok(())
    }

    fn record_failures(&self, event: &Event, failures: Vec<FailedInvocation>) {
        match &self.dead_letters {
            Some(sink) => sink.record(event, failures),
            None => {
                for failure in failures {
                    tracing::error!(
                        event_id = %event.id(),
                        handler = %failure.handler_name,
                        error = %failure.error,
                        "event handler failure not recorded: no dead-letter queue configured"
                    );
                }
            }
        }
    }
}

/// 调用同步处理器，捕获错误与 panic
pub(crate) fn invoke(handler: &dyn EventHandler, event: &Event) -> Option<FailedInvocation> {
    match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(FailedInvocation::new(handler.handler_name(), error)),
        Err(payload) => Some(FailedInvocation::panicked(
            handler.handler_name(),
            payload.as_ref(),
        )),
    }
}

//! 总线中间件
//!
//! 中间件按注册顺序依次处理事件，可改写事件或返回 `None` 丢弃事件。
//! 同步总线仅支持同步中间件；并发总线同时支持同步与异步中间件。
//!
use crate::domain_event::Event;
use futures_core::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// 中间件结果：`Ok(None)` 表示丢弃事件（非错误）
pub type MiddlewareResult = anyhow::Result<Option<Event>>;

/// 同步中间件
pub type SyncMiddleware = Arc<dyn Fn(Event) -> MiddlewareResult + Send + Sync>;

type AsyncMiddlewareFn = Arc<dyn Fn(Event) -> BoxFuture<'static, MiddlewareResult> + Send + Sync>;

/// 并发总线中间件
#[derive(Clone)]
pub enum Middleware {
    Sync(SyncMiddleware),
    Async(AsyncMiddlewareFn),
}

impl Middleware {
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(Event) -> MiddlewareResult + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MiddlewareResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |event| Box::pin(f(event))))
    }

    pub async fn run(&self, event: Event) -> MiddlewareResult {
        match self {
            Self::Sync(f) => f(event),
            Self::Async(f) => f(event).await,
        }
    }
}

impl From<SyncMiddleware> for Middleware {
    fn from(f: SyncMiddleware) -> Self {
        Self::Sync(f)
    }
}

/// 依次执行同步中间件；任一步返回 `None` 时停止
pub(crate) fn run_sync_chain(chain: &[SyncMiddleware], event: Event) -> MiddlewareResult {
    let mut current = event;
    for step in chain {
        match step(current)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

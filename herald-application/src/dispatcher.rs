//! 事件分发门面（EventDispatcher）
//!
//! 同时持有一条同步总线与一条并发总线（共享同一死信接收端）：
//! - `subscribe` 未指定总线时按订阅者类型选择：同步处理器 → 同步总线，异步处理器 → 并发总线；
//! - 普通闭包通过 `subscribe_fn` / `subscribe_async_fn` 包装为处理器；
//! - 维护按事件类型索引的订阅表，用于查询、批量退订与清空；
//! - `add_middleware` 同时作用于两条总线。
//!
use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use herald_domain::domain_event::Event;
use herald_domain::eventing::{
    AsyncEventHandler, AsyncFnHandler, BusConfig, ConcurrentEventBus, DeadLetterSink, EventBus,
    EventHandler, ExecutionMode, FnHandler, HandledEventType, Middleware, MiddlewareResult,
    RegisteredHandler, SyncMiddleware,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// 订阅者
#[derive(Clone)]
pub enum Subscriber {
    Sync(Arc<dyn EventHandler>),
    Async(Arc<dyn AsyncEventHandler>),
}

impl Subscriber {
    pub fn handler_name(&self) -> &str {
        match self {
            Self::Sync(h) => h.handler_name(),
            Self::Async(h) => h.handler_name(),
        }
    }

    fn into_registered(self) -> RegisteredHandler {
        match self {
            Self::Sync(h) => RegisteredHandler::Sync(h),
            Self::Async(h) => RegisteredHandler::Concurrent(h),
        }
    }
}

impl From<Arc<dyn EventHandler>> for Subscriber {
    fn from(handler: Arc<dyn EventHandler>) -> Self {
        Self::Sync(handler)
    }
}

impl From<Arc<dyn AsyncEventHandler>> for Subscriber {
    fn from(handler: Arc<dyn AsyncEventHandler>) -> Self {
        Self::Async(handler)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Subscription {
    handler_name: String,
    bus: ExecutionMode,
}

pub struct EventDispatcher {
    sync_bus: EventBus,
    concurrent_bus: ConcurrentEventBus,
    subscriptions: DashMap<String, Vec<Subscription>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventDispatcher {
    /// 不挂载死信接收端，处理器失败只记录日志
    pub fn new(config: BusConfig) -> Self {
        Self {
            sync_bus: EventBus::new(),
            concurrent_bus: ConcurrentEventBus::new(config),
            subscriptions: DashMap::new(),
        }
    }

    pub fn with_dead_letters(config: BusConfig, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            sync_bus: EventBus::with_dead_letters(dead_letters.clone()),
            concurrent_bus: ConcurrentEventBus::with_dead_letters(config, dead_letters),
            subscriptions: DashMap::new(),
        }
    }

    pub fn sync_bus(&self) -> &EventBus {
        &self.sync_bus
    }

    pub fn concurrent_bus(&self) -> &ConcurrentEventBus {
        &self.concurrent_bus
    }

    /// 订阅事件类型（`*` 表示全部）
    ///
    /// `concurrent` 为 `None` 时按订阅者类型选择总线；
    /// 异步订阅者不能挂到同步总线上。
    pub fn subscribe(
        &self,
        event_type: impl Into<String>,
        subscriber: Subscriber,
        concurrent: Option<bool>,
    ) -> AppResult<()> {
        let event_type = event_type.into();
        let handler_name = subscriber.handler_name().to_string();

        let bus = match (&subscriber, concurrent) {
            (Subscriber::Async(_), Some(false)) => {
                return Err(AppError::InvalidSubscription {
                    event_type,
                    handler: handler_name,
                    reason: "async handlers require the concurrent bus",
                });
            }
            (_, Some(true)) | (Subscriber::Async(_), None) => ExecutionMode::Concurrent,
            (Subscriber::Sync(_), _) => ExecutionMode::Sync,
        };

        let types = Some(vec![event_type.clone()]);
        match (bus, subscriber) {
            (ExecutionMode::Sync, Subscriber::Sync(h)) => {
                self.sync_bus.register_handler(h, types)?
            }
            (_, subscriber) => self
                .concurrent_bus
                .register_handler(subscriber.into_registered(), types)?,
        }

        tracing::debug!(%event_type, handler = %handler_name, ?bus, "subscribed");
        self.subscriptions
            .entry(event_type)
            .or_default()
            .push(Subscription { handler_name, bus });
        Ok(())
    }

    /// 以同步闭包订阅，处理器名为 `name`
    pub fn subscribe_fn<F>(
        &self,
        event_type: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> AppResult<()>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let handled = HandledEventType::from_types([event_type.clone()]);
        let handler = FnHandler::new(name, handled, f);
        self.subscribe(event_type, Subscriber::Sync(Arc::new(handler)), None)
    }

    /// 以异步闭包订阅，总是挂到并发总线
    pub fn subscribe_async_fn<F, Fut>(
        &self,
        event_type: impl Into<String>,
        name: impl Into<String>,
        f: F,
    ) -> AppResult<()>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let event_type = event_type.into();
        let handled = HandledEventType::from_types([event_type.clone()]);
        let handler = AsyncFnHandler::new(name, handled, f);
        self.subscribe(event_type, Subscriber::Async(Arc::new(handler)), None)
    }

    /// 退订某事件类型下的处理器；`handler_name` 为 `None` 时退订该类型的全部订阅
    ///
    /// 返回移除的订阅数。
    pub fn unsubscribe(&self, event_type: &str, handler_name: Option<&str>) -> AppResult<usize> {
        let Some(mut subs) = self.subscriptions.get_mut(event_type) else {
            return Ok(0);
        };

        let (removed, kept): (Vec<Subscription>, Vec<Subscription>) = subs
            .drain(..)
            .partition(|s| handler_name.is_none_or(|name| s.handler_name == name));
        *subs = kept;
        let now_empty = subs.is_empty();
        drop(subs);
        if now_empty {
            self.subscriptions.remove_if(event_type, |_, v| v.is_empty());
        }

        for sub in &removed {
            self.detach(event_type, sub)?;
        }
        Ok(removed.len())
    }

    /// 清空通过本门面建立的全部订阅
    pub fn clear_subscriptions(&self) -> AppResult<usize> {
        let event_types: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        let mut removed = 0;
        for event_type in event_types {
            if let Some((event_type, subs)) = self.subscriptions.remove(&event_type) {
                for sub in &subs {
                    self.detach(&event_type, sub)?;
                }
                removed += subs.len();
            }
        }
        tracing::debug!(removed, "subscriptions cleared");
        Ok(removed)
    }

    fn detach(&self, event_type: &str, sub: &Subscription) -> AppResult<()> {
        let registry = match sub.bus {
            ExecutionMode::Sync => self.sync_bus.registry(),
            ExecutionMode::Concurrent => self.concurrent_bus.registry(),
        };
        registry.unregister_for(event_type, &sub.handler_name)?;
        Ok(())
    }

    /// 事件类型 → 处理器名称（按订阅顺序）
    pub fn subscriptions(&self) -> BTreeMap<String, Vec<String>> {
        self.subscriptions
            .iter()
            .map(|e| {
                let names = e.value().iter().map(|s| s.handler_name.clone()).collect();
                (e.key().clone(), names)
            })
            .collect()
    }

    /// 订阅数；指定事件类型时只统计该类型
    pub fn subscription_count(&self, event_type: Option<&str>) -> usize {
        match event_type {
            Some(t) => self.subscriptions.get(t).map(|s| s.len()).unwrap_or(0),
            None => self.subscriptions.iter().map(|e| e.value().len()).sum(),
        }
    }

    /// 两条总线同时追加同步中间件
    pub fn add_middleware<F>(&self, f: F)
    where
        F: Fn(Event) -> MiddlewareResult + Send + Sync + 'static,
    {
        let middleware: SyncMiddleware = Arc::new(f);
        self.sync_bus.add_shared_middleware(middleware.clone());
        self.concurrent_bus
            .add_middleware(Middleware::Sync(middleware));
    }

    /// 仅并发总线可用的异步中间件
    pub fn add_async_middleware<F, Fut>(&self, f: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MiddlewareResult> + Send + 'static,
    {
        self.concurrent_bus.add_middleware(Middleware::from_async(f));
    }

    pub fn clear_middleware(&self) {
        self.sync_bus.clear_middleware();
        self.concurrent_bus.clear_middleware();
    }

    /// 经同步总线发布
    pub fn publish(&self, event: Event) -> AppResult<()> {
        Ok(self.sync_bus.publish(event)?)
    }

    /// 经并发总线发布
    pub async fn publish_async(&self, event: Event) -> AppResult<()> {
        Ok(self.concurrent_bus.publish(event).await?)
    }

    /// 经并发总线批量发布，返回失败的事件数
    pub async fn publish_batch(&self, events: Vec<Event>) -> usize {
        self.concurrent_bus.publish_batch(events).await
    }

    /// 在两条总线的注册表中按名称查找处理器
    pub fn find_handler(&self, handler_name: &str) -> Option<RegisteredHandler> {
        self.sync_bus
            .registry()
            .find(handler_name)
            .or_else(|| self.concurrent_bus.registry().find(handler_name))
    }
}

//! 事件处理器（EventHandler / AsyncEventHandler）
//!
//! 定义消费某类/多类/全部事件的处理逻辑与元信息（名称、订阅类型），
//! 并以 `RegisteredHandler` 显式标记执行模式，在注册时一次性确定。
//!
use crate::domain_event::Event;
use async_trait::async_trait;
use futures_core::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// 通配事件类型
pub const WILDCARD: &str = "*";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandledEventType {
    One(String),
    Many(Vec<String>),
    All,
}

impl HandledEventType {
    /// 由类型列表构造；列表为空或包含 `*` 时视为全部
    pub fn from_types<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut types: Vec<String> = types.into_iter().map(Into::into).collect();
        if types.is_empty() || types.iter().any(|t| t == WILDCARD) {
            return Self::All;
        }
        if types.len() == 1 {
            return Self::One(types.remove(0));
        }
        Self::Many(types)
    }

    /// 是否接受给定事件类型
    pub fn accepts(&self, event_type: &str) -> bool {
        match self {
            Self::All => true,
            Self::One(t) => t == event_type,
            Self::Many(ts) => ts.iter().any(|t| t == event_type),
        }
    }
}

/// 执行模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// 在调用方线程内同步执行
    Sync,
    /// 在并发总线上作为独立任务执行
    Concurrent,
}

/// 同步事件处理器
pub trait EventHandler: Send + Sync {
    /// 处理器名称（用于死信记录与重试定位）
    fn handler_name(&self) -> &str;
    /// 返回该处理器支持的事件类型
    fn handled_event_type(&self) -> HandledEventType;
    /// 处理事件
    fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

/// 异步事件处理器
#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    fn handler_name(&self) -> &str;
    fn handled_event_type(&self) -> HandledEventType;
    async fn handle(&self, event: &Event) -> anyhow::Result<()>;
}

impl<T: EventHandler + ?Sized> EventHandler for Arc<T> {
    fn handler_name(&self) -> &str {
        (**self).handler_name()
    }

    fn handled_event_type(&self) -> HandledEventType {
        (**self).handled_event_type()
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (**self).handle(event)
    }
}

/// 已注册的处理器：显式携带执行模式
#[derive(Clone)]
pub enum RegisteredHandler {
    Sync(Arc<dyn EventHandler>),
    Concurrent(Arc<dyn AsyncEventHandler>),
}

impl RegisteredHandler {
    pub fn sync(handler: impl EventHandler + 'static) -> Self {
        Self::Sync(Arc::new(handler))
    }

    pub fn concurrent(handler: impl AsyncEventHandler + 'static) -> Self {
        Self::Concurrent(Arc::new(handler))
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Sync(_) => ExecutionMode::Sync,
            Self::Concurrent(_) => ExecutionMode::Concurrent,
        }
    }

    pub fn handler_name(&self) -> &str {
        match self {
            Self::Sync(h) => h.handler_name(),
            Self::Concurrent(h) => h.handler_name(),
        }
    }

    pub fn handled_event_type(&self) -> HandledEventType {
        match self {
            Self::Sync(h) => h.handled_event_type(),
            Self::Concurrent(h) => h.handled_event_type(),
        }
    }

    /// 全局处理器在每个事件上调用，判断是否接受
    pub fn can_handle(&self, event: &Event) -> bool {
        self.handled_event_type().accepts(event.event_type())
    }
}

impl fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("name", &self.handler_name())
            .field("mode", &self.mode())
            .finish()
    }
}

/// 闭包适配器（同步）
pub struct FnHandler<F> {
    name: String,
    handled: HandledEventType,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, handled: HandledEventType, f: F) -> Self {
        Self {
            name: name.into(),
            handled,
            f,
        }
    }
}

impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync,
{
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn handled_event_type(&self) -> HandledEventType {
        self.handled.clone()
    }

    fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event)
    }
}

type AsyncHandlerFn = Box<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 闭包适配器（异步），闭包按值接收事件副本
pub struct AsyncFnHandler {
    name: String,
    handled: HandledEventType,
    f: AsyncHandlerFn,
}

impl AsyncFnHandler {
    pub fn new<F, Fut>(name: impl Into<String>, handled: HandledEventType, f: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handled,
            f: Box::new(move |event| Box::pin(f(event))),
        }
    }
}

#[async_trait]
impl AsyncEventHandler for AsyncFnHandler {
    fn handler_name(&self) -> &str {
        &self.name
    }

    fn handled_event_type(&self) -> HandledEventType {
        self.handled.clone()
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        (self.f)(event.clone()).await
    }
}

//! 并发事件总线（ConcurrentEventBus）
//!
//! 与同步总线契约一致，区别在于：
//! - 中间件可为同步或异步，按序 await；
//! - 每个匹配的处理器作为独立 tokio 任务执行，由总线级信号量限制同时执行的数量；
//! - 同步处理器通过 `spawn_blocking` 卸载，执行期间持有信号量许可；
//! - 全部任务结束后才返回，失败一次性批量交给死信接收端；
//! - `publish_batch` 并发发布多条事件，单条失败不影响其余事件。
//!
//! 处理器没有内置超时，挂起的处理器会一直占用一个许可。
//!
//! 调整并发上限时原地增减同一信号量的许可：调小时先回收空闲许可，
//! 不足部分在执行中的处理器归还许可时抵扣，因此任何时刻都不会超过新旧上限中的较大者。
//!
use super::dead_letter::DeadLetterSink;
use super::failure::{BUS_ORIGIN, FailedInvocation};
use super::handler::{AsyncEventHandler, EventHandler, RegisteredHandler};
use super::middleware::{Middleware, MiddlewareResult};
use super::registry::HandlerRegistry;
use crate::domain_event::Event;
use crate::error::{DomainError, DomainResult};
use futures_core::stream::BoxStream;
use futures_util::{FutureExt, StreamExt, future::join_all};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_stream::wrappers::BroadcastStream;

/// 默认并发上限
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 100;

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_tap_capacity() -> usize {
    1024
}

/// 并发总线配置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 同时执行的处理器上限
    pub concurrency_limit: usize,
    /// 事件观察流的缓冲容量
    pub tap_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            tap_capacity: default_tap_capacity(),
        }
    }
}

struct Gate {
    limit: usize,
    semaphore: Arc<Semaphore>,
    /// 调小上限时尚未回收的许可数
    debt: Arc<AtomicUsize>,
}

impl Gate {
    fn clamp(limit: usize) -> usize {
        limit.clamp(1, Semaphore::MAX_PERMITS)
    }

    fn new(limit: usize) -> Self {
        let limit = Self::clamp(limit);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
            debt: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn resize(&mut self, limit: usize) {
        let limit = Self::clamp(limit);
        if limit > self.limit {
            let grow = limit - self.limit;
            let repaid = take_debt(&self.debt, grow);
            self.semaphore.add_permits(grow - repaid);
        } else if limit < self.limit {
            let shrink = self.limit - limit;
            let forgotten = self.semaphore.forget_permits(shrink);
            self.debt.fetch_add(shrink - forgotten, Ordering::SeqCst);
        }
        self.limit = limit;
    }
}

/// 从欠额中扣除至多 `n`，返回实际扣除数
fn take_debt(debt: &AtomicUsize, n: usize) -> usize {
    let prev = debt
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some(d.saturating_sub(n)))
        .unwrap_or_else(|d| d);
    prev.min(n)
}

/// 归还许可；有欠额时销毁许可以完成缩容
fn release(permit: OwnedSemaphorePermit, debt: &AtomicUsize) {
    if take_debt(debt, 1) == 1 {
        permit.forget();
    }
}

/// 并发事件总线
pub struct ConcurrentEventBus {
    registry: HandlerRegistry,
    middleware: RwLock<Vec<Middleware>>,
    gate: RwLock<Gate>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    tap: broadcast::Sender<Event>,
}

impl Default for ConcurrentEventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl ConcurrentEventBus {
    pub fn new(config: BusConfig) -> Self {
        let (tap, _rx) = broadcast::channel(config.tap_capacity.max(1));
        Self {
            registry: HandlerRegistry::new(),
            middleware: RwLock::new(Vec::new()),
            gate: RwLock::new(Gate::new(config.concurrency_limit)),
            dead_letters: None,
            tap,
        }
    }

    pub fn with_dead_letters(config: BusConfig, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        Self {
            dead_letters: Some(dead_letters),
            ..Self::new(config)
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// 设置并发上限（最小为 1），执行中的发布同样受新上限约束
    pub fn set_concurrency_limit(&self, limit: usize) {
        let mut gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        gate.resize(limit);
        tracing::debug!(limit = gate.limit, "concurrency limit updated");
    }

    pub fn concurrency_limit(&self) -> usize {
        self.gate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .limit
    }

    fn permits(&self) -> (Arc<Semaphore>, Arc<AtomicUsize>) {
        let gate = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        (gate.semaphore.clone(), gate.debt.clone())
    }

    /// 注册处理器（同步或异步），在并发总线上均作为独立任务执行
    pub fn register_handler(
        &self,
        handler: RegisteredHandler,
        event_types: Option<Vec<String>>,
    ) -> DomainResult<()> {
        self.registry.register(handler, event_types)
    }

    pub fn register_async_handler(
        &self,
        handler: Arc<dyn AsyncEventHandler>,
        event_types: Option<Vec<String>>,
    ) -> DomainResult<()> {
        self.register_handler(RegisteredHandler::Concurrent(handler), event_types)
    }

    pub fn register_sync_handler(
        &self,
        handler: Arc<dyn EventHandler>,
        event_types: Option<Vec<String>>,
    ) -> DomainResult<()> {
        self.register_handler(RegisteredHandler::Sync(handler), event_types)
    }

    pub fn unregister_handler(&self, handler_name: &str) -> DomainResult<bool> {
        Ok(self.registry.unregister(handler_name)? > 0)
    }

    pub fn add_middleware(&self, middleware: Middleware) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    pub fn add_sync_middleware<F>(&self, f: F)
    where
        F: Fn(Event) -> MiddlewareResult + Send + Sync + 'static,
    {
        self.add_middleware(Middleware::sync(f));
    }

    pub fn clear_middleware(&self) {
        self.middleware
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// 订阅通过中间件的事件流
    pub fn subscribe(&self) -> BoxStream<'static, DomainResult<Event>> {
        let rx = self.tap.subscribe();
        let stream =
            BroadcastStream::new(rx).map(|r| r.map_err(|e| DomainError::event_bus(e.to_string())));
        Box::pin(stream)
    }

    /// 发布事件，等待所有匹配的处理器结束
    pub async fn publish(&self, event: Event) -> DomainResult<()> {
        let original = event.clone();
        match self.dispatch(event).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(
                    event_id = %original.id(),
                    event_type = %original.event_type(),
                    error = %format!("{err:#}"),
                    "concurrent event bus failure"
                );
                let reason = format!("{err:#}");
                self.record_failures(&original, vec![FailedInvocation::new(BUS_ORIGIN, err)]);
                Err(DomainError::event_bus(reason))
            }
        }
    }

    /// 并发发布多条事件，返回发布失败的事件数
    pub async fn publish_batch(&self, events: Vec<Event>) -> usize {
        let total = events.len();
        let results = join_all(events.into_iter().map(|event| self.publish(event))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();

        if failed > 0 {
            tracing::warn!(total, failed, "batch publish finished with failures");
        } else {
            tracing::debug!(total, "batch publish finished");
        }
        failed
    }

    async fn dispatch(&self, event: Event) -> anyhow::Result<()> {
        let chain = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut current = event;
        for step in &chain {
            match step.run(current).await? {
                Some(next) => current = next,
                None => {
                    tracing::debug!("event dropped by middleware");
                    return Ok(());
                }
            }
        }
        let event = current;

        let _ = self.tap.send(event.clone());

        let handlers = self.registry.resolve(&event)?;
        if handlers.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            event_id = %event.id(),
            event_type = %event.event_type(),
            handlers = handlers.len(),
            "dispatching event concurrently"
        );

        let (semaphore, debt) = self.permits();
        let event = Arc::new(event);
        let mut tasks = JoinSet::new();
        for handler in handlers {
            let semaphore = semaphore.clone();
            let debt = debt.clone();
            let event = event.clone();
            tasks.spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(closed) => {
                        return Some(FailedInvocation::new(handler.handler_name(), closed.into()));
                    }
                };
                let outcome = execute_handler(handler, event).await;
                release(permit, &debt);
                outcome
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(failure)) => {
                    tracing::warn!(
                        event_id = %event.id(),
                        handler = %failure.handler_name,
                        error = %failure.error,
                        "event handler failed"
                    );
                    failures.push(failure);
                }
                Ok(None) => {}
                Err(join_err) => {
                    tracing::error!(error = %join_err, "handler task aborted");
                }
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

/// 执行单个处理器并捕获失败（含 panic）；同步处理器卸载到阻塞线程池
pub async fn execute_handler(
    handler: RegisteredHandler,
    event: Arc<Event>,
) -> Option<FailedInvocation> {
    match handler {
        RegisteredHandler::Sync(h) => {
            let name = h.handler_name().to_string();
            let blocking = tokio::task::spawn_blocking(move || h.handle(&event));
            match blocking.await {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(FailedInvocation::new(name, error)),
                Err(join_err) => match join_err.try_into_panic() {
                    Ok(payload) => Some(FailedInvocation::panicked(name, payload.as_ref())),
                    Err(join_err) => Some(FailedInvocation::new(name, join_err.into())),
                },
            }
        }
        RegisteredHandler::Concurrent(h) => {
            let outcome = AssertUnwindSafe(h.handle(&event)).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => None,
                Ok(Err(error)) => Some(FailedInvocation::new(h.handler_name(), error)),
                Err(payload) => Some(FailedInvocation::panicked(
                    h.handler_name(),
                    payload.as_ref(),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain_event::Payload;
    use crate::eventing::dead_letter::{DeadLetterConfig, DeadLetterQueue, FailedEventFilter};
    use crate::eventing::failure::FailureReason;
    use crate::eventing::handler::{AsyncFnHandler, FnHandler, HandledEventType};
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn bus_with_queue(limit: usize) -> (ConcurrentEventBus, Arc<DeadLetterQueue>) {
        let dlq = Arc::new(DeadLetterQueue::new(DeadLetterConfig::default()));
        let config = BusConfig {
            concurrency_limit: limit,
            ..BusConfig::default()
        };
        (ConcurrentEventBus::with_dead_letters(config, dlq.clone()), dlq)
    }

    fn one(t: &str) -> HandledEventType {
        HandledEventType::One(t.into())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn in_flight_handlers_never_exceed_limit() {
        let (bus, dlq) = bus_with_queue(DEFAULT_CONCURRENCY_LIMIT);
        bus.set_concurrency_limit(2);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            let done = done.clone();
            let handler = AsyncFnHandler::new(format!("sleepy-{i}"), one("tick"), move |_e| {
                let in_flight = in_flight.clone();
                let peak = peak.clone();
                let done = done.clone();
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
            bus.register_async_handler(Arc::new(handler), None).unwrap();
        }

        bus.publish(Event::new("tick", Payload::new())).await.unwrap();

        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(peak.load(Ordering::SeqCst) >= 1);
        assert!(dlq.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_and_async_failures_are_forwarded_once() {
        let (bus, dlq) = bus_with_queue(4);
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        bus.register_sync_handler(
            Arc::new(FnHandler::new("blocking-ok", one("order.placed"), move |_e| {
                std::thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
            None,
        )
        .unwrap();
        bus.register_sync_handler(
            Arc::new(FnHandler::new("blocking-bad", one("order.placed"), |_e| {
                Err(anyhow!("invalid order total"))
            })),
            None,
        )
        .unwrap();
        bus.register_async_handler(
            Arc::new(AsyncFnHandler::new("async-panic", one("order.placed"), |_e| async {
                panic!("async boom")
            })),
            None,
        )
        .unwrap();

        bus.publish(Event::new("order.placed", Payload::new()))
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let failed = dlq.failed_events(&FailedEventFilter::default());
        assert_eq!(failed.len(), 2);

        let bad = dlq.failed_events(&FailedEventFilter::builder().handler_name("blocking-bad").build());
        assert_eq!(bad[0].failure_reason(), FailureReason::ValidationError);
        let panicked =
            dlq.failed_events(&FailedEventFilter::builder().handler_name("async-panic").build());
        assert_eq!(panicked[0].failure_reason(), FailureReason::UnknownError);
    }

    #[tokio::test]
    async fn async_middleware_runs_before_handlers() {
        let (bus, _dlq) = bus_with_queue(2);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.register_async_handler(
            Arc::new(AsyncFnHandler::new("count", HandledEventType::All, move |e| {
                let counter = counter.clone();
                async move {
                    anyhow::ensure!(e.metadata().user_id() == Some("u-9"), "user missing");
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })),
            None,
        )
        .unwrap();
        bus.add_middleware(Middleware::from_async(|e: Event| async move {
            let patch = crate::domain_event::MetadataPatch::builder()
                .user_id("u-9")
                .build();
            Ok(Some(e.with_metadata(patch)))
        }));
        bus.add_sync_middleware(|e: Event| Ok((e.event_type() != "ignored").then_some(e)));

        bus.publish(Event::new("kept", Payload::new())).await.unwrap();
        bus.publish(Event::new("ignored", Payload::new())).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_counts_failed_publishes() {
        let (bus, dlq) = bus_with_queue(8);
        bus.add_sync_middleware(|e: Event| {
            anyhow::ensure!(e.event_type() != "poison", "middleware rejected event");
            Ok(Some(e))
        });
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.register_async_handler(
            Arc::new(AsyncFnHandler::new("count", HandledEventType::All, move |_e| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })),
            None,
        )
        .unwrap();

        let events = vec![
            Event::new("a", Payload::new()),
            Event::new("poison", Payload::new()),
            Event::new("b", Payload::new()),
        ];
        assert_eq!(bus.publish_batch(events).await, 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        let failed = dlq.failed_events(&FailedEventFilter::default());
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].handler_name(), BUS_ORIGIN);
    }

    #[tokio::test]
    async fn subscribers_observe_published_events() {
        let bus = ConcurrentEventBus::default();
        let mut stream = bus.subscribe();

        bus.publish(Event::new("observed", Payload::new()))
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(got.event_type(), "observed");
    }

    #[test]
    fn concurrency_limit_is_clamped() {
        let bus = ConcurrentEventBus::default();
        assert_eq!(bus.concurrency_limit(), DEFAULT_CONCURRENCY_LIMIT);
        bus.set_concurrency_limit(0);
        assert_eq!(bus.concurrency_limit(), 1);
    }

    #[test]
    fn resizing_reuses_the_same_permits() {
        let mut gate = Gate::new(4);
        let held: Vec<_> = (0..3)
            .map(|_| gate.semaphore.clone().try_acquire_owned().unwrap())
            .collect();

        // 只有 1 个空闲许可可回收，其余 2 个记为欠额
        gate.resize(1);
        assert_eq!(gate.semaphore.available_permits(), 0);
        assert_eq!(gate.debt.load(Ordering::SeqCst), 2);

        let mut held = held.into_iter();
        for permit in held.by_ref().take(2) {
            release(permit, &gate.debt);
        }
        assert_eq!(gate.debt.load(Ordering::SeqCst), 0);
        assert_eq!(gate.semaphore.available_permits(), 0);
        for permit in held {
            release(permit, &gate.debt);
        }
        assert_eq!(gate.semaphore.available_permits(), 1);

        gate.resize(3);
        assert_eq!(gate.semaphore.available_permits(), 3);
    }
}

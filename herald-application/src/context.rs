//! 进程级上下文（HeraldContext）
//!
//! 一次性构建并持有事件系统的全部组件，由调用方显式传递，不使用全局单例：
//! 时钟 → 死信队列 → 分发门面（两条总线）→ 事件存储 → 事件溯源。
//!
//! ```rust
//! use herald_application::{HeraldConfig, HeraldContext};
//!
//! let ctx = HeraldContext::init(HeraldConfig::default());
//! assert_eq!(ctx.dispatcher().subscription_count(None), 0);
//! assert!(ctx.dead_letters().is_empty());
//! ```
use crate::config::HeraldConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::AppResult;
use crate::retry::{DeadLetterRetrier, RetryHandle};
use bon::bon;
use herald_domain::clock::{Clock, system_clock};
use herald_domain::eventing::DeadLetterQueue;
use herald_domain::persist::{
    EventSourcing, EventStorageBackend, EventStore, InMemoryEventBackend, InMemorySnapshotStore,
    SnapshotStore,
};
use std::sync::Arc;

pub struct HeraldContext {
    config: HeraldConfig,
    clock: Arc<dyn Clock>,
    dead_letters: Arc<DeadLetterQueue>,
    dispatcher: Arc<EventDispatcher>,
    event_store: Arc<EventStore>,
    event_sourcing: Arc<EventSourcing>,
}

#[bon]
impl HeraldContext {
    /// 构建上下文；未提供的组件使用内存实现与系统时钟
    #[builder]
    pub fn new(
        #[builder(default)] config: HeraldConfig,
        clock: Option<Arc<dyn Clock>>,
        backend: Option<Arc<dyn EventStorageBackend>>,
        snapshot_store: Option<Arc<dyn SnapshotStore>>,
    ) -> Self {
        let clock = clock.unwrap_or_else(system_clock);

        let dead_letters = Arc::new(DeadLetterQueue::with_clock(
            config.dead_letter.clone(),
            clock.clone(),
        ));
        let dispatcher = Arc::new(EventDispatcher::with_dead_letters(
            config.bus,
            dead_letters.clone(),
        ));

        let backend = backend.unwrap_or_else(|| Arc::new(InMemoryEventBackend::new()));
        let event_store = Arc::new(EventStore::new(backend));
        let snapshot_store =
            snapshot_store.unwrap_or_else(|| Arc::new(InMemorySnapshotStore::new()));
        let event_sourcing = Arc::new(
            EventSourcing::builder()
                .event_store(event_store.clone())
                .snapshot_store(snapshot_store)
                .snapshot_policy(config.snapshot_policy)
                .clock(clock.clone())
                .build(),
        );

        tracing::info!(
            concurrency_limit = config.bus.concurrency_limit,
            max_retries = config.dead_letter.max_retries,
            snapshot_policy = ?config.snapshot_policy,
            "herald context initialised"
        );

        Self {
            config,
            clock,
            dead_letters,
            dispatcher,
            event_store,
            event_sourcing,
        }
    }
}

impl HeraldContext {
    pub fn init(config: HeraldConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &HeraldConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterQueue> {
        &self.dead_letters
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.event_store
    }

    pub fn event_sourcing(&self) -> &Arc<EventSourcing> {
        &self.event_sourcing
    }

    pub fn retrier(&self) -> DeadLetterRetrier {
        DeadLetterRetrier::new(self.dead_letters.clone(), self.dispatcher.clone())
    }

    /// 按 `config.retry.interval` 启动后台死信重试
    pub fn start_retry_worker(&self) -> RetryHandle {
        Arc::new(self.retrier()).start(self.config.retry.interval())
    }

    /// 清空订阅、中间件与死信；事件存储保持不变
    pub fn reset(&self) -> AppResult<()> {
        let subscriptions = self.dispatcher.clear_subscriptions()?;
        self.dispatcher.clear_middleware();
        let dead_letters = self.dead_letters.clear();
        tracing::info!(subscriptions, dead_letters, "herald context reset");
        Ok(())
    }
}

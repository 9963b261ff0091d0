//! 死信队列（DeadLetterQueue）
//!
//! 记录处理失败的 (事件, 处理器, 错误)，归类失败原因并按指数退避安排重试：
//! - `next_retry_at = now + 2^retry_count 分钟`，在创建与每次 `mark_retry_attempted` 后重新计算；
//! - `retry_count >= max_retries` 后 `next_retry_at` 恒为 `None`；
//! - 每次 `add` 时清理：先丢弃超出保留期的条目，再按容量上限淘汰最旧条目。
//!
//! 队列本身不执行重试，由调用方取出 `retry_ready_events` 自行重放。
//!
use super::failure::{FailedInvocation, FailureReason, classify};
use crate::clock::{Clock, system_clock};
use crate::domain_event::Event;
use bon::Builder;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// 退避指数上限，避免溢出
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// 第 `retry_count` 次重试前的等待时长
pub fn retry_backoff(retry_count: u32) -> Duration {
    Duration::minutes(1_i64 << retry_count.min(MAX_BACKOFF_EXPONENT))
}

/// 失败事件
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedEvent {
    failure_id: String,
    event: Event,
    failure_reason: FailureReason,
    error_message: String,
    handler_name: String,
    failed_at: DateTime<Utc>,
    retry_count: u32,
    max_retries: u32,
    next_retry_at: Option<DateTime<Utc>>,
}

impl FailedEvent {
    pub fn new(
        event: Event,
        failure_reason: FailureReason,
        error_message: impl Into<String>,
        handler_name: impl Into<String>,
        failed_at: DateTime<Utc>,
        max_retries: u32,
    ) -> Self {
        let mut failed = Self {
            failure_id: Uuid::new_v4().to_string(),
            event,
            failure_reason,
            error_message: error_message.into(),
            handler_name: handler_name.into(),
            failed_at,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
        };
        failed.schedule(failed_at);
        failed
    }

    fn schedule(&mut self, now: DateTime<Utc>) {
        self.next_retry_at = if self.is_exhausted() {
            None
        } else {
            Some(now + retry_backoff(self.retry_count))
        };
    }

    /// 记录一次失败的重试并重新安排
    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.schedule(now);
    }

    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_exhausted() && self.next_retry_at.is_some_and(|at| at <= now)
    }

    pub fn failure_id(&self) -> &str {
        &self.failure_id
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    pub fn failure_reason(&self) -> FailureReason {
        self.failure_reason
    }

    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    pub fn handler_name(&self) -> &str {
        &self.handler_name
    }

    pub fn failed_at(&self) -> DateTime<Utc> {
        self.failed_at
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retention_days() -> i64 {
    30
}

fn default_max_queue_size() -> usize {
    10_000
}

/// 死信队列配置
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// 默认最大重试次数
    #[builder(default = default_max_retries())]
    pub max_retries: u32,
    /// 保留天数
    #[builder(default = default_retention_days())]
    pub retention_days: i64,
    /// 队列容量上限
    #[builder(default = default_max_queue_size())]
    pub max_queue_size: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl DeadLetterConfig {
    /// 保留时长；负数或超出时间范围时为 `None`（不按时间清理）
    pub fn retention(&self) -> Option<Duration> {
        (self.retention_days >= 0)
            .then(|| Duration::try_days(self.retention_days))
            .flatten()
    }
}

/// 查询过滤条件
#[derive(Builder, Clone, Debug, Default)]
pub struct FailedEventFilter {
    #[builder(into)]
    pub handler_name: Option<String>,
    pub failure_reason: Option<FailureReason>,
    #[builder(into)]
    pub event_type: Option<String>,
    #[builder(default)]
    pub retry_ready_only: bool,
    pub limit: Option<usize>,
}

impl FailedEventFilter {
    fn matches(&self, failed: &FailedEvent, now: DateTime<Utc>) -> bool {
        self.handler_name
            .as_deref()
            .is_none_or(|h| failed.handler_name == h)
            && self.failure_reason.is_none_or(|r| failed.failure_reason == r)
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| failed.event.event_type() == t)
            && (!self.retry_ready_only || failed.is_retry_due(now))
    }
}

/// 统计信息
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeadLetterStats {
    pub total: usize,
    pub by_reason: BTreeMap<FailureReason, usize>,
    pub by_handler: BTreeMap<String, usize>,
    pub retry_ready: usize,
    pub exhausted: usize,
}

/// 总线侧看到的死信接收端
pub trait DeadLetterSink: Send + Sync {
    fn record(&self, event: &Event, failures: Vec<FailedInvocation>);
}

impl<T: DeadLetterSink + ?Sized> DeadLetterSink for Arc<T> {
    fn record(&self, event: &Event, failures: Vec<FailedInvocation>) {
        (**self).record(event, failures)
    }
}

/// 死信队列：按 `failed_at` 升序保存
pub struct DeadLetterQueue {
    config: DeadLetterConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<VecDeque<FailedEvent>>,
}

impl Default for DeadLetterQueue {
    fn default() -> Self {
        Self::new(DeadLetterConfig::default())
    }
}

impl DeadLetterQueue {
    pub fn new(config: DeadLetterConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: DeadLetterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &DeadLetterConfig {
        &self.config
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<FailedEvent>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 将每个失败调用记为一条失败事件，返回新增条目
    pub fn add(
        &self,
        event: &Event,
        failures: &[FailedInvocation],
        max_retries: Option<u32>,
    ) -> Vec<FailedEvent> {
        let now = self.clock.now();
        let max_retries = max_retries.unwrap_or(self.config.max_retries);

        let added: Vec<FailedEvent> = failures
            .iter()
            .map(|failure| {
                let reason = classify(&failure.error);
                tracing::warn!(
                    event_id = %event.id(),
                    event_type = %event.event_type(),
                    handler = %failure.handler_name,
                    reason = %reason,
                    error = %failure.error,
                    "event moved to dead-letter queue"
                );
                FailedEvent::new(
                    event.clone(),
                    reason,
                    format!("{:#}", failure.error),
                    failure.handler_name.clone(),
                    now,
                    max_retries,
                )
            })
            .collect();

        let mut entries = self.entries();
        for failed in &added {
            let at = entries.partition_point(|e| e.failed_at <= failed.failed_at);
            entries.insert(at, failed.clone());
        }
        self.housekeep(&mut entries, now);

        added
    }

    fn housekeep(&self, entries: &mut VecDeque<FailedEvent>, now: DateTime<Utc>) {
        let cutoff = self
            .config
            .retention()
            .and_then(|retention| now.checked_sub_signed(retention));
        let before = entries.len();
        if let Some(cutoff) = cutoff {
            entries.retain(|e| e.failed_at >= cutoff);
        }
        let expired = before - entries.len();

        let mut evicted = 0;
        while entries.len() > self.config.max_queue_size {
            entries.pop_front();
            evicted += 1;
        }

        if expired > 0 || evicted > 0 {
            tracing::debug!(expired, evicted, remaining = entries.len(), "dead-letter housekeeping");
        }
    }

    /// 当前到期可重试的条目（按失败时间升序）
    pub fn retry_ready_events(&self) -> Vec<FailedEvent> {
        let now = self.clock.now();
        self.entries()
            .iter()
            .filter(|e| e.is_retry_due(now))
            .cloned()
            .collect()
    }

    /// 记录一次失败的重试：`retry_count + 1` 并重新计算 `next_retry_at`
    pub fn mark_retry_attempted(&self, failure_id: &str) -> Option<FailedEvent> {
        let now = self.clock.now();
        let mut entries = self.entries();
        let failed = entries.iter_mut().find(|e| e.failure_id == failure_id)?;
        failed.record_attempt(now);
        if failed.is_exhausted() {
            tracing::warn!(
                failure_id,
                handler = %failed.handler_name,
                retries = failed.retry_count,
                "dead-letter retries exhausted"
            );
        }
        Some(failed.clone())
    }

    /// 重试成功：移除该条目
    pub fn mark_retry_successful(&self, failure_id: &str) -> bool {
        let mut entries = self.entries();
        match entries.iter().position(|e| e.failure_id == failure_id) {
            Some(at) => {
                entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// 按条件查询，最新的在前
    pub fn failed_events(&self, filter: &FailedEventFilter) -> Vec<FailedEvent> {
        let now = self.clock.now();
        let entries = self.entries();
        let matched = entries.iter().rev().filter(|e| filter.matches(e, now));
        match filter.limit {
            Some(limit) => matched.take(limit).cloned().collect(),
            None => matched.cloned().collect(),
        }
    }

    pub fn get(&self, failure_id: &str) -> Option<FailedEvent> {
        self.entries()
            .iter()
            .find(|e| e.failure_id == failure_id)
            .cloned()
    }

    /// 移除某事件的全部失败条目
    pub fn remove_event(&self, event_id: &str) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|e| e.event.id() != event_id);
        entries.len() != before
    }

    /// 清空队列，返回移除的条目数
    pub fn clear(&self) -> usize {
        let mut entries = self.entries();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn stats(&self) -> DeadLetterStats {
        let now = self.clock.now();
        let entries = self.entries();

        let mut stats = DeadLetterStats {
            total: entries.len(),
            ..Default::default()
        };
        for e in entries.iter() {
            *stats.by_reason.entry(e.failure_reason).or_default() += 1;
            *stats.by_handler.entry(e.handler_name.clone()).or_default() += 1;
            if e.is_retry_due(now) {
                stats.retry_ready += 1;
            }
            if e.is_exhausted() {
                stats.exhausted += 1;
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterSink for DeadLetterQueue {
    fn record(&self, event: &Event, failures: Vec<FailedInvocation>) {
        self.add(event, &failures, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain_event::Payload;
    use anyhow::anyhow;

    fn queue(config: DeadLetterConfig) -> (DeadLetterQueue, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let dlq = DeadLetterQueue::with_clock(config, Arc::new(clock.clone()));
        (dlq, clock)
    }

    fn failure(handler: &str, message: &str) -> FailedInvocation {
        FailedInvocation::new(handler, anyhow!(message.to_string()))
    }

    #[test]
    fn backoff_doubles_until_exhausted() {
        let (dlq, _clock) = queue(DeadLetterConfig::default());
        let event = Event::new("user.registered", Payload::new());
        let added = dlq.add(&event, &[failure("analytics", "db down")], None);
        let id = added[0].failure_id().to_string();

        let first = &added[0];
        assert_eq!(first.retry_count(), 0);
        assert_eq!(first.max_retries(), 3);
        assert_eq!(
            first.next_retry_at().map(|at| at - first.failed_at()),
            Some(Duration::minutes(1))
        );

        for k in 1..3 {
            let failed = dlq.mark_retry_attempted(&id).unwrap();
            assert_eq!(failed.retry_count(), k);
            assert_eq!(
                failed.next_retry_at().map(|at| at - failed.failed_at()),
                Some(Duration::minutes(1 << k))
            );
        }

        let exhausted = dlq.mark_retry_attempted(&id).unwrap();
        assert_eq!(exhausted.retry_count(), 3);
        assert!(exhausted.next_retry_at().is_none());
        assert!(!exhausted.is_retry_due(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn exhausted_entries_never_become_ready() {
        let (dlq, clock) = queue(DeadLetterConfig::builder().max_retries(2).build());
        let event = Event::new("e", Payload::new());
        let id = dlq.add(&event, &[failure("h", "boom")], None)[0]
            .failure_id()
            .to_string();

        assert!(dlq.retry_ready_events().is_empty());
        clock.advance(Duration::minutes(1));
        assert_eq!(dlq.retry_ready_events().len(), 1);

        dlq.mark_retry_attempted(&id);
        dlq.mark_retry_attempted(&id);
        clock.advance(Duration::days(1));
        assert!(dlq.retry_ready_events().is_empty());
        assert_eq!(dlq.stats().exhausted, 1);
    }

    #[test]
    fn per_call_max_retries_overrides_config() {
        let (dlq, _clock) = queue(DeadLetterConfig::default());
        let event = Event::new("e", Payload::new());
        let added = dlq.add(&event, &[failure("h", "boom")], Some(0));
        assert!(added[0].is_exhausted());
        assert!(added[0].next_retry_at().is_none());
    }

    #[test]
    fn unbounded_retention_keeps_entries() {
        let config = DeadLetterConfig::builder()
            .retention_days(1_000_000_000)
            .build();
        assert!(config.retention().is_none());
        let (dlq, clock) = queue(config);

        let event = Event::new("old", Payload::new());
        dlq.add(&event, &[failure("h", "boom")], None);
        clock.advance(Duration::days(3650));
        dlq.add(&event, &[failure("h", "boom")], None);
        assert_eq!(dlq.len(), 2);
    }

    #[test]
    fn housekeeping_drops_expired_then_oldest() {
        let config = DeadLetterConfig::builder()
            .retention_days(1)
            .max_queue_size(2)
            .build();
        let (dlq, clock) = queue(config);

        let stale = Event::new("stale", Payload::new());
        dlq.add(&stale, &[failure("h", "boom")], None);
        clock.advance(Duration::days(2));

        let events: Vec<Event> = (0..3)
            .map(|i| Event::new(format!("e{i}"), Payload::new()))
            .collect();
        for event in &events {
            clock.advance(Duration::seconds(1));
            dlq.add(event, &[failure("h", "boom")], None);
        }

        let remaining: Vec<String> = dlq
            .failed_events(&FailedEventFilter::default())
            .iter()
            .map(|f| f.event().event_type().to_string())
            .collect();
        assert_eq!(remaining, vec!["e2", "e1"]);
    }

    #[test]
    fn filters_stats_and_removal() {
        let (dlq, clock) = queue(DeadLetterConfig::default());
        let a = Event::new("a", Payload::new());
        let b = Event::new("b", Payload::new());
        dlq.add(
            &a,
            &[failure("h1", "connection reset"), failure("h2", "invalid input")],
            None,
        );
        clock.advance(Duration::seconds(5));
        dlq.add(&b, &[failure("h1", "request timed out")], None);

        let h1 = dlq.failed_events(&FailedEventFilter::builder().handler_name("h1").build());
        assert_eq!(h1.len(), 2);
        assert_eq!(h1[0].event().event_type(), "b");

        let limited = dlq.failed_events(&FailedEventFilter::builder().limit(1).build());
        assert_eq!(limited.len(), 1);

        let by_type = dlq.failed_events(&FailedEventFilter::builder().event_type("a").build());
        assert_eq!(by_type.len(), 2);

        let stats = dlq.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_handler.get("h1"), Some(&2));
        assert_eq!(
            stats.by_reason.get(&FailureReason::InfrastructureError),
            Some(&1)
        );
        assert_eq!(stats.by_reason.get(&FailureReason::ValidationError), Some(&1));
        assert_eq!(stats.by_reason.get(&FailureReason::Timeout), Some(&1));
        assert_eq!(stats.retry_ready, 0);

        assert!(dlq.remove_event(a.id()));
        assert!(!dlq.remove_event(a.id()));
        assert_eq!(dlq.len(), 1);

        let id = dlq.failed_events(&FailedEventFilter::default())[0]
            .failure_id()
            .to_string();
        assert!(dlq.mark_retry_successful(&id));
        assert!(!dlq.mark_retry_successful(&id));
        assert_eq!(dlq.clear(), 0);
    }

    #[test]
    fn failed_event_serializes_with_reason_name() {
        let (dlq, _clock) = queue(DeadLetterConfig::default());
        let event = Event::new("e", Payload::new());
        let failed = dlq.add(&event, &[failure("analytics", "db down")], None);
        let json = serde_json::to_value(&failed[0]).unwrap();
        assert_eq!(json["failure_reason"], "InfrastructureError");
        assert_eq!(json["handler_name"], "analytics");
        assert_eq!(json["retry_count"], 0);
    }
}

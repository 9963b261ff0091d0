//! 死信重试（DeadLetterRetrier）
//!
//! 取出到期可重试的失败事件，只重新调用当初失败的那个处理器：
//! - 成功 → `mark_retry_successful`，条目移出队列；
//! - 失败或处理器已不存在 → `mark_retry_attempted`，按退避重新安排，达到上限后不再重试。
//!
//! `start` 以固定间隔在后台运行，返回可关闭/等待的 `RetryHandle`。
//!
use crate::dispatcher::EventDispatcher;
use herald_domain::eventing::{DeadLetterQueue, FailedEvent, execute_handler};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// 单轮重试结果
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RetryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 找不到处理器的条目（同样计为一次失败的尝试）
    pub missing_handler: usize,
}

pub struct DeadLetterRetrier {
    dead_letters: Arc<DeadLetterQueue>,
    dispatcher: Arc<EventDispatcher>,
}

impl DeadLetterRetrier {
    pub fn new(dead_letters: Arc<DeadLetterQueue>, dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            dead_letters,
            dispatcher,
        }
    }

    /// 执行一轮重试
    pub async fn retry_ready(&self) -> RetryReport {
        let mut report = RetryReport::default();

        for failed in self.dead_letters.retry_ready_events() {
            report.attempted += 1;
            match self.retry_one(&failed).await {
                RetryOutcome::Succeeded => report.succeeded += 1,
                RetryOutcome::Failed => report.failed += 1,
                RetryOutcome::MissingHandler => report.missing_handler += 1,
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                failed = report.failed,
                missing_handler = report.missing_handler,
                "dead-letter retry round finished"
            );
        }
        report
    }

    async fn retry_one(&self, failed: &FailedEvent) -> RetryOutcome {
        let Some(handler) = self.dispatcher.find_handler(failed.handler_name()) else {
            tracing::warn!(
                failure_id = failed.failure_id(),
                handler = failed.handler_name(),
                "no handler registered for dead-letter retry"
            );
            self.dead_letters.mark_retry_attempted(failed.failure_id());
            return RetryOutcome::MissingHandler;
        };

        match execute_handler(handler, Arc::new(failed.event().clone())).await {
            None => {
                tracing::info!(
                    failure_id = failed.failure_id(),
                    handler = failed.handler_name(),
                    retry = failed.retry_count() + 1,
                    "dead-letter retry succeeded"
                );
                self.dead_letters.mark_retry_successful(failed.failure_id());
                RetryOutcome::Succeeded
            }
            Some(failure) => {
                tracing::warn!(
                    failure_id = failed.failure_id(),
                    handler = failed.handler_name(),
                    retry = failed.retry_count() + 1,
                    error = %failure.error,
                    "dead-letter retry failed"
                );
                self.dead_letters.mark_retry_attempted(failed.failure_id());
                RetryOutcome::Failed
            }
        }
    }

    /// 在后台按 `interval` 周期执行重试
    pub fn start(self: Arc<Self>, interval: Duration) -> RetryHandle {
        let token = CancellationToken::new();
        let child = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        self.retry_ready().await;
                    }
                }
            }
            tracing::debug!("dead-letter retry worker stopped");
        });

        RetryHandle {
            token,
            task: Some(task),
        }
    }
}

enum RetryOutcome {
    Succeeded,
    Failed,
    MissingHandler,
}

/// 后台重试任务句柄；丢弃时自动关闭
pub struct RetryHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RetryHandle {
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待后台任务退出（需先 `shutdown`）
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RetryHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

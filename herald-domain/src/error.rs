//! 领域层统一错误定义
//!
//! 聚焦序列化、事件系统、事件存储与溯源、状态校验等最小必要集合，
//! 便于在各实现层统一转换为 `DomainError`。
//!
use thiserror::Error;

/// 统一错误类型（基础库最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum DomainError {
    // --- 序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },
    #[error("type mismatch: expected={expected}, found={found}")]
    TypeMismatch { expected: String, found: String },

    // --- 事件系统 ---
    #[error("event bus error: {reason}")]
    EventBus { reason: String },
    #[error("event handler error: handler={handler}, reason={reason}")]
    EventHandler { handler: String, reason: String },

    // --- 事件存储/溯源 ---
    #[error("event store error: operation={operation}, reason={reason}")]
    EventStore {
        operation: &'static str,
        reason: String,
    },
    #[error("snapshot store error: {reason}")]
    SnapshotStore { reason: String },
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },
    #[error("unknown aggregate type: {aggregate_type}")]
    UnknownAggregateType { aggregate_type: String },
    #[error("concurrency conflict: aggregate={aggregate_id}, expected={expected}, actual={actual}")]
    Concurrency {
        aggregate_id: String,
        expected: usize,
        actual: usize,
    },

    // --- 状态校验 ---
    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
    #[error("not found: {reason}")]
    NotFound { reason: String },
}

impl DomainError {
    pub fn event_bus(reason: impl Into<String>) -> Self {
        Self::EventBus {
            reason: reason.into(),
        }
    }

    pub fn event_store(operation: &'static str, reason: impl ToString) -> Self {
        Self::EventStore {
            operation,
            reason: reason.to_string(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// 是否为乐观并发冲突
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

/// 统一 Result 类型别名
pub type DomainResult<T> = Result<T, DomainError>;

//! 处理失败的记录与分类
//!
//! 处理器返回 `anyhow::Error`，死信队列据此归类失败原因：
//! 1. 处理器通过 `HandlerFailure` 显式声明的原因优先；
//! 2. 其次按错误链中的已知类型（`serde_json::Error`、`std::io::Error`、超时）判定；
//! 3. 最后按错误文本的关键词启发式归类。
//!
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::io;
use thiserror::Error;

/// 总线自身故障（中间件/注册表）在死信队列中使用的合成处理器名
pub const BUS_ORIGIN: &str = "bus";

/// 失败原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FailureReason {
    HandlerError,
    Timeout,
    SerializationError,
    InfrastructureError,
    ValidationError,
    UnknownError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HandlerError => "HandlerError",
            Self::Timeout => "Timeout",
            Self::SerializationError => "SerializationError",
            Self::InfrastructureError => "InfrastructureError",
            Self::ValidationError => "ValidationError",
            Self::UnknownError => "UnknownError",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 带显式失败原因的处理器错误
///
/// ```
/// use herald_domain::eventing::{FailureReason, HandlerFailure};
///
/// let err: anyhow::Error = HandlerFailure::new(FailureReason::ValidationError, "missing email").into();
/// assert_eq!(herald_domain::eventing::classify(&err), FailureReason::ValidationError);
/// ```
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerFailure {
    reason: FailureReason,
    message: String,
}

impl HandlerFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn reason(&self) -> FailureReason {
        self.reason
    }
}

/// 一次失败的处理器调用
#[derive(Debug)]
pub struct FailedInvocation {
    pub handler_name: String,
    pub error: anyhow::Error,
}

impl FailedInvocation {
    pub fn new(handler_name: impl Into<String>, error: anyhow::Error) -> Self {
        Self {
            handler_name: handler_name.into(),
            error,
        }
    }

    /// 处理器 panic，归类为 `UnknownError`
    pub fn panicked(handler_name: impl Into<String>, payload: &(dyn Any + Send)) -> Self {
        let message = panic_message(payload);
        Self::new(
            handler_name,
            HandlerFailure::new(
                FailureReason::UnknownError,
                format!("handler panicked: {message}"),
            )
            .into(),
        )
    }

    pub fn reason(&self) -> FailureReason {
        classify(&self.error)
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// 归类失败原因
pub fn classify(error: &anyhow::Error) -> FailureReason {
    for cause in error.chain() {
        if let Some(failure) = cause.downcast_ref::<HandlerFailure>() {
            return failure.reason();
        }
    }

    for cause in error.chain() {
        if cause.is::<tokio::time::error::Elapsed>() {
            return FailureReason::Timeout;
        }
        if cause.is::<serde_json::Error>() {
            return FailureReason::SerializationError;
        }
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return match io_err.kind() {
                io::ErrorKind::TimedOut => FailureReason::Timeout,
                io::ErrorKind::InvalidData => FailureReason::SerializationError,
                io::ErrorKind::InvalidInput => FailureReason::ValidationError,
                _ => FailureReason::InfrastructureError,
            };
        }
    }

    let text = error
        .chain()
        .map(|cause| format!("{cause} {cause:?}"))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    classify_text(&text)
}

fn classify_text(text: &str) -> FailureReason {
    const TIMEOUT: &[&str] = &["timeout", "timed out", "deadline"];
    const VALIDATION: &[&str] = &["validation", "invalid", "validate"];
    const SERIALIZATION: &[&str] = &["serializ", "json", "pickle", "serde", "decode"];
    const INFRASTRUCTURE: &[&str] = &["connection", "network", "socket", "database", "refused"];

    let has_any = |keywords: &[&str]| keywords.iter().any(|k| text.contains(k));

    if has_any(TIMEOUT) {
        FailureReason::Timeout
    } else if has_any(VALIDATION) {
        FailureReason::ValidationError
    } else if has_any(SERIALIZATION) {
        FailureReason::SerializationError
    } else if has_any(INFRASTRUCTURE) || has_word(text, "db") {
        FailureReason::InfrastructureError
    } else {
        FailureReason::HandlerError
    }
}

fn has_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == word)
}

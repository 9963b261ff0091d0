use herald_domain::error::DomainError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("config: key={key}, reason={reason}")]
    Config { key: String, reason: String },

    #[error("invalid subscription: event_type={event_type}, handler={handler}, reason={reason}")]
    InvalidSubscription {
        event_type: String,
        handler: String,
        reason: &'static str,
    },
}

pub type AppResult<T> = Result<T, AppError>;

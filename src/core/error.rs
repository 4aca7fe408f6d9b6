use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("scheduler closed")]
    SchedulerClosed,

    #[error("scheduler queue is full (capacity {0})")]
    QueueFull(usize),
}

pub type Result<T> = std::result::Result<T, MetaError>;

/// Coarse status code carried by every request-facing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ErrorCode {
    #[default]
    Success,
    InvalidArgument,
    AlreadyExists,
    NotFound,
    Unavailable,
    Canceled,
    Internal,
}

impl MetaError {
    pub fn code(&self) -> ErrorCode {
        match self {
            MetaError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            MetaError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            MetaError::NotFound(_) => ErrorCode::NotFound,
            MetaError::Unavailable(_) | MetaError::SchedulerClosed | MetaError::QueueFull(_) => {
                ErrorCode::Unavailable
            }
            MetaError::Canceled(_) => ErrorCode::Canceled,
            MetaError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the same request may succeed when retried.
    pub fn is_retryable(&self) -> bool {
        self.code() == ErrorCode::Unavailable
    }
}

impl From<rmp_serde::encode::Error> for MetaError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Internal(format!("encode: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for MetaError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Internal(format!("decode: {}", err))
    }
}

impl From<std::io::Error> for MetaError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MetaError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::Unavailable("channel closed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_errors_are_retryable_unavailable() {
        assert_eq!(MetaError::SchedulerClosed.code(), ErrorCode::Unavailable);
        assert_eq!(MetaError::QueueFull(4).code(), ErrorCode::Unavailable);
        assert!(MetaError::QueueFull(4).is_retryable());
        assert!(!MetaError::NotFound("collection 'x'".into()).is_retryable());
    }

    #[test]
    fn test_display_reason() {
        let err = MetaError::AlreadyExists("collection 'docs'".into());
        assert_eq!(err.to_string(), "collection 'docs' already exists");
    }
}

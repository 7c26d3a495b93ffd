use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Infrastructure errors for queue operations
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Cannot {action} job {id} in status {from}")]
    InvalidStateTransition {
        id: JobId,
        from: JobStatus,
        action: &'static str,
    },

    #[error("No handler for job type: {0}")]
    HandlerMissing(String),

    #[error("Handler failed: {0}")]
    HandlerException(String),

    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub(crate) fn transition(id: JobId, from: JobStatus, action: &'static str) -> Self {
        Self::InvalidStateTransition { id, from, action }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Job execution outcome - determines retry behavior
#[derive(Error, Debug, Clone)]
pub enum JobError {
    /// Retryable error - will schedule retry if attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Permanent error - fail immediately, no retry
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl JobError {
    /// Create a retryable error
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Create a permanent error
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

/// Boxed error produced by handlers that use `?` on foreign error types
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

impl From<BoxError> for JobError {
    fn from(err: BoxError) -> Self {
        Self::Retryable(err.to_string())
    }
}

/// A handler's error as seen at the processor boundary
impl From<JobError> for QueueError {
    fn from(err: JobError) -> Self {
        Self::HandlerException(err.message().to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

//! Handler failure classification
//!
//! The processor retries a [`TaskError::Retryable`] with backoff until the task's
//! budget is spent, and archives a [`TaskError::SkipRetry`] on the spot.

/// Failure returned by a task handler.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Transient: unavailable backend, timeout, data not replicated yet.
    #[error("{0:#}")]
    Retryable(anyhow::Error),

    /// Permanent: bad payload, rejected request, missing configuration. Retrying
    /// would fail the same way.
    #[error("{0:#}")]
    SkipRetry(anyhow::Error),
}

impl TaskError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        TaskError::Retryable(err.into())
    }

    pub fn skip_retry(err: impl Into<anyhow::Error>) -> Self {
        TaskError::SkipRetry(err.into())
    }

    pub fn is_skip_retry(&self) -> bool {
        matches!(self, TaskError::SkipRetry(_))
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Retryable(err)
    }
}

/// Classify the error of a `Result` in place: `io_call().await.retryable()?`.
pub trait TaskResultExt<T> {
    fn retryable(self) -> Result<T, TaskError>;

    fn skip_retry(self) -> Result<T, TaskError>;
}

impl<T, E: Into<anyhow::Error>> TaskResultExt<T> for Result<T, E> {
    fn retryable(self) -> Result<T, TaskError> {
        self.map_err(TaskError::retryable)
    }

    fn skip_retry(self) -> Result<T, TaskError> {
        self.map_err(TaskError::skip_retry)
    }
}

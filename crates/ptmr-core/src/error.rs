//! Error types module
//!
//! Errors shared between the producer, the broker implementations and the worker.
//! Store, service and worker errors live next to the code that raises them.

use crate::models::{TaskId, TaskKind};

/// Failures encoding or decoding a task payload.
///
/// Every decode variant is permanent: retrying the same bytes cannot succeed.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("failed to encode task payload: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed task envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u16),

    #[error("payload was encoded for {found}, expected {expected}")]
    KindMismatch { expected: TaskKind, found: String },

    #[error("failed to decode {kind} payload: {source}")]
    Decode {
        kind: TaskKind,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures talking to the task broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker could not be reached (connection refused, pool exhausted, closed).
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("broker error: {0}")]
    Backend(String),
}

impl BrokerError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => BrokerError::Unavailable(err.to_string()),
            other => BrokerError::Backend(other.to_string()),
        }
    }
}

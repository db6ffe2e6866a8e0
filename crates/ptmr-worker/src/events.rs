//! Task outcome reporting

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ptmr_core::models::{QueueName, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadReason {
    /// Handler reported a permanent failure.
    SkipRetry,
    /// Retry budget spent.
    Exhausted,
    /// Unknown kind or undecodable payload.
    Undecodable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Retried { next_attempt: DateTime<Utc> },
    Dead { reason: DeadReason },
}

/// One terminal or retry outcome of a delivered task.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_id: TaskId,
    /// Wire kind as stored by the broker.
    pub kind: String,
    pub queue: QueueName,
    pub payload: Vec<u8>,
    /// Retries consumed before this attempt.
    pub retried: i32,
    pub max_retry: i32,
    pub outcome: TaskOutcome,
    pub error: Option<String>,
}

#[async_trait]
pub trait TaskEventHook: Send + Sync {
    async fn on_event(&self, event: &TaskEvent);
}

/// Default hook: completed at info, retried at warn, dead at error.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHook;

#[async_trait]
impl TaskEventHook for LoggingHook {
    async fn on_event(&self, event: &TaskEvent) {
        let error = event.error.as_deref().unwrap_or_default();
        match &event.outcome {
            TaskOutcome::Completed => tracing::info!(
                task.id = %event.task_id,
                task.kind = %event.kind,
                queue = %event.queue,
                retried = event.retried,
                "Task completed"
            ),
            TaskOutcome::Retried { next_attempt } => tracing::warn!(
                task.id = %event.task_id,
                task.kind = %event.kind,
                queue = %event.queue,
                retried = event.retried + 1,
                max_retry = event.max_retry,
                next_attempt = %next_attempt,
                error,
                "Task failed, retry scheduled"
            ),
            TaskOutcome::Dead { reason } => tracing::error!(
                task.id = %event.task_id,
                task.kind = %event.kind,
                queue = %event.queue,
                retried = event.retried,
                max_retry = event.max_retry,
                reason = ?reason,
                error,
                "Task archived"
            ),
        }
    }
}

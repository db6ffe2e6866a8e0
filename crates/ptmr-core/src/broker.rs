//! Task broker abstraction
//!
//! A broker durably stores tasks and hands each ready task to exactly one worker
//! at a time. Delivery is at-least-once: a task leased by a worker that dies is
//! handed out again once its lease goes stale.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::BrokerError;
use crate::models::{NewTask, QueueName, Task, TaskId, TaskInfo};

#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Persist a new task. Either the task is durably stored or an error is
    /// returned; a task is never partially written.
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError>;

    /// Lease the next visible task of `queue`, marking it active.
    async fn dequeue(&self, queue: QueueName) -> Result<Option<Task>, BrokerError>;

    /// Remove a successfully handled task.
    async fn complete(&self, id: TaskId) -> Result<(), BrokerError>;

    /// Schedule another attempt at `process_at`, incrementing the retry counter.
    async fn retry(
        &self,
        id: TaskId,
        process_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), BrokerError>;

    /// Move a task to the archived (dead) state. Archived tasks are never delivered again.
    async fn archive(&self, id: TaskId, error: &str) -> Result<(), BrokerError>;

    /// Return tasks leased longer than `lease` to the ready state.
    async fn requeue_stale(&self, _lease: Duration) -> Result<u64, BrokerError> {
        Ok(0)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

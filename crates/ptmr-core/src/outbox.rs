//! Transactional outbox records
//!
//! A relational write stages a [`NewOutboxEntry`] inside its own transaction. The
//! entry only becomes visible to the relay after the transaction commits, so a
//! rolled back write never produces a task.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PayloadError;
use crate::models::{TaskId, TaskKind, TaskOptions, TaskPayload};

/// An outbox row that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxEntry {
    pub kind: TaskKind,
    pub payload: Vec<u8>,
    pub options: TaskOptions,
}

impl NewOutboxEntry {
    pub fn from_payload(payload: &TaskPayload, options: TaskOptions) -> Result<Self, PayloadError> {
        Ok(Self {
            kind: payload.kind(),
            payload: payload.encode()?,
            options,
        })
    }
}

/// A committed outbox row awaiting publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: i64,
    pub kind: TaskKind,
    pub payload: Vec<u8>,
    pub options: TaskOptions,
    pub created_at: DateTime<Utc>,
}

/// Read side of the outbox, consumed by the relay.
#[async_trait]
pub trait OutboxSource: Send + Sync {
    /// Committed, unpublished entries in id order.
    async fn fetch_unpublished(&self, limit: i64) -> anyhow::Result<Vec<OutboxEntry>>;

    async fn mark_published(&self, id: i64, task_id: TaskId) -> anyhow::Result<()>;
}

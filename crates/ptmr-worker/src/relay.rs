//! Outbox relay
//!
//! Tasks staged inside relational transactions sit in the outbox until this relay
//! publishes them to the broker. Publishing is at-least-once: a crash between the
//! enqueue and `mark_published` enqueues the entry again on the next run.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ptmr_core::{OutboxSource, WorkerConfig};

use crate::distributor::{EnqueueError, TaskDistributor};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub poll_interval: Duration,
    /// Entries fetched per round. Values below 1 are treated as 1.
    pub batch_size: i64,
}

impl RelayConfig {
    fn batch_limit(&self) -> i64 {
        self.batch_size.max(1)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 100,
        }
    }
}

impl From<&WorkerConfig> for RelayConfig {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.outbox_poll_interval,
            batch_size: config.outbox_batch_size,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to read outbox: {0:#}")]
    Source(anyhow::Error),

    #[error("failed to publish outbox entry {id}: {error}")]
    Enqueue { id: i64, error: EnqueueError },

    #[error("failed to mark outbox entry {id} published: {error:#}")]
    MarkPublished { id: i64, error: anyhow::Error },
}

#[derive(Clone)]
pub struct OutboxRelay {
    source: Arc<dyn OutboxSource>,
    distributor: TaskDistributor,
    config: RelayConfig,
}

impl OutboxRelay {
    pub fn new(
        source: Arc<dyn OutboxSource>,
        distributor: TaskDistributor,
        config: RelayConfig,
    ) -> Self {
        if config.batch_size < 1 {
            tracing::warn!(batch_size = config.batch_size, "Outbox batch size below 1, using 1");
        }
        Self {
            source,
            distributor,
            config,
        }
    }

    /// Publish one batch of unpublished entries in id order. Stops at the first
    /// failure; the failed entry and everything after it stay unpublished.
    pub async fn relay_once(&self) -> Result<usize, RelayError> {
        let entries = self
            .source
            .fetch_unpublished(self.config.batch_limit())
            .await
            .map_err(RelayError::Source)?;

        let mut published = 0;
        for entry in entries {
            let info = self
                .distributor
                .enqueue_encoded(entry.kind, entry.payload, entry.options)
                .await
                .map_err(|error| RelayError::Enqueue {
                    id: entry.id,
                    error,
                })?;
            self.source
                .mark_published(entry.id, info.id)
                .await
                .map_err(|error| RelayError::MarkPublished {
                    id: entry.id,
                    error,
                })?;
            published += 1;
        }

        if published > 0 {
            tracing::debug!(published, "Relayed outbox entries");
        }
        Ok(published)
    }

    /// Run until `shutdown` fires. A full batch is followed immediately by the next
    /// one; otherwise the relay sleeps for the poll interval.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                batch_size = self.config.batch_limit(),
                "Outbox relay started"
            );
            loop {
                let full_batch = match self.relay_once().await {
                    Ok(count) => count as i64 >= self.config.batch_limit(),
                    Err(e) => {
                        tracing::error!(error = %e, "Outbox relay failed");
                        false
                    }
                };
                if full_batch && !shutdown.is_cancelled() {
                    continue;
                }
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
            tracing::info!("Outbox relay stopped");
        })
    }
}

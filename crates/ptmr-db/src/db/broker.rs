use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::time::Duration;
use uuid::Uuid;

use ptmr_core::models::{NewTask, QueueName, Task, TaskId, TaskInfo};
use ptmr_core::{BrokerError, TaskBroker};

const TASK_COLUMNS: &str = "id, kind, payload, queue, status, retried, max_retry, process_at, \
     last_error, started_at, created_at";

/// Task broker backed by the `tasks` table
///
/// Workers claim tasks with `FOR UPDATE SKIP LOCKED`, so concurrent workers never
/// receive the same task while it is leased.
#[derive(Clone)]
pub struct PgTaskBroker {
    pool: PgPool,
}

impl PgTaskBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn expect_row(id: TaskId, rows_affected: u64) -> Result<(), BrokerError> {
        if rows_affected == 0 {
            return Err(BrokerError::TaskNotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskBroker for PgTaskBroker {
    #[tracing::instrument(skip(self, task), fields(task.kind = %task.kind, queue = %task.options.queue))]
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError> {
        let id = Uuid::new_v4();
        let process_at = task.options.process_at(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO tasks (id, kind, payload, queue, status, retried, max_retry, process_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6)
            "#,
        )
        .bind(id)
        .bind(task.kind.as_str())
        .bind(&task.payload)
        .bind(task.options.queue.as_str())
        .bind(task.options.max_retry)
        .bind(process_at)
        .execute(&self.pool)
        .await?;

        Ok(TaskInfo {
            id,
            kind: task.kind,
            queue: task.options.queue,
            max_retry: task.options.max_retry,
            process_at,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn dequeue(&self, queue: QueueName) -> Result<Option<Task>, BrokerError> {
        let sql = format!(
            r#"
            UPDATE tasks
            SET status = 'active',
                started_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM tasks
                WHERE queue = $1
                    AND status IN ('pending', 'retry')
                    AND process_at <= NOW()
                ORDER BY process_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let task = sqlx::query_as::<Postgres, Task>(&sql)
            .bind(queue.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    async fn complete(&self, id: TaskId) -> Result<(), BrokerError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Self::expect_row(id, result.rows_affected())
    }

    #[tracing::instrument(skip(self, error))]
    async fn retry(
        &self,
        id: TaskId,
        process_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), BrokerError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'retry',
                retried = retried + 1,
                process_at = $2,
                last_error = $3,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(process_at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Self::expect_row(id, result.rows_affected())
    }

    #[tracing::instrument(skip(self, error))]
    async fn archive(&self, id: TaskId, error: &str) -> Result<(), BrokerError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'archived',
                last_error = $2,
                started_at = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Self::expect_row(id, result.rows_affected())
    }

    /// Return tasks whose lease expired (worker crashed or lost its connection)
    /// to the retry state. Their retry counter is left untouched.
    #[tracing::instrument(skip(self))]
    async fn requeue_stale(&self, lease: Duration) -> Result<u64, BrokerError> {
        let lease_secs = i64::try_from(lease.as_secs()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'retry',
                process_at = NOW(),
                last_error = 'lease expired',
                started_at = NULL,
                updated_at = NOW()
            WHERE status = 'active'
                AND started_at < NOW() - ($1 * interval '1 second')
            "#,
        )
        .bind(lease_secs)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::warn!(count, lease_secs, "Requeued stale tasks");
        }
        Ok(count)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.pool.close().await;
        Ok(())
    }
}

//! Postgres transaction executor and outbox source.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use ptmr_core::models::{
    application_doc_id, ApplicationStatus, Candidate, CandidateApplication, CandidateSwipe,
    EmployerApplication, EmployerSwipe, PastExperience, QueueName, TaskId, TaskKind, TaskOptions,
};
use ptmr_core::{NewOutboxEntry, OutboxEntry, OutboxSource};

use super::error::DbError;
use super::queries::{
    CreateApplicationParams, CreateCandidateParams, CreatePastExperienceParams,
    DeletePastExperienceParams, OutboxWriter, Queries, UpdateCandidateParams,
    UpdatePastExperienceParams,
};
use super::transaction::TransactionExecutor;

const CANDIDATE_COLUMNS: &str =
    "id, user_uid, full_name, email, education, about_me, created_at, updated_at";
const PAST_EXPERIENCE_COLUMNS: &str = "id, candidate_id, industry, job_title, employer, \
     start_date, end_date, present, description, created_at";
const APPLICATION_COLUMNS: &str = "id, candidate_id, employer_id, job_id, message, status, \
     elasticsearch_doc_id, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// An open Postgres transaction.
pub struct PgTx {
    inner: Transaction<'static, Postgres>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run database migrations: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl TransactionExecutor for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, DbError> {
        let inner = self.pool.begin().await?;
        Ok(PgTx { inner })
    }

    async fn commit(&self, tx: PgTx) -> Result<(), DbError> {
        tx.inner.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: PgTx) -> Result<(), DbError> {
        tx.inner.rollback().await?;
        Ok(())
    }
}

/// Map a unique violation to [`DbError::Conflict`].
fn conflict_as(entity: &'static str) -> impl Fn(sqlx::Error) -> DbError {
    move |e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return DbError::Conflict(entity);
            }
        }
        DbError::Sqlx(e)
    }
}

#[async_trait]
impl Queries for PgTx {
    async fn create_candidate(
        &mut self,
        params: CreateCandidateParams,
    ) -> Result<Candidate, DbError> {
        let sql = format!(
            "INSERT INTO candidates (user_uid, full_name, email, education, about_me) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {CANDIDATE_COLUMNS}"
        );
        sqlx::query_as::<Postgres, Candidate>(&sql)
            .bind(&params.user_uid)
            .bind(&params.full_name)
            .bind(&params.email)
            .bind(&params.education)
            .bind(&params.about_me)
            .fetch_one(&mut *self.inner)
            .await
            .map_err(conflict_as("candidate"))
    }

    async fn update_candidate(
        &mut self,
        params: UpdateCandidateParams,
    ) -> Result<Candidate, DbError> {
        let sql = format!(
            "UPDATE candidates SET full_name = $2, education = $3, about_me = $4, \
             updated_at = NOW() WHERE user_uid = $1 RETURNING {CANDIDATE_COLUMNS}"
        );
        sqlx::query_as::<Postgres, Candidate>(&sql)
            .bind(&params.user_uid)
            .bind(&params.full_name)
            .bind(&params.education)
            .bind(&params.about_me)
            .fetch_optional(&mut *self.inner)
            .await?
            .ok_or(DbError::NotFound("candidate"))
    }

    async fn create_past_experience(
        &mut self,
        params: CreatePastExperienceParams,
    ) -> Result<PastExperience, DbError> {
        let sql = format!(
            "INSERT INTO past_experiences (candidate_id, industry, job_title, employer, \
             start_date, end_date, present, description) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {PAST_EXPERIENCE_COLUMNS}"
        );
        sqlx::query_as::<Postgres, PastExperience>(&sql)
            .bind(params.candidate_id)
            .bind(&params.industry)
            .bind(&params.job_title)
            .bind(&params.employer)
            .bind(params.start_date)
            .bind(params.end_date)
            .bind(params.present)
            .bind(&params.description)
            .fetch_one(&mut *self.inner)
            .await
            .map_err(DbError::from)
    }

    async fn update_past_experience(
        &mut self,
        params: UpdatePastExperienceParams,
    ) -> Result<PastExperience, DbError> {
        let sql = format!(
            "UPDATE past_experiences SET industry = $3, job_title = $4, employer = $5, \
             start_date = $6, end_date = $7, present = $8, description = $9 \
             WHERE id = $1 AND candidate_id = $2 RETURNING {PAST_EXPERIENCE_COLUMNS}"
        );
        sqlx::query_as::<Postgres, PastExperience>(&sql)
            .bind(params.id)
            .bind(params.candidate_id)
            .bind(&params.industry)
            .bind(&params.job_title)
            .bind(&params.employer)
            .bind(params.start_date)
            .bind(params.end_date)
            .bind(params.present)
            .bind(&params.description)
            .fetch_optional(&mut *self.inner)
            .await?
            .ok_or(DbError::NotFound("past experience"))
    }

    async fn delete_past_experience(
        &mut self,
        params: DeletePastExperienceParams,
    ) -> Result<(), DbError> {
        let result =
            sqlx::query("DELETE FROM past_experiences WHERE id = $1 AND candidate_id = $2")
                .bind(params.id)
                .bind(params.candidate_id)
                .execute(&mut *self.inner)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("past experience"));
        }
        Ok(())
    }

    async fn create_candidate_application(
        &mut self,
        params: CreateApplicationParams,
    ) -> Result<CandidateApplication, DbError> {
        let sql = format!(
            "INSERT INTO candidate_applications (candidate_id, employer_id, job_id, message, \
             status, elasticsearch_doc_id) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {APPLICATION_COLUMNS}"
        );
        sqlx::query_as::<Postgres, CandidateApplication>(&sql)
            .bind(params.candidate_id)
            .bind(params.employer_id)
            .bind(params.job_id)
            .bind(&params.message)
            .bind(ApplicationStatus::Pending)
            .bind(application_doc_id(params.candidate_id, params.job_id))
            .fetch_one(&mut *self.inner)
            .await
            .map_err(conflict_as("candidate application"))
    }

    async fn create_employer_application(
        &mut self,
        params: CreateApplicationParams,
    ) -> Result<EmployerApplication, DbError> {
        let sql = format!(
            "INSERT INTO employer_applications (candidate_id, employer_id, job_id, message, \
             status, elasticsearch_doc_id) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {APPLICATION_COLUMNS}"
        );
        sqlx::query_as::<Postgres, EmployerApplication>(&sql)
            .bind(params.candidate_id)
            .bind(params.employer_id)
            .bind(params.job_id)
            .bind(&params.message)
            .bind(ApplicationStatus::Pending)
            .bind(application_doc_id(params.candidate_id, params.job_id))
            .fetch_one(&mut *self.inner)
            .await
            .map_err(conflict_as("employer application"))
    }

    async fn delete_candidate_application(&mut self, doc_id: &str) -> Result<(), DbError> {
        let result =
            sqlx::query("DELETE FROM candidate_applications WHERE elasticsearch_doc_id = $1")
                .bind(doc_id)
                .execute(&mut *self.inner)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("candidate application"));
        }
        Ok(())
    }

    async fn delete_employer_application(&mut self, doc_id: &str) -> Result<(), DbError> {
        let result =
            sqlx::query("DELETE FROM employer_applications WHERE elasticsearch_doc_id = $1")
                .bind(doc_id)
                .execute(&mut *self.inner)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("employer application"));
        }
        Ok(())
    }

    async fn update_candidate_application_status(
        &mut self,
        doc_id: &str,
        status: ApplicationStatus,
    ) -> Result<CandidateApplication, DbError> {
        let sql = format!(
            "UPDATE candidate_applications SET status = $2 WHERE elasticsearch_doc_id = $1 \
             RETURNING {APPLICATION_COLUMNS}"
        );
        sqlx::query_as::<Postgres, CandidateApplication>(&sql)
            .bind(doc_id)
            .bind(status)
            .fetch_optional(&mut *self.inner)
            .await?
            .ok_or(DbError::NotFound("candidate application"))
    }

    async fn update_employer_application_status(
        &mut self,
        doc_id: &str,
        status: ApplicationStatus,
    ) -> Result<EmployerApplication, DbError> {
        let sql = format!(
            "UPDATE employer_applications SET status = $2 WHERE elasticsearch_doc_id = $1 \
             RETURNING {APPLICATION_COLUMNS}"
        );
        sqlx::query_as::<Postgres, EmployerApplication>(&sql)
            .bind(doc_id)
            .bind(status)
            .fetch_optional(&mut *self.inner)
            .await?
            .ok_or(DbError::NotFound("employer application"))
    }

    async fn create_candidate_swipe(&mut self, swipe: &CandidateSwipe) -> Result<(), DbError> {
        sqlx::query("INSERT INTO candidate_swipes (candidate_id, job_id, swipe) VALUES ($1, $2, $3)")
            .bind(swipe.candidate_id)
            .bind(&swipe.job_id)
            .bind(swipe.swipe)
            .execute(&mut *self.inner)
            .await?;
        Ok(())
    }

    async fn create_employer_swipe(&mut self, swipe: &EmployerSwipe) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO employer_swipes (employer_id, candidate_id, swipe) VALUES ($1, $2, $3)",
        )
        .bind(swipe.employer_id)
        .bind(swipe.candidate_id)
        .bind(swipe.swipe)
        .execute(&mut *self.inner)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxWriter for PgTx {
    async fn stage(&mut self, entry: NewOutboxEntry) -> Result<i64, DbError> {
        let delay_ms = i64::try_from(entry.options.delay.as_millis()).unwrap_or(i64::MAX);
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO task_outbox (kind, payload, queue, max_retry, delay_ms) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(entry.kind.as_str())
        .bind(&entry.payload)
        .bind(entry.options.queue.as_str())
        .bind(entry.options.max_retry)
        .bind(delay_ms)
        .fetch_one(&mut *self.inner)
        .await?;
        Ok(id)
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: i64,
    kind: String,
    payload: Vec<u8>,
    queue: String,
    max_retry: i32,
    delay_ms: i64,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = anyhow::Error;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let kind: TaskKind = row.kind.parse()?;
        let queue: QueueName = row.queue.parse()?;
        let delay = std::time::Duration::from_millis(u64::try_from(row.delay_ms).unwrap_or(0));
        Ok(OutboxEntry {
            id: row.id,
            kind,
            payload: row.payload,
            options: TaskOptions::default()
                .queue(queue)
                .max_retry(row.max_retry)
                .process_in(delay),
            created_at: row.created_at,
        })
    }
}

/// Split fetched rows into publishable entries and rows that no longer parse,
/// e.g. a kind written by a newer producer. Order is kept.
fn split_outbox_rows(rows: Vec<OutboxRow>) -> (Vec<OutboxEntry>, Vec<(i64, String)>) {
    let mut entries = Vec::with_capacity(rows.len());
    let mut rejected = Vec::new();
    for row in rows {
        let id = row.id;
        match OutboxEntry::try_from(row) {
            Ok(entry) => entries.push(entry),
            Err(e) => rejected.push((id, e.to_string())),
        }
    }
    (entries, rejected)
}

impl PgStore {
    /// Park an outbox row that cannot be published so it stops blocking the relay.
    async fn mark_outbox_failed(&self, id: i64, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE task_outbox SET failed_at = NOW(), last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxSource for PgStore {
    #[tracing::instrument(skip(self))]
    async fn fetch_unpublished(&self, limit: i64) -> anyhow::Result<Vec<OutboxEntry>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            "SELECT id, kind, payload, queue, max_retry, delay_ms, created_at \
             FROM task_outbox WHERE published_at IS NULL AND failed_at IS NULL \
             ORDER BY id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to fetch unpublished outbox entries: {}", e))?;

        let (entries, rejected) = split_outbox_rows(rows);
        for (id, error) in rejected {
            tracing::error!(outbox.id = id, error = %error, "Unpublishable outbox entry set aside");
            if let Err(e) = self.mark_outbox_failed(id, &error).await {
                tracing::error!(outbox.id = id, error = %e, "Failed to set outbox entry aside");
            }
        }
        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    async fn mark_published(&self, id: i64, task_id: TaskId) -> anyhow::Result<()> {
        sqlx::query("UPDATE task_outbox SET published_at = NOW(), task_id = $2 WHERE id = $1")
            .bind(id)
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to mark outbox entry {} published: {}", id, e))?;
        Ok(())
    }
}

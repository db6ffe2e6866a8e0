//! Coupled write operations
//!
//! Each operation performs one relational write and hands its result to a
//! caller-supplied after-effect. The after-effect describes the side effect by
//! staging tasks; the staged tasks are written to the outbox inside the same
//! transaction, so they are published if and only if the write commits.

use ptmr_core::models::{
    Candidate, CandidateApplication, CandidateSwipe, EmployerApplication, EmployerSwipe,
    PastExperience, Swipe, TaskOptions, TaskPayload,
};
use ptmr_core::{NewOutboxEntry, PayloadError};

use super::error::{DbError, TxError};
use super::queries::{
    CreateApplicationParams, CreateCandidateParams, CreatePastExperienceParams,
    DeleteApplicationParams, DeletePastExperienceParams, DeletedPastExperience, OutboxWriter,
    Queries, UpdateApplicationStatusParams, UpdateCandidateParams, UpdatePastExperienceParams,
};
use super::transaction::{run_in_transaction, TransactionExecutor, TxFuture};

type JsonMap = serde_json::Map<String, serde_json::Value>;

/// Tasks an after-effect wants published once the transaction commits.
#[derive(Debug, Default)]
pub struct StagedTasks {
    entries: Vec<NewOutboxEntry>,
}

impl StagedTasks {
    pub fn push(&mut self, payload: &TaskPayload, options: TaskOptions) -> Result<(), PayloadError> {
        self.entries
            .push(NewOutboxEntry::from_payload(payload, options)?);
        Ok(())
    }

    fn into_entries(self) -> Vec<NewOutboxEntry> {
        self.entries
    }
}

#[derive(Clone)]
pub struct Store<E> {
    executor: E,
}

impl<E: TransactionExecutor> Store<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    async fn coupled<R, M, A>(
        &self,
        operation: &'static str,
        mutation: M,
        after: A,
    ) -> Result<R, TxError>
    where
        R: Send + Sync,
        M: for<'t> FnOnce(&'t mut E::Tx) -> TxFuture<'t, Result<R, DbError>> + Send,
        A: FnOnce(&R, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        let result = run_in_transaction(&self.executor, mutation, move |tx, result| {
            let mut staged = StagedTasks::default();
            let outcome = after(result, &mut staged);
            Box::pin(async move {
                outcome?;
                for entry in staged.into_entries() {
                    let kind = entry.kind;
                    let outbox_id = tx.stage(entry).await?;
                    tracing::debug!(outbox_id, task.kind = %kind, "Staged task in outbox");
                }
                Ok::<(), anyhow::Error>(())
            })
        })
        .await;

        if let Err(e) = &result {
            tracing::warn!(operation, error = %e, "Transaction rolled back");
        }
        result
    }

    #[tracing::instrument(skip(self, params, after_create), fields(user_uid = %params.user_uid))]
    pub async fn create_candidate_tx<F>(
        &self,
        params: CreateCandidateParams,
        after_create: F,
    ) -> Result<Candidate, TxError>
    where
        F: FnOnce(&Candidate, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "create_candidate",
            |tx| Box::pin(async move { tx.create_candidate(params).await }),
            after_create,
        )
        .await
    }

    #[tracing::instrument(skip(self, params, after_update), fields(user_uid = %params.user_uid))]
    pub async fn update_candidate_tx<F>(
        &self,
        params: UpdateCandidateParams,
        after_update: F,
    ) -> Result<Candidate, TxError>
    where
        F: FnOnce(&Candidate, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "update_candidate",
            |tx| Box::pin(async move { tx.update_candidate(params).await }),
            after_update,
        )
        .await
    }

    #[tracing::instrument(skip(self, params, after_create), fields(candidate_id = params.candidate_id))]
    pub async fn create_past_experience_tx<F>(
        &self,
        params: CreatePastExperienceParams,
        after_create: F,
    ) -> Result<PastExperience, TxError>
    where
        F: FnOnce(&PastExperience, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "create_past_experience",
            |tx| Box::pin(async move { tx.create_past_experience(params).await }),
            after_create,
        )
        .await
    }

    #[tracing::instrument(skip(self, params, after_update), fields(id = params.id))]
    pub async fn update_past_experience_tx<F>(
        &self,
        params: UpdatePastExperienceParams,
        after_update: F,
    ) -> Result<PastExperience, TxError>
    where
        F: FnOnce(&PastExperience, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "update_past_experience",
            |tx| Box::pin(async move { tx.update_past_experience(params).await }),
            after_update,
        )
        .await
    }

    /// `after_delete` receives `(candidate_id, past_experience_id)`.
    #[tracing::instrument(skip(self, after_delete))]
    pub async fn delete_past_experience_tx<F>(
        &self,
        params: DeletePastExperienceParams,
        after_delete: F,
    ) -> Result<(), TxError>
    where
        F: FnOnce(i64, i64, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "delete_past_experience",
            |tx| {
                Box::pin(async move {
                    tx.delete_past_experience(params).await?;
                    Ok::<_, DbError>(DeletedPastExperience {
                        candidate_id: params.candidate_id,
                        past_experience_id: params.id,
                    })
                })
            },
            move |deleted, staged| {
                after_delete(deleted.candidate_id, deleted.past_experience_id, staged)
            },
        )
        .await
        .map(|_| ())
    }

    /// `after_create` receives the application's search document id and `app_doc`.
    #[tracing::instrument(skip(self, params, app_doc, after_create))]
    pub async fn create_candidate_application_tx<F>(
        &self,
        params: CreateApplicationParams,
        app_doc: JsonMap,
        after_create: F,
    ) -> Result<CandidateApplication, TxError>
    where
        F: FnOnce(&str, JsonMap, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "create_candidate_application",
            |tx| Box::pin(async move { tx.create_candidate_application(params).await }),
            move |application, staged| {
                after_create(&application.elasticsearch_doc_id, app_doc, staged)
            },
        )
        .await
    }

    #[tracing::instrument(skip(self, params, app_doc, after_create))]
    pub async fn create_employer_application_tx<F>(
        &self,
        params: CreateApplicationParams,
        app_doc: JsonMap,
        after_create: F,
    ) -> Result<EmployerApplication, TxError>
    where
        F: FnOnce(&str, JsonMap, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "create_employer_application",
            |tx| Box::pin(async move { tx.create_employer_application(params).await }),
            move |application, staged| {
                after_create(&application.elasticsearch_doc_id, app_doc, staged)
            },
        )
        .await
    }

    #[tracing::instrument(skip(self, params, after_delete), fields(doc_id = %params.doc_id, is_employer = params.is_employer))]
    pub async fn delete_application_tx<F>(
        &self,
        params: DeleteApplicationParams,
        after_delete: F,
    ) -> Result<(), TxError>
    where
        F: FnOnce(&str, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "delete_application",
            |tx| {
                Box::pin(async move {
                    if params.is_employer {
                        tx.delete_employer_application(&params.doc_id).await?;
                    } else {
                        tx.delete_candidate_application(&params.doc_id).await?;
                    }
                    Ok::<_, DbError>(params.doc_id)
                })
            },
            move |doc_id, staged| after_delete(doc_id, staged),
        )
        .await
        .map(|_| ())
    }

    /// Update the status of a candidate application and record the matching swipe
    ///
    /// Only `accepted` and `rejected` are valid; any other status rolls the update back.
    #[tracing::instrument(skip(self, params, after_update), fields(doc_id = %params.doc_id, status = %params.status))]
    pub async fn update_candidate_application_status_tx<F>(
        &self,
        params: UpdateApplicationStatusParams,
        after_update: F,
    ) -> Result<CandidateSwipe, TxError>
    where
        F: FnOnce(&CandidateSwipe, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "update_candidate_application_status",
            |tx| {
                Box::pin(async move {
                    let application = tx
                        .update_candidate_application_status(&params.doc_id, params.status)
                        .await?;
                    let swipe = Swipe::from_status(params.status)
                        .ok_or(DbError::InvalidStatus(params.status))?;
                    let swipe = CandidateSwipe {
                        candidate_id: application.candidate_id,
                        job_id: application.job_id.to_string(),
                        swipe,
                    };
                    tx.create_candidate_swipe(&swipe).await?;
                    Ok::<_, DbError>(swipe)
                })
            },
            after_update,
        )
        .await
    }

    #[tracing::instrument(skip(self, params, after_update), fields(doc_id = %params.doc_id, status = %params.status))]
    pub async fn update_employer_application_status_tx<F>(
        &self,
        params: UpdateApplicationStatusParams,
        after_update: F,
    ) -> Result<EmployerSwipe, TxError>
    where
        F: FnOnce(&EmployerSwipe, &mut StagedTasks) -> anyhow::Result<()> + Send,
    {
        self.coupled(
            "update_employer_application_status",
            |tx| {
                Box::pin(async move {
                    let application = tx
                        .update_employer_application_status(&params.doc_id, params.status)
                        .await?;
                    let swipe = Swipe::from_status(params.status)
                        .ok_or(DbError::InvalidStatus(params.status))?;
                    let swipe = EmployerSwipe {
                        employer_id: application.employer_id,
                        candidate_id: application.candidate_id,
                        swipe,
                    };
                    tx.create_employer_swipe(&swipe).await?;
                    Ok::<_, DbError>(swipe)
                })
            },
            after_update,
        )
        .await
    }
}

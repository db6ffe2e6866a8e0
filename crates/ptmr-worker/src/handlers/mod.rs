//! Side-effect handlers
//!
//! Every handler is idempotent: running it twice with the same payload leaves the
//! document store (or mailbox, modulo duplicate sends) in the same state as once.

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use ptmr_core::models::TaskPayload;
use ptmr_core::TaskError;
use ptmr_services::{
    DocumentStore, EmailSender, MailError, SearchError, CANDIDATE_APPLICATIONS_INDEX,
    EMPLOYER_APPLICATIONS_INDEX,
};

use crate::processor::{HandlerContext, TaskHandler};

mod application;
mod candidate;
mod past_experience;
mod verify_email;

/// Dispatches decoded payloads to the document store and mailer.
#[derive(Clone)]
pub struct SideEffectHandlers {
    documents: Arc<dyn DocumentStore>,
    mailer: Arc<dyn EmailSender>,
    email_asset_dir: Option<PathBuf>,
}

impl SideEffectHandlers {
    pub fn new(documents: Arc<dyn DocumentStore>, mailer: Arc<dyn EmailSender>) -> Self {
        Self {
            documents,
            mailer,
            email_asset_dir: None,
        }
    }

    /// Directory holding `logo.png` and `email-icon.png` for the verification email.
    pub fn with_email_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.email_asset_dir = Some(dir.into());
        self
    }

    async fn dispatch(&self, payload: TaskPayload) -> Result<(), TaskError> {
        let documents = self.documents.as_ref();
        match payload {
            TaskPayload::SendVerifyEmail(p) => {
                verify_email::send_verify_email(
                    self.mailer.as_ref(),
                    self.email_asset_dir.as_deref(),
                    p,
                )
                .await
            }
            TaskPayload::CreateCandidate(p) => candidate::index_candidate(documents, p).await,
            TaskPayload::UpdateCandidate(p) => candidate::update_candidate(documents, p).await,
            TaskPayload::AddPastExperience(p) | TaskPayload::UpdatePastExperience(p) => {
                past_experience::upsert_past_experience(documents, p).await
            }
            TaskPayload::DeletePastExperience(p) => {
                past_experience::delete_past_experience(documents, p).await
            }
            TaskPayload::CreateCandidateApplication(p) => {
                application::index_application(documents, CANDIDATE_APPLICATIONS_INDEX, p).await
            }
            TaskPayload::CreateEmployerApplication(p) => {
                application::index_application(documents, EMPLOYER_APPLICATIONS_INDEX, p).await
            }
            TaskPayload::DeleteCandidateApplication(p) => {
                application::delete_application(documents, CANDIDATE_APPLICATIONS_INDEX, p).await
            }
            TaskPayload::DeleteEmployerApplication(p) => {
                application::delete_application(documents, EMPLOYER_APPLICATIONS_INDEX, p).await
            }
        }
    }
}

#[async_trait]
impl TaskHandler for SideEffectHandlers {
    async fn handle(&self, ctx: &HandlerContext, payload: TaskPayload) -> Result<(), TaskError> {
        let kind = payload.kind();
        let target = payload.target_id().to_string();
        tokio::select! {
            result = self.dispatch(payload) => {
                if result.is_ok() {
                    tracing::info!(task.id = %ctx.task_id, task.kind = %kind, target = %target, "Processed task");
                }
                result
            }
            _ = ctx.cancelled() => Err(TaskError::retryable(anyhow!(
                "{} for {} cancelled by shutdown",
                kind,
                target
            ))),
        }
    }
}

const MAX_EDIT_ATTEMPTS: usize = 5;

/// Read-modify-write of one document, guarded by its version.
///
/// `edit` receives the current source (`None` when absent) and returns the
/// document to store, or `None` to leave it as is. When another writer gets in
/// between the read and the write, the document is read again and `edit` is
/// reapplied to the fresh copy.
async fn edit_document<F>(
    documents: &dyn DocumentStore,
    index: &str,
    id: &str,
    mut edit: F,
) -> Result<(), TaskError>
where
    F: FnMut(Option<Value>) -> Result<Option<Value>, TaskError> + Send,
{
    for attempt in 1..=MAX_EDIT_ATTEMPTS {
        let current = documents.get_by_id(index, id).await.map_err(search_error)?;
        let expected = current.as_ref().map(|doc| doc.version);
        let Some(document) = edit(current.map(|doc| doc.source))? else {
            return Ok(());
        };
        match documents
            .index_if_version(index, id, &document, expected)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) if e.is_conflict() => {
                tracing::debug!(index, id, attempt, "Document changed since read, editing again");
            }
            Err(e) => return Err(search_error(e)),
        }
    }
    Err(TaskError::retryable(anyhow!(
        "document {} in {} kept changing across {} edits",
        id,
        index,
        MAX_EDIT_ATTEMPTS
    )))
}

fn search_error(err: SearchError) -> TaskError {
    if err.is_transient() {
        TaskError::retryable(err)
    } else {
        TaskError::skip_retry(err)
    }
}

fn mail_error(err: MailError) -> TaskError {
    if err.is_permanent() {
        TaskError::skip_retry(err)
    } else {
        TaskError::retryable(err)
    }
}

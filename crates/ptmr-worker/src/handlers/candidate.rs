use anyhow::anyhow;
use serde_json::Value;

use ptmr_core::models::PayloadCandidate;
use ptmr_core::TaskError;
use ptmr_services::{DocumentStore, CANDIDATES_INDEX};

use super::{edit_document, search_error};

const PAST_EXPERIENCE_FIELD: &str = "past_experience";

fn require_user_uid(payload: &PayloadCandidate) -> Result<&str, TaskError> {
    let user_uid = payload.candidate.user_uid.as_str();
    if user_uid.trim().is_empty() {
        return Err(TaskError::skip_retry(anyhow!("candidate user_uid is empty")));
    }
    Ok(user_uid)
}

/// Index the candidate document at its user uid. Past experience entries already
/// present on the document are carried over.
pub(super) async fn index_candidate(
    documents: &dyn DocumentStore,
    payload: PayloadCandidate,
) -> Result<(), TaskError> {
    let user_uid = require_user_uid(&payload)?;
    let fresh = payload.candidate.to_document();

    edit_document(documents, CANDIDATES_INDEX, user_uid, |existing| {
        let mut document = fresh.clone();
        if let (Some(Value::Object(mut existing)), Value::Object(fields)) = (existing, &mut document)
        {
            if let Some(past_experience) = existing.remove(PAST_EXPERIENCE_FIELD) {
                fields.insert(PAST_EXPERIENCE_FIELD.to_string(), past_experience);
            }
        }
        Ok(Some(document))
    })
    .await
}

/// Partial update of the candidate document. A missing document is retried:
/// the create task may not have run yet.
pub(super) async fn update_candidate(
    documents: &dyn DocumentStore,
    payload: PayloadCandidate,
) -> Result<(), TaskError> {
    let user_uid = require_user_uid(&payload)?;
    documents
        .update_by_id(CANDIDATES_INDEX, user_uid, &payload.candidate.to_document())
        .await
        .map_err(search_error)
}

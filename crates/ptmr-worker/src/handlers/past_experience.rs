use anyhow::anyhow;
use serde_json::Value;

use ptmr_core::models::{PayloadDeletePastExperience, PayloadPastExperience};
use ptmr_core::TaskError;
use ptmr_services::{DocumentStore, CANDIDATES_INDEX};

use super::edit_document;

const PAST_EXPERIENCE_FIELD: &str = "past_experience";

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

fn start_date(entry: &Value) -> Option<&str> {
    entry.get("start_date").and_then(Value::as_str)
}

/// The candidate's `past_experience` array, created when absent or null.
fn past_experience_mut(document: &mut Value) -> Result<&mut Vec<Value>, TaskError> {
    let fields = document
        .as_object_mut()
        .ok_or_else(|| TaskError::skip_retry(anyhow!("candidate document is not an object")))?;
    let entries = fields
        .entry(PAST_EXPERIENCE_FIELD)
        .or_insert_with(|| Value::Array(Vec::new()));
    if entries.is_null() {
        *entries = Value::Array(Vec::new());
    }
    entries
        .as_array_mut()
        .ok_or_else(|| TaskError::skip_retry(anyhow!("candidate past_experience is not an array")))
}

/// Insert or replace the entry with the same id, keeping the array ordered by
/// start date.
pub(super) async fn upsert_past_experience(
    documents: &dyn DocumentStore,
    payload: PayloadPastExperience,
) -> Result<(), TaskError> {
    let user_uid = payload.user_uid.as_str();
    if user_uid.trim().is_empty() {
        return Err(TaskError::skip_retry(anyhow!("past experience user_uid is empty")));
    }
    let entry = payload.past_experience.to_document();
    let id = payload.past_experience.id.to_string();

    edit_document(documents, CANDIDATES_INDEX, user_uid, |current| {
        let Some(mut document) = current else {
            return Err(TaskError::retryable(anyhow!(
                "candidate document {} is not indexed yet",
                user_uid
            )));
        };
        let entries = past_experience_mut(&mut document)?;
        entries.retain(|e| entry_id(e) != Some(id.as_str()));
        entries.push(entry.clone());
        entries.sort_by(|a, b| start_date(a).cmp(&start_date(b)));
        Ok(Some(document))
    })
    .await
}

pub(super) async fn delete_past_experience(
    documents: &dyn DocumentStore,
    payload: PayloadDeletePastExperience,
) -> Result<(), TaskError> {
    let user_uid = payload.user_uid.as_str();
    let id = payload.past_experience_id.as_str();
    if user_uid.trim().is_empty() || id.trim().is_empty() {
        return Err(TaskError::skip_retry(anyhow!(
            "past experience delete requires user_uid and past_experience_id"
        )));
    }

    edit_document(documents, CANDIDATES_INDEX, user_uid, |current| {
        let Some(mut document) = current else {
            tracing::debug!(user_uid, "Candidate document absent, nothing to delete");
            return Ok(None);
        };
        let entries = past_experience_mut(&mut document)?;
        let before = entries.len();
        entries.retain(|e| entry_id(e) != Some(id));
        if entries.len() == before {
            return Ok(None);
        }
        Ok(Some(document))
    })
    .await
}

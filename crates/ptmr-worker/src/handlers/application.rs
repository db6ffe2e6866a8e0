use anyhow::anyhow;
use serde_json::Value;

use ptmr_core::models::{PayloadCreateApplication, PayloadDeleteApplication};
use ptmr_core::TaskError;
use ptmr_services::DocumentStore;

use super::search_error;

fn require_doc_id(doc_id: &str) -> Result<(), TaskError> {
    if doc_id.trim().is_empty() {
        return Err(TaskError::skip_retry(anyhow!("application doc_id is empty")));
    }
    Ok(())
}

pub(super) async fn index_application(
    documents: &dyn DocumentStore,
    index: &str,
    payload: PayloadCreateApplication,
) -> Result<(), TaskError> {
    require_doc_id(&payload.doc_id)?;
    documents
        .index_by_id(index, &payload.doc_id, &Value::Object(payload.app_doc))
        .await
        .map_err(search_error)
}

pub(super) async fn delete_application(
    documents: &dyn DocumentStore,
    index: &str,
    payload: PayloadDeleteApplication,
) -> Result<(), TaskError> {
    require_doc_id(&payload.doc_id)?;
    documents
        .delete_by_id(index, &payload.doc_id)
        .await
        .map_err(search_error)
}

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{DocumentStore, DocumentVersion, SearchError, VersionedDocument};

const PRIMARY_TERM: u64 = 1;

type DocumentKey = (String, String);

#[derive(Default)]
struct Documents {
    by_key: BTreeMap<DocumentKey, VersionedDocument>,
    seq_no: u64,
}

impl Documents {
    fn put(&mut self, key: DocumentKey, source: Value) {
        self.seq_no += 1;
        let version = DocumentVersion {
            seq_no: self.seq_no,
            primary_term: PRIMARY_TERM,
        };
        self.by_key.insert(key, VersionedDocument { source, version });
    }
}

fn key(index: &str, id: &str) -> DocumentKey {
    (index.to_string(), id.to_string())
}

fn conflict(index: &str, id: &str) -> SearchError {
    SearchError::Status {
        status: 409,
        body: format!("version conflict on document {} in {}", id, index),
    }
}

/// Document store kept in process memory, used by tests and local runs.
///
/// Every write bumps a store-wide sequence number, mirroring `_seq_no` on a
/// single-shard index.
#[derive(Clone, Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<Mutex<Documents>>,
    writes: Arc<AtomicUsize>,
    failing_writes: Arc<AtomicUsize>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` write operations fail with a 503 status.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of write operations that reached the store (failed ones included).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.documents
            .lock()
            .await
            .by_key
            .get(&key(index, id))
            .map(|doc| doc.source.clone())
    }

    pub async fn len(&self, index: &str) -> usize {
        self.documents
            .lock()
            .await
            .by_key
            .keys()
            .filter(|(i, _)| i == index)
            .count()
    }

    pub async fn insert(&self, index: &str, id: &str, document: Value) {
        self.documents.lock().await.put(key(index, id), document);
    }

    fn record_write(&self) -> Result<(), SearchError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SearchError::Status {
                status: 503,
                body: "search backend unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn index_by_id(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> Result<(), SearchError> {
        self.record_write()?;
        self.insert(index, id, document.clone()).await;
        Ok(())
    }

    async fn update_by_id(
        &self,
        index: &str,
        id: &str,
        partial: &Value,
    ) -> Result<(), SearchError> {
        self.record_write()?;
        let mut documents = self.documents.lock().await;
        let mut merged = documents
            .by_key
            .get(&key(index, id))
            .map(|doc| doc.source.clone())
            .ok_or_else(|| SearchError::Status {
                status: 404,
                body: format!("document {} missing in {}", id, index),
            })?;

        match (merged.as_object_mut(), partial.as_object()) {
            (Some(target), Some(fields)) => {
                for (field, value) in fields {
                    target.insert(field.clone(), value.clone());
                }
            }
            _ => {
                return Err(SearchError::Status {
                    status: 400,
                    body: "partial update requires an object".to_string(),
                })
            }
        }
        documents.put(key(index, id), merged);
        Ok(())
    }

    async fn index_if_version(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        expected: Option<DocumentVersion>,
    ) -> Result<(), SearchError> {
        self.record_write()?;
        let mut documents = self.documents.lock().await;
        let current = documents.by_key.get(&key(index, id)).map(|doc| doc.version);
        if current != expected {
            return Err(conflict(index, id));
        }
        documents.put(key(index, id), document.clone());
        Ok(())
    }

    async fn delete_by_id(&self, index: &str, id: &str) -> Result<(), SearchError> {
        self.record_write()?;
        let mut documents = self.documents.lock().await;
        if documents.by_key.remove(&key(index, id)).is_some() {
            documents.seq_no += 1;
        }
        Ok(())
    }

    async fn get_by_id(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<VersionedDocument>, SearchError> {
        Ok(self.documents.lock().await.by_key.get(&key(index, id)).cloned())
    }
}

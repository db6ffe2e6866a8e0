//! Keyed document store (search index)
//!
//! The worker only needs id-addressed operations: full index, partial update,
//! delete and get. Query features of the index are out of scope here.
//!
//! Read-modify-write goes through [`DocumentStore::index_if_version`]: the write
//! only lands if the document still has the version returned by `get_by_id`, so
//! two handlers editing the same document cannot overwrite each other.

use async_trait::async_trait;
use serde_json::Value;

mod elasticsearch;
mod memory;

pub use elasticsearch::ElasticsearchClient;
pub use memory::InMemoryDocumentStore;

pub const CANDIDATES_INDEX: &str = "candidates";
pub const CANDIDATE_APPLICATIONS_INDEX: &str = "candidate_applications";
pub const EMPLOYER_APPLICATIONS_INDEX: &str = "employer_applications";

/// Elasticsearch optimistic concurrency token (`_seq_no`, `_primary_term`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentVersion {
    pub seq_no: u64,
    pub primary_term: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub source: Value,
    pub version: DocumentVersion,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("search backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid search response: {0}")]
    InvalidResponse(String),

    #[error("invalid search url: {0}")]
    InvalidUrl(String),
}

impl SearchError {
    /// Whether retrying the same request may succeed.
    ///
    /// Client errors are permanent except 404 (document not indexed yet),
    /// 408, 409 (version conflict) and 429. Server errors and transport
    /// failures are transient.
    pub fn is_transient(&self) -> bool {
        match self {
            SearchError::Transport(_) => true,
            SearchError::Status { status, .. } => {
                !(400..500).contains(status) || matches!(status, 404 | 408 | 409 | 429)
            }
            SearchError::InvalidResponse(_) | SearchError::InvalidUrl(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchError::Status { status: 404, .. })
    }

    /// The document changed since it was read (or already exists on create).
    pub fn is_conflict(&self) -> bool {
        matches!(self, SearchError::Status { status: 409, .. })
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or fully replace the document at `id`.
    async fn index_by_id(&self, index: &str, id: &str, document: &Value)
        -> Result<(), SearchError>;

    /// Merge `partial` into the existing document. Fails with a 404 status when the
    /// document does not exist.
    async fn update_by_id(&self, index: &str, id: &str, partial: &Value)
        -> Result<(), SearchError>;

    /// Delete the document at `id`. Deleting a missing document succeeds.
    async fn delete_by_id(&self, index: &str, id: &str) -> Result<(), SearchError>;

    /// Write `document` only if the stored document is still at `expected`.
    /// `None` means create: the write fails if a document already exists.
    /// A mismatch fails with a 409 status.
    async fn index_if_version(
        &self,
        index: &str,
        id: &str,
        document: &Value,
        expected: Option<DocumentVersion>,
    ) -> Result<(), SearchError>;

    async fn get_by_id(&self, index: &str, id: &str)
        -> Result<Option<VersionedDocument>, SearchError>;
}

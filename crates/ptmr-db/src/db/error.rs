use ptmr_core::models::ApplicationStatus;

/// Failures of a single relational operation.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("invalid application status request: {0} (use accepted or rejected)")]
    InvalidStatus(ApplicationStatus),

    #[error("database unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a coupled transaction. The variant tells which side failed; in every
/// case none of the transaction's writes are visible afterwards.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    #[error("failed to begin transaction: {0}")]
    Begin(#[source] DbError),

    #[error("transaction mutation failed: {0}")]
    Mutation(#[source] DbError),

    #[error("transaction after-effect failed: {0:#}")]
    AfterEffect(#[source] anyhow::Error),

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] DbError),
}

impl TxError {
    /// The relational error behind this failure, if the failure was relational.
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            TxError::Begin(e) | TxError::Mutation(e) | TxError::Commit(e) => Some(e),
            TxError::AfterEffect(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.db_error(), Some(DbError::NotFound(_)))
    }
}

//! Database transaction utilities
//!
//! [`run_in_transaction`] performs one mutation and, while the transaction is still
//! open, runs an after-effect built from the mutation's result. The transaction
//! commits only if both succeed.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;

use super::error::{DbError, TxError};
use super::queries::{OutboxWriter, Queries};

/// Boxed future borrowing the open transaction for `'t`.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = T> + Send + 't>>;

/// Something that can run relational operations atomically.
#[async_trait]
pub trait TransactionExecutor: Send + Sync {
    type Tx: Queries + OutboxWriter + Send;

    async fn begin(&self) -> Result<Self::Tx, DbError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), DbError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), DbError>;
}

/// Execute `mutation` and then `after_effect` within one transaction
///
/// Any failure rolls the transaction back, so either the mutation and every write
/// made by the after-effect are committed together, or nothing is.
///
/// # Example
///
/// ```ignore
/// use ptmr_db::db::transaction::run_in_transaction;
///
/// let candidate = run_in_transaction(
///     &store,
///     |tx| Box::pin(async move { tx.create_candidate(params).await }),
///     |tx, candidate| Box::pin(async move {
///         tx.stage(entry_for(candidate)?).await?;
///         Ok(())
///     }),
/// )
/// .await?;
/// ```
pub async fn run_in_transaction<E, R, M, A>(
    executor: &E,
    mutation: M,
    after_effect: A,
) -> Result<R, TxError>
where
    E: TransactionExecutor + ?Sized,
    R: Send + Sync,
    M: for<'t> FnOnce(&'t mut E::Tx) -> TxFuture<'t, Result<R, DbError>> + Send,
    A: for<'t> FnOnce(&'t mut E::Tx, &'t R) -> TxFuture<'t, anyhow::Result<()>> + Send,
{
    let mut tx = executor.begin().await.map_err(TxError::Begin)?;

    let result = match mutation(&mut tx).await {
        Ok(result) => result,
        Err(e) => {
            rollback_quietly(executor, tx).await;
            return Err(TxError::Mutation(e));
        }
    };

    if let Err(e) = after_effect(&mut tx, &result).await {
        rollback_quietly(executor, tx).await;
        return Err(TxError::AfterEffect(e));
    }

    executor.commit(tx).await.map_err(TxError::Commit)?;
    Ok(result)
}

/// Roll back after a failure. A failed rollback is logged and never replaces the
/// error that caused it.
async fn rollback_quietly<E>(executor: &E, tx: E::Tx)
where
    E: TransactionExecutor + ?Sized,
{
    if let Err(e) = executor.rollback(tx).await {
        tracing::warn!(error = %e, "Failed to roll back transaction");
    }
}

//! Database repositories and transaction utilities
//!
//! `transaction` holds the coupled-transaction primitive, `store` the coupled
//! operations built on it. `postgres` and `memory` are the two executors.
//
// Error types
pub mod error;
//
// Transaction utilities
pub mod transaction;
//
// Typed relational operations and outbox staging
pub mod queries;
//
// Coupled operations
pub mod store;
//
// Backends
pub mod broker;
pub mod memory;
pub mod postgres;

pub use broker::PgTaskBroker;
pub use error::{DbError, TxError};
pub use memory::MemoryStore;
pub use postgres::{PgStore, PgTx};
pub use queries::{
    CreateApplicationParams, CreateCandidateParams, CreatePastExperienceParams,
    DeleteApplicationParams, DeletePastExperienceParams, DeletedPastExperience, OutboxWriter,
    Queries, UpdateApplicationStatusParams, UpdateCandidateParams, UpdatePastExperienceParams,
};
pub use store::{StagedTasks, Store};
pub use transaction::{run_in_transaction, TransactionExecutor, TxFuture};

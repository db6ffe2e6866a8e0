//! ptmr Database Layer
//!
//! Coupled relational transactions (write + staged side effect), the task outbox,
//! and the Postgres task broker. An in-memory backend implements the same traits
//! for tests and local runs.

pub mod db;

pub use db::{
    run_in_transaction, DbError, MemoryStore, OutboxWriter, PgStore, PgTaskBroker, Queries,
    StagedTasks, Store, TransactionExecutor, TxError, TxFuture,
};

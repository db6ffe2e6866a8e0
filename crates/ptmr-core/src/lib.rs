//! ptmr Core Library
//!
//! This crate provides the task model, payload codec, domain models, error types and
//! configuration shared by the ptmr store, services and worker crates.

pub mod broker;
pub mod config;
pub mod error;
pub mod models;
pub mod outbox;
pub mod task_error;

// Re-export commonly used types
pub use broker::TaskBroker;
pub use config::WorkerConfig;
pub use error::{BrokerError, PayloadError};
pub use outbox::{NewOutboxEntry, OutboxEntry, OutboxSource};
pub use task_error::{TaskError, TaskResultExt};

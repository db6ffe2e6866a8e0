//! ptmr worker
//!
//! Producer and consumer sides of the task queue that keeps the search index and
//! outgoing email in sync with the relational store:
//! - [`TaskDistributor`] encodes payloads and enqueues them;
//! - [`OutboxRelay`] publishes tasks staged by coupled transactions after commit;
//! - [`TaskProcessor`] runs weighted worker pools and applies the retry policy;
//! - [`SideEffectHandlers`] perform the idempotent side effects.

pub mod broker;
pub mod distributor;
pub mod events;
pub mod handlers;
pub mod processor;
pub mod relay;
pub mod telemetry;

pub use broker::MemoryBroker;
pub use distributor::{EnqueueError, TaskDistributor};
pub use events::{DeadReason, LoggingHook, TaskEvent, TaskEventHook, TaskOutcome};
pub use handlers::SideEffectHandlers;
pub use processor::{
    HandlerContext, ProcessorConfig, ProcessorError, TaskHandler, TaskProcessor,
};
pub use relay::{OutboxRelay, RelayConfig, RelayError};

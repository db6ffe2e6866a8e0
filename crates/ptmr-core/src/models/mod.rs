//! Data models shared across the workspace
//!
//! `task` and `payload` describe deferred work; `candidate` and `application` are
//! the relational rows the coupled transactions write.

mod application;
mod candidate;
mod payload;
mod task;

pub use application::*;
pub use candidate::*;
pub use payload::*;
pub use task::*;

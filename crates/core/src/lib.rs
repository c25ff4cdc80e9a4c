//! Domain models for maintenance tasks and the client-side view of the task
//! collection kept in sync with the remote change feed.

pub mod errors;
pub mod sync;
pub mod tasks;

pub use errors::{CoreError, Result};

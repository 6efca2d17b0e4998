//! Task manager actor
//!
//! The TaskManager owns the authoritative in-memory queue. It processes
//! commands via channels and dispatches one task at a time to the executor.

mod manager;
mod messages;

pub use manager::TaskManager;
pub use messages::{QueueCommand, QueueError, QueueResponse, RemoveOutcome};

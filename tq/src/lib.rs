//! TaskQueue - sequential background task queue
//!
//! Shell commands are queued with a working directory and run one at a time,
//! strictly in the order they were added. The first invocation that finds no
//! daemon becomes the daemon; it stays resident until the queue has been idle
//! for a configured window.
//!
//! # Modules
//!
//! - [`queue`] - Task manager actor owning all task state
//! - [`executor`] - Runs one task at a time and records the outcome
//! - [`history`] - Append-only JSONL record of finished tasks
//! - [`control`] - Request handlers and the idle watchdog
//! - [`ipc`] - Unix socket protocol between clients and the daemon
//! - [`daemon`] - Election lock and daemon bootstrap
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod control;
pub mod daemon;
pub mod domain;
pub mod executor;
pub mod history;
pub mod ipc;
pub mod queue;

// Re-export commonly used types
pub use config::{Config, DaemonConfig, StorageConfig};
pub use control::{ControlPlane, IdleGate, Watchdog, WatchdogHandle};
pub use daemon::{DaemonLock, Role, RunningDaemon, VERSION, elect};
pub use domain::{Task, TaskId, TaskStatus, format_duration};
pub use executor::Executor;
pub use history::{HistoryError, HistoryResult, HistoryStore};
pub use ipc::{DaemonClient, Request, Response};
pub use queue::{QueueCommand, QueueError, QueueResponse, RemoveOutcome, TaskManager};

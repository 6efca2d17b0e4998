//! Task manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Task, TaskId};

/// Errors from task manager operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task manager is not running")]
    ChannelError,

    #[error("Daemon is shutting down")]
    Closed,
}

/// Response from task manager operations
pub type QueueResponse<T> = Result<T, QueueError>;

/// What a remove request did to the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The task was queued and is now removed
    Removed,
    /// The task had already been removed earlier
    AlreadyRemoved,
    /// The task is executing and cannot be removed
    Running,
    /// The task already succeeded or failed
    Finished,
    /// No task with that id in this daemon's queue
    NotFound,
}

/// Commands sent to the TaskManager actor
#[derive(Debug)]
pub enum QueueCommand {
    /// Assign the next id and queue the task; dispatch it if nothing is running
    Enqueue {
        task: Task,
        reply: oneshot::Sender<QueueResponse<TaskId>>,
    },

    /// Mark a queued task as removed
    Remove {
        id: TaskId,
        reply: oneshot::Sender<RemoveOutcome>,
    },

    /// Copy of every task this daemon knows, in ascending id order
    Snapshot { reply: oneshot::Sender<Vec<Task>> },

    /// The executor finished a task; advance to the next eligible one
    Completion { task: Task },

    /// Refuse further enqueues if nothing is running; replies whether it closed
    Close { reply: oneshot::Sender<bool> },

    /// Stop the actor loop
    Shutdown,
}

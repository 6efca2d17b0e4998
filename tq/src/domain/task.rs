//! Task domain type
//!
//! One queued shell command together with its full lifecycle metadata.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Task identifier, unique and monotonically increasing across daemon lifetimes
pub type TaskId = u64;

/// Task lifecycle status
///
/// Legal transitions: queued -> running -> {success, failed} and queued -> removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue
    #[default]
    Queued,
    /// Handed to the executor
    Running,
    /// Command exited with code 0
    Success,
    /// Command could not be spawned or exited unsuccessfully
    Failed,
    /// Removed from the queue before it ran
    Removed,
}

impl TaskStatus {
    /// Terminal states never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Removed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// A shell command submitted to the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Assigned by the task manager on enqueue (0 until then)
    #[serde(default)]
    pub id: TaskId,

    /// Shell command line, executed through `sh -c`
    pub command: String,

    /// Working directory the command runs in
    pub path: PathBuf,

    #[serde(default)]
    pub enqueue_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,

    /// Process exit code; `None` if the process never ran or was killed by a signal
    #[serde(default)]
    pub exit_code: Option<i32>,

    #[serde(default)]
    pub status: TaskStatus,

    /// Description of the execution error, if any
    #[serde(default)]
    pub error: Option<String>,

    /// File holding the captured stdout and stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Task {
    /// Create a new queued task that has not been assigned an id yet
    pub fn new(command: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let command = command.into();
        let path = path.into();
        debug!(%command, ?path, "Task::new: called");
        Self {
            id: 0,
            command,
            path,
            enqueue_time: None,
            start_time: None,
            end_time: None,
            exit_code: None,
            status: TaskStatus::Queued,
            error: None,
            log_file: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time spent waiting in the queue, if the task has started
    pub fn queue_duration(&self) -> Option<chrono::Duration> {
        Some(self.start_time? - self.enqueue_time?)
    }

    /// Time spent executing, if the task has finished
    pub fn run_duration(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }

    /// Record a successful or unsuccessful process exit
    pub fn finish(&mut self, exit_code: Option<i32>, error: Option<String>) {
        debug!(id = self.id, ?exit_code, ?error, "Task::finish: called");
        self.end_time = Some(Utc::now());
        self.exit_code = exit_code;
        self.status = if exit_code == Some(0) && error.is_none() {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
        self.error = error;
    }
}

/// Render a duration as `1h 2m 3s`, or `-` when unknown
pub fn format_duration(duration: Option<chrono::Duration>) -> String {
    let Some(duration) = duration else {
        return "-".to_string();
    };
    let total = duration.num_seconds().max(0);
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}

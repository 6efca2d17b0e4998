//! Executor - runs one task at a time
//!
//! Receives tasks from the task manager, runs each command through `sh -c`
//! with both output streams captured to the task's log file, appends the
//! final state to the history store, and reports completion back to the
//! task manager's mailbox. A task whose record could not be written is
//! reported as failed.

use std::fs::{File, OpenOptions};
use std::process::Stdio;

use chrono::Utc;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::domain::{Task, TaskStatus};
use crate::history::HistoryStore;
use crate::queue::QueueCommand;

/// Sequential command runner
pub struct Executor {
    history: HistoryStore,
    mailbox: mpsc::Sender<QueueCommand>,
}

impl Executor {
    pub fn new(history: HistoryStore, mailbox: mpsc::Sender<QueueCommand>) -> Self {
        Self { history, mailbox }
    }

    /// Start the executor loop, returning the channel tasks are dispatched on
    pub fn spawn(self) -> mpsc::Sender<Task> {
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(self.run(rx));
        tx
    }

    async fn run(self, mut rx: mpsc::Receiver<Task>) {
        debug!("Executor started");
        while let Some(task) = rx.recv().await {
            let mut task = self.execute(task).await;

            if let Err(e) = self.history.append(&task).await {
                error!(id = task.id, error = %e, "Failed to append task to history");
                record_history_failure(&mut task, &e);
            }

            if self.mailbox.send(QueueCommand::Completion { task }).await.is_err() {
                debug!("Executor: task manager is gone, stopping");
                break;
            }
        }
        debug!("Executor stopped");
    }

    /// Run a single task to completion and return its final state
    pub async fn execute(&self, mut task: Task) -> Task {
        let log_path = match &task.log_file {
            Some(path) => path.clone(),
            None => {
                let path = self.history.new_capture_path();
                task.log_file = Some(path.clone());
                path
            }
        };
        info!(id = task.id, command = %task.command, log = ?log_path, "Executing task");

        let (stdout, stderr) = match open_capture(&log_path) {
            Ok(pair) => pair,
            Err(e) => {
                error!(id = task.id, error = %e, "Failed to open log file");
                task.start_time = Some(Utc::now());
                task.finish(None, Some(format!("Failed to open log file {}: {}", log_path.display(), e)));
                return task;
            }
        };

        task.start_time = Some(Utc::now());
        let result = Command::new("sh")
            .arg("-c")
            .arg(&task.command)
            .current_dir(&task.path)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .status()
            .await;

        match result {
            Ok(status) if status.success() => {
                debug!(id = task.id, "execute: command succeeded");
                task.finish(Some(0), None);
            }
            Ok(status) => {
                debug!(id = task.id, ?status, "execute: command failed");
                task.finish(status.code(), Some(status.to_string()));
            }
            Err(e) => {
                debug!(id = task.id, error = %e, "execute: failed to spawn");
                task.finish(None, Some(format!("Failed to execute command: {}", e)));
            }
        }

        info!(id = task.id, status = %task.status, exit_code = ?task.exit_code, "Task execution finished");
        task
    }
}

fn record_history_failure(task: &mut Task, err: &crate::history::HistoryError) {
    let failure = format!("Failed to record task in history: {}", err);
    task.error = Some(match task.error.take() {
        Some(earlier) => format!("{}; {}", earlier, failure),
        None => failure,
    });
    task.status = TaskStatus::Failed;
}

/// Open the capture file once and share it between stdout and stderr
fn open_capture(path: &std::path::Path) -> std::io::Result<(File, File)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let err = file.try_clone()?;
    Ok((file, err))
}

//! TaskManager - actor that owns the task queue
//!
//! All queue mutation arrives as [`QueueCommand`]s on a single bounded mailbox
//! and is processed one message at a time. Nothing outside the actor holds a
//! reference to the queue; readers receive copies.
//!
//! The queue is an explicit FIFO of pending ids plus an index by id. At most
//! one task is handed to the executor at a time, and dispatch order is
//! strictly ascending by id.
//!
//! Once closed for shutdown the queue rejects new tasks, so nothing is
//! accepted that the exiting daemon would never run.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::domain::{Task, TaskId, TaskStatus};
use crate::executor::Executor;
use crate::history::HistoryStore;

use super::messages::{QueueCommand, QueueError, QueueResponse, RemoveOutcome};

/// Handle to send commands to the TaskManager
#[derive(Debug, Clone)]
pub struct TaskManager {
    tx: mpsc::Sender<QueueCommand>,
}

impl TaskManager {
    /// Seed ids from the history store, then spawn the actor and its executor
    pub async fn start(history: HistoryStore, capacity: usize) -> eyre::Result<Self> {
        debug!(capacity, "start: called");
        let next_id = history.max_id().await?.map_or(1, |max| max + 1);
        info!(next_id, "TaskManager resuming id assignment");
        Ok(Self::spawn(history, next_id, capacity))
    }

    /// Spawn the actor with an executor that runs commands for real
    pub fn spawn(history: HistoryStore, next_id: TaskId, capacity: usize) -> Self {
        debug!(next_id, capacity, "spawn: called");
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let dispatch = Executor::new(history.clone(), tx.clone()).spawn();
        tokio::spawn(actor_loop(QueueState::new(history, next_id, dispatch), rx));
        info!("TaskManager spawned");
        Self { tx }
    }

    /// Spawn the actor with a caller-provided dispatch channel
    ///
    /// The receiver side plays the executor: it gets each dispatched task and
    /// must report back through [`TaskManager::complete`].
    pub fn with_dispatcher(
        history: HistoryStore,
        next_id: TaskId,
        capacity: usize,
        dispatch: mpsc::Sender<Task>,
    ) -> Self {
        debug!(next_id, capacity, "with_dispatcher: called");
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(actor_loop(QueueState::new(history, next_id, dispatch), rx));
        Self { tx }
    }

    /// Queue a task and return its assigned id
    pub async fn enqueue(&self, task: Task) -> QueueResponse<TaskId> {
        debug!(command = %task.command, "enqueue: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueueCommand::Enqueue { task, reply: reply_tx })
            .await
            .map_err(|_| QueueError::ChannelError)?;
        reply_rx.await.map_err(|_| QueueError::ChannelError)?
    }

    /// Close the queue to new tasks unless one is running
    ///
    /// Returns `true` once closed. Closing is final: later enqueues fail with
    /// [`QueueError::Closed`].
    pub async fn close_if_idle(&self) -> QueueResponse<bool> {
        debug!("close_if_idle: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueueCommand::Close { reply: reply_tx })
            .await
            .map_err(|_| QueueError::ChannelError)?;
        reply_rx.await.map_err(|_| QueueError::ChannelError)
    }

    /// Mark a queued task as removed
    pub async fn remove(&self, id: TaskId) -> QueueResponse<RemoveOutcome> {
        debug!(id, "remove: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueueCommand::Remove { id, reply: reply_tx })
            .await
            .map_err(|_| QueueError::ChannelError)?;
        reply_rx.await.map_err(|_| QueueError::ChannelError)
    }

    /// Copy of all tasks in ascending id order
    pub async fn snapshot(&self) -> QueueResponse<Vec<Task>> {
        debug!("snapshot: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(QueueCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| QueueError::ChannelError)?;
        reply_rx.await.map_err(|_| QueueError::ChannelError)
    }

    /// Report that a dispatched task reached success or failure
    pub async fn complete(&self, task: Task) -> QueueResponse<()> {
        debug!(id = task.id, status = %task.status, "complete: called");
        self.tx
            .send(QueueCommand::Completion { task })
            .await
            .map_err(|_| QueueError::ChannelError)
    }

    /// Shutdown the TaskManager
    pub async fn shutdown(&self) -> QueueResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(QueueCommand::Shutdown)
            .await
            .map_err(|_| QueueError::ChannelError)
    }

    // === Convenience methods ===

    /// Look up a single task in this daemon's queue
    pub async fn get(&self, id: TaskId) -> QueueResponse<Option<Task>> {
        debug!(id, "get: called");
        Ok(self.snapshot().await?.into_iter().find(|t| t.id == id))
    }
}

/// State exclusively owned by the actor task
struct QueueState {
    tasks: HashMap<TaskId, Task>,
    pending: VecDeque<TaskId>,
    running: Option<TaskId>,
    next_id: TaskId,
    closed: bool,
    history: HistoryStore,
    dispatch: mpsc::Sender<Task>,
}

impl QueueState {
    fn new(history: HistoryStore, next_id: TaskId, dispatch: mpsc::Sender<Task>) -> Self {
        Self {
            tasks: HashMap::new(),
            pending: VecDeque::new(),
            running: None,
            next_id,
            closed: false,
            history,
            dispatch,
        }
    }

    async fn enqueue(&mut self, mut task: Task) -> QueueResponse<TaskId> {
        if self.closed {
            info!(command = %task.command, "Rejecting task, queue is closed");
            return Err(QueueError::Closed);
        }
        let id = self.next_id;
        self.next_id += 1;

        task.id = id;
        task.status = TaskStatus::Queued;
        task.enqueue_time = Some(Utc::now());
        info!(id, command = %task.command, path = ?task.path, "Task enqueued");

        self.tasks.insert(id, task);
        self.pending.push_back(id);

        if self.running.is_none() {
            self.dispatch_next().await;
        }
        Ok(id)
    }

    fn close(&mut self) -> bool {
        if self.running.is_some() {
            debug!(running = ?self.running, "close: task running, staying open");
            return false;
        }
        self.closed = true;
        info!("Task queue closed");
        true
    }

    fn remove(&mut self, id: TaskId) -> RemoveOutcome {
        let Some(task) = self.tasks.get_mut(&id) else {
            debug!(id, "remove: unknown id");
            return RemoveOutcome::NotFound;
        };
        match task.status {
            TaskStatus::Queued => {
                task.status = TaskStatus::Removed;
                info!(id, "Task removed");
                RemoveOutcome::Removed
            }
            TaskStatus::Removed => RemoveOutcome::AlreadyRemoved,
            TaskStatus::Running => {
                debug!(id, "remove: task is running, ignoring");
                RemoveOutcome::Running
            }
            TaskStatus::Success | TaskStatus::Failed => RemoveOutcome::Finished,
        }
    }

    fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    async fn complete(&mut self, task: Task) {
        let id = task.id;
        if self.running != Some(id) {
            warn!(id, running = ?self.running, "Completion for a task that was not running");
            return;
        }
        info!(id, status = %task.status, exit_code = ?task.exit_code, "Task finished");
        self.running = None;
        self.tasks.insert(id, task);
        self.dispatch_next().await;
    }

    /// Hand the lowest pending id that is still queued to the executor
    async fn dispatch_next(&mut self) {
        while let Some(id) = self.pending.pop_front() {
            let Some(task) = self.tasks.get_mut(&id) else {
                continue;
            };
            if task.status != TaskStatus::Queued {
                debug!(id, status = %task.status, "dispatch_next: skipping");
                continue;
            }

            task.status = TaskStatus::Running;
            task.start_time = Some(Utc::now());
            task.log_file = Some(self.history.new_capture_path());
            let dispatched = task.clone();
            self.running = Some(id);
            debug!(id, "dispatch_next: dispatching");

            if self.dispatch.send(dispatched).await.is_err() {
                error!(id, "Executor is gone, task cannot run");
                if let Some(task) = self.tasks.get_mut(&id) {
                    task.finish(None, Some("Executor unavailable".to_string()));
                }
                self.running = None;
                continue;
            }
            return;
        }
        debug!("dispatch_next: queue drained, idle");
    }
}

/// The actor loop that owns the queue and processes commands
async fn actor_loop(mut state: QueueState, mut rx: mpsc::Receiver<QueueCommand>) {
    debug!("TaskManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            QueueCommand::Enqueue { task, reply } => {
                debug!("actor_loop: Enqueue command");
                let _ = reply.send(state.enqueue(task).await);
            }

            QueueCommand::Close { reply } => {
                debug!("actor_loop: Close command");
                let _ = reply.send(state.close());
            }

            QueueCommand::Remove { id, reply } => {
                debug!(id, "actor_loop: Remove command");
                let _ = reply.send(state.remove(id));
            }

            QueueCommand::Snapshot { reply } => {
                debug!("actor_loop: Snapshot command");
                let _ = reply.send(state.snapshot());
            }

            QueueCommand::Completion { task } => {
                debug!(id = task.id, "actor_loop: Completion command");
                state.complete(task).await;
            }

            QueueCommand::Shutdown => {
                info!("TaskManager shutting down");
                break;
            }
        }
    }

    debug!("TaskManager actor stopped");
}

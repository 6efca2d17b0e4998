//! Control plane request handling
//!
//! One connection carries one request. Handlers run concurrently, but every
//! mutation goes through the task manager's mailbox.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use super::format::{format_listing, format_task};
use super::watchdog::WatchdogHandle;
use crate::daemon::VERSION;
use crate::domain::{Task, TaskId};
use crate::history::HistoryStore;
use crate::ipc::{Request, Response, read_message, send_response};
use crate::queue::{QueueError, RemoveOutcome, TaskManager};

impl From<QueueError> for Response {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Closed => Response::shutting_down(),
            QueueError::ChannelError => Response::error(e.to_string()),
        }
    }
}

/// Serves control-plane requests for one daemon lifetime
#[derive(Debug, Clone)]
pub struct ControlPlane {
    manager: TaskManager,
    history: HistoryStore,
    watchdog: WatchdogHandle,
}

impl ControlPlane {
    pub fn new(manager: TaskManager, history: HistoryStore, watchdog: WatchdogHandle) -> Self {
        Self {
            manager,
            history,
            watchdog,
        }
    }

    /// Accept connections until the task is aborted
    pub async fn serve(self, listener: UnixListener) {
        info!("ControlPlane: accepting connections");
        let this = Arc::new(self);
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let this = Arc::clone(&this);
                    tokio::spawn(async move { this.handle_connection(stream).await });
                }
                Err(e) => {
                    warn!(error = %e, "ControlPlane: accept failed");
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: UnixStream) {
        // Malformed requests still count as activity
        self.watchdog.touch();

        let response = match read_message(&mut stream).await {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                warn!(error = %e, "ControlPlane: rejecting request");
                Response::error(format!("{e:#}"))
            }
        };

        if let Err(e) = send_response(&mut stream, &response).await {
            debug!(error = %e, "ControlPlane: client went away before the response");
        }
    }

    /// Dispatch one decoded request
    pub async fn handle(&self, request: Request) -> Response {
        debug!(request = request.name(), "handle: called");
        match request {
            Request::Add { command, path } => self.add(command, path).await,
            Request::Get { id } => self.get(id).await,
            Request::List { short } => self.list(short).await,
            Request::Remove { id } => self.remove(id).await,
            Request::History => self.history().await,
            Request::Clean => self.clean().await,
            Request::Ping => Response::Pong {
                version: VERSION.to_string(),
            },
        }
    }

    async fn add(&self, command: String, path: PathBuf) -> Response {
        if command.trim().is_empty() {
            return Response::error("Empty command");
        }
        info!(%command, ?path, "add: queueing task");
        match self.manager.enqueue(Task::new(command, path)).await {
            Ok(id) => {
                debug!(id, "add: task queued");
                Response::text("Task added")
            }
            Err(e) => e.into(),
        }
    }

    async fn get(&self, id: TaskId) -> Response {
        match self.manager.get(id).await {
            Ok(Some(task)) => return Response::text(format_task(&task)),
            Ok(None) => {}
            Err(e) => return e.into(),
        }

        match self.history.find(id).await {
            Ok(Some(task)) => Response::text(format_task(&task)),
            Ok(None) => Response::not_found(),
            Err(e) => {
                error!(id, error = %e, "get: history lookup failed");
                Response::error(e.to_string())
            }
        }
    }

    async fn list(&self, short: bool) -> Response {
        match self.manager.snapshot().await {
            Ok(tasks) => Response::text(format_listing(&tasks, short)),
            Err(e) => e.into(),
        }
    }

    async fn remove(&self, id: TaskId) -> Response {
        match self.manager.remove(id).await {
            Ok(RemoveOutcome::Removed | RemoveOutcome::AlreadyRemoved) => Response::text("Task removed"),
            Ok(RemoveOutcome::NotFound) => Response::not_found(),
            Ok(RemoveOutcome::Running) => Response::text("Task is running, not removed"),
            Ok(RemoveOutcome::Finished) => Response::text("Task already finished, not removed"),
            Err(e) => e.into(),
        }
    }

    /// Everything that finished before the oldest task this daemon still holds
    async fn history(&self) -> Response {
        let live = match self.manager.snapshot().await {
            Ok(tasks) => tasks,
            Err(e) => return e.into(),
        };
        let before = live
            .iter()
            .min_by_key(|t| t.id)
            .and_then(|t| t.enqueue_time)
            .unwrap_or_else(Utc::now);

        match self.history.query(before).await {
            Ok(mut tasks) => {
                tasks.sort_by_key(|t| t.id);
                Response::text(format_listing(&tasks, false))
            }
            Err(e) => {
                error!(error = %e, "history: query failed");
                Response::error(e.to_string())
            }
        }
    }

    async fn clean(&self) -> Response {
        let keep: Vec<PathBuf> = match self.manager.snapshot().await {
            Ok(tasks) => tasks.into_iter().filter_map(|t| t.log_file).collect(),
            Err(e) => return e.into(),
        };

        match self.history.purge(&keep).await {
            Ok(removed) => {
                info!(removed, "clean: storage purged");
                Response::text(format!("Storage cleaned ({removed} files removed)"))
            }
            Err(e) => {
                error!(error = %e, "clean: purge failed");
                Response::error(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Watchdog;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    struct Harness {
        plane: ControlPlane,
        history: HistoryStore,
        dispatch_rx: mpsc::Receiver<Task>,
        temp: TempDir,
    }

    /// Control plane whose dispatched tasks land in a channel instead of running
    async fn harness() -> Harness {
        let temp = TempDir::new().unwrap();
        let history = HistoryStore::open(temp.path()).await.unwrap();
        let (dispatch_tx, dispatch_rx) = mpsc::channel(16);
        let manager = TaskManager::with_dispatcher(history.clone(), 1, 16, dispatch_tx);
        let (watchdog, _shutdown) = Watchdog::spawn(Duration::from_secs(3600), Arc::new(manager.clone()));
        Harness {
            plane: ControlPlane::new(manager, history.clone(), watchdog),
            history,
            dispatch_rx,
            temp,
        }
    }

    fn body(response: Response) -> String {
        match response {
            Response::Text { body } => body,
            other => panic!("expected text, got {other:?}"),
        }
    }

    fn add(command: &str) -> Request {
        Request::Add {
            command: command.to_string(),
            path: PathBuf::from("/tmp"),
        }
    }

    #[tokio::test]
    async fn test_add_then_list() {
        let h = harness().await;
        assert_eq!(h.plane.handle(add("echo a")).await, Response::text("Task added"));
        assert_eq!(h.plane.handle(add("echo b")).await, Response::text("Task added"));

        let out = body(h.plane.handle(Request::List { short: true }).await);
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("[1]") && lines[1].contains("running"));
        assert!(lines[2].starts_with("[2]") && lines[2].contains("queued"));
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let h = harness().await;
        assert!(matches!(h.plane.handle(add("  ")).await, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_remove_outcomes() {
        let h = harness().await;
        h.plane.handle(add("sleep 1")).await;
        h.plane.handle(add("sleep 2")).await;

        assert_eq!(
            h.plane.handle(Request::Remove { id: 1 }).await,
            Response::text("Task is running, not removed")
        );
        assert_eq!(h.plane.handle(Request::Remove { id: 2 }).await, Response::text("Task removed"));
        assert_eq!(h.plane.handle(Request::Remove { id: 2 }).await, Response::text("Task removed"));
        assert_eq!(h.plane.handle(Request::Remove { id: 9 }).await, Response::not_found());
    }

    #[tokio::test]
    async fn test_get_falls_back_to_history() {
        let h = harness().await;
        let mut old = Task::new("echo old", "/tmp");
        old.id = 42;
        old.start_time = Some(Utc::now());
        old.finish(Some(0), None);
        h.history.append(&old).await.unwrap();

        let out = body(h.plane.handle(Request::Get { id: 42 }).await);
        assert!(out.contains("echo old"));
        assert!(out.contains("success"));

        assert_eq!(h.plane.handle(Request::Get { id: 43 }).await, Response::not_found());
    }

    #[tokio::test]
    async fn test_history_excludes_live_session() {
        let mut h = harness().await;
        let mut old = Task::new("echo earlier", "/tmp");
        old.id = 7;
        old.start_time = Some(Utc::now() - chrono::Duration::seconds(10));
        old.finish(Some(1), Some("exit status: 1".to_string()));
        old.end_time = Some(Utc::now() - chrono::Duration::seconds(5));
        h.history.append(&old).await.unwrap();

        h.plane.handle(add("echo now")).await;
        let _running = h.dispatch_rx.recv().await.unwrap();

        let out = body(h.plane.handle(Request::History).await);
        assert!(out.lines().next().unwrap().contains("ExitCode"));
        assert!(out.contains("echo earlier"));
        assert!(!out.contains("echo now"));
    }

    #[tokio::test]
    async fn test_clean_keeps_live_logs() {
        let mut h = harness().await;
        h.plane.handle(add("echo live")).await;
        let running = h.dispatch_rx.recv().await.unwrap();
        let live_log = running.log_file.clone().unwrap();
        std::fs::write(&live_log, "live").unwrap();
        std::fs::write(h.temp.path().join("1.log"), "old").unwrap();

        let out = body(h.plane.handle(Request::Clean).await);
        // The history file and the stale capture
        assert_eq!(out, "Storage cleaned (2 files removed)");
        assert!(live_log.exists());
        assert!(h.history.history_file().exists());
    }

    #[tokio::test]
    async fn test_add_after_close_asks_client_to_reelect() {
        let mut h = harness().await;
        assert!(h.plane.manager.close_if_idle().await.unwrap());

        assert_eq!(h.plane.handle(add("echo late")).await, Response::shutting_down());
        assert_eq!(body(h.plane.handle(Request::List { short: true }).await).lines().count(), 1);
        assert!(h.dispatch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ping_reports_version() {
        let h = harness().await;
        assert_eq!(
            h.plane.handle(Request::Ping).await,
            Response::Pong {
                version: VERSION.to_string()
            }
        );
    }
}

//! Idle watchdog
//!
//! Counts down from the last control-plane request. When the window expires
//! and no task is running, it closes the queue and fires the shutdown signal
//! exactly once. If a task is still running at expiry the window is re-armed
//! in full.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::queue::TaskManager;

/// Resets queued but not yet seen by the watchdog; one is as good as many
const ACTIVITY_BUFFER: usize = 16;

/// Stops new work from being accepted once the daemon has gone idle
#[async_trait]
pub trait IdleGate: Send + Sync {
    /// Close to new work unless a task is in flight; `true` means closed
    async fn close_if_idle(&self) -> bool;
}

#[async_trait]
impl IdleGate for TaskManager {
    async fn close_if_idle(&self) -> bool {
        // A manager that no longer answers accepts nothing anyway
        TaskManager::close_if_idle(self).await.unwrap_or(true)
    }
}

/// Handle used by the control plane to report activity
#[derive(Debug, Clone)]
pub struct WatchdogHandle {
    activity: mpsc::Sender<()>,
}

impl WatchdogHandle {
    /// Restart the idle window
    pub fn touch(&self) {
        // A full buffer already holds a pending reset
        let _ = self.activity.try_send(());
    }
}

pub struct Watchdog {
    idle: Duration,
    gate: Arc<dyn IdleGate>,
    activity_rx: mpsc::Receiver<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl Watchdog {
    /// Start the watchdog; the receiver resolves when the daemon should shut down
    pub fn spawn(idle: Duration, gate: Arc<dyn IdleGate>) -> (WatchdogHandle, oneshot::Receiver<()>) {
        let (activity, activity_rx) = mpsc::channel(ACTIVITY_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let watchdog = Self {
            idle,
            gate,
            activity_rx,
            shutdown_tx,
        };
        tokio::spawn(watchdog.run());

        (WatchdogHandle { activity }, shutdown_rx)
    }

    async fn run(mut self) {
        debug!(idle = ?self.idle, "Watchdog: started");
        let mut deadline = Instant::now() + self.idle;

        loop {
            tokio::select! {
                msg = self.activity_rx.recv() => {
                    match msg {
                        Some(()) => {
                            debug!("Watchdog: activity, window restarted");
                            deadline = Instant::now() + self.idle;
                        }
                        None => {
                            debug!("Watchdog: all handles dropped, stopping");
                            return;
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    if self.gate.close_if_idle().await {
                        info!("Idle window expired, requesting shutdown");
                        let _ = self.shutdown_tx.send(());
                        return;
                    }
                    info!("Idle window expired while a task is running, extending");
                    deadline = Instant::now() + self.idle;
                }
            }
        }
    }
}

//! Daemon election and bootstrap
//!
//! Every invocation first pings the control socket. A live daemon makes this
//! process a client. Otherwise the process races for an exclusive lock on the
//! lock file; the holder becomes the daemon and the others become clients that
//! wait for it to start listening.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{Context, Result};
use fs2::FileExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::control::{ControlPlane, Watchdog};
use crate::history::HistoryStore;
use crate::ipc::{self, DaemonClient};
use crate::queue::TaskManager;

/// Crate version, reported by `tq version` and in ping replies
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

fn is_lock_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Exclusive hold on the election lock; released on drop
#[derive(Debug)]
pub struct DaemonLock {
    file: File,
    path: PathBuf,
}

impl DaemonLock {
    /// Try to take the lock without waiting
    ///
    /// Returns `Ok(None)` when another process holds it. The holder's pid is
    /// written into the file for diagnostics.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        debug!(?path, "DaemonLock::try_acquire: called");

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create lock directory")?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .context("Failed to open lock file")?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                // Only the holder may rewrite the contents
                file.set_len(0).context("Failed to truncate lock file")?;
                file.seek(SeekFrom::Start(0))?;
                writeln!(file, "{}", std::process::id()).context("Failed to write pid to lock file")?;
                info!(?path, pid = std::process::id(), "Acquired daemon lock");
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(e) if is_lock_contended(&e) => {
                debug!(?path, "DaemonLock::try_acquire: held by another process");
                Ok(None)
            }
            Err(e) => Err(e).context("Failed to lock daemon lock file"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DaemonLock {
    fn drop(&mut self) {
        debug!(path = ?self.path, "DaemonLock: releasing");
        let _ = FileExt::unlock(&self.file);
    }
}

/// What this invocation turned out to be
#[derive(Debug)]
pub enum Role {
    /// A daemon is (or is about to be) listening; submit the operation to it
    Client,
    /// This process won the election and must start the daemon
    Daemon(DaemonLock),
}

/// Decide whether this process is the daemon or a client
pub async fn elect(client: &DaemonClient, lock_path: &Path) -> Result<Role> {
    debug!(?lock_path, "elect: called");
    match client.ping().await {
        Ok(version) => {
            debug!(%version, "elect: daemon already running");
            return Ok(Role::Client);
        }
        Err(e) => {
            debug!(error = %e, "elect: ping failed, contending for the lock");
        }
    }

    match DaemonLock::try_acquire(lock_path)? {
        Some(lock) => Ok(Role::Daemon(lock)),
        None => {
            info!("Another process is starting the daemon, acting as client");
            Ok(Role::Client)
        }
    }
}

/// Components of a daemon that is listening for requests
pub struct RunningDaemon {
    manager: TaskManager,
    server: JoinHandle<()>,
    shutdown: Option<oneshot::Receiver<()>>,
    socket_path: PathBuf,
    _lock: DaemonLock,
}

impl RunningDaemon {
    /// Start task manager, watchdog and control plane under the election lock
    pub async fn start(config: &Config, lock: DaemonLock) -> Result<Self> {
        debug!(lock = ?lock.path(), "RunningDaemon::start: called");
        let history = HistoryStore::open(&config.storage.dir)
            .await
            .context("Failed to open history store")?;
        let manager = TaskManager::start(history.clone(), config.daemon.mailbox_capacity).await?;

        let socket_path = config.daemon.socket_path.clone();
        let listener = ipc::create_listener_at(&socket_path)?;

        let (watchdog, shutdown) = Watchdog::spawn(config.daemon.idle_timeout(), Arc::new(manager.clone()));
        let plane = ControlPlane::new(manager.clone(), history, watchdog);
        let server = tokio::spawn(plane.serve(listener));
        info!(?socket_path, version = VERSION, "Daemon listening");

        Ok(Self {
            manager,
            server,
            shutdown: Some(shutdown),
            socket_path,
            _lock: lock,
        })
    }

    /// Fires once the idle watchdog decides the daemon should exit
    ///
    /// Can be taken once; later calls return `None`.
    pub fn take_shutdown_signal(&mut self) -> Option<oneshot::Receiver<()>> {
        self.shutdown.take()
    }

    /// Stop accepting requests and remove the socket
    ///
    /// The lock stays held, so a new invocation waits for [`stop`](Self::stop)
    /// before it can become the next daemon.
    pub fn close(&mut self) {
        info!("Daemon closing control socket");
        self.server.abort();
        ipc::cleanup_socket(&self.socket_path);
    }

    /// Stop accepting requests, remove the socket and release the lock
    pub async fn stop(mut self) {
        info!("Daemon stopping");
        self.close();
        if let Err(e) = self.manager.shutdown().await {
            warn!(error = %e, "Task manager already stopped");
        }
        debug!("RunningDaemon::stop: complete");
    }
}

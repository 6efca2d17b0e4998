//! Inter-Process Communication between client invocations and the daemon
//!
//! The control plane listens on a Unix Domain Socket at a fixed path. Each
//! connection carries exactly one request line and one response line.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::DaemonClient;
pub use listener::{cleanup_socket, create_listener_at, read_message, send_response};
pub use messages::{Request, Response};

/// Largest request line accepted by the daemon
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;

/// Directory holding the socket and the election lock
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("taskqueue")
}

/// Default socket path for daemon IPC
pub fn default_socket_path() -> PathBuf {
    runtime_dir().join("daemon.sock")
}

/// Default path of the election lock file
pub fn default_lock_path() -> PathBuf {
    runtime_dir().join("daemon.lock")
}

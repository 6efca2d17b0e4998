//! Control-plane client
//!
//! Used by every invocation, including the elected daemon submitting its own
//! originating operation, to talk to the daemon over its Unix Domain Socket.

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::Instant;
use tracing::debug;

use super::MAX_REQUEST_SIZE;
use super::messages::{Request, Response};
use crate::domain::TaskId;

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between connection attempts while waiting for a daemon to bind
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Client for communicating with the daemon via IPC
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
    connect_wait: Duration,
}

impl DaemonClient {
    /// Create a client for the socket at `socket_path`
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
            connect_wait: Duration::ZERO,
        }
    }

    /// Set a custom timeout for each read and write
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep retrying the connection for up to `wait`
    ///
    /// Used when another process has won the election but may not be
    /// listening yet.
    pub fn with_connect_wait(mut self, wait: Duration) -> Self {
        self.connect_wait = wait;
        self
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("DaemonClient: pinging daemon");
        match self.send(Request::Ping).await? {
            Response::Pong { version } => Ok(version),
            Response::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    pub async fn add(&self, command: impl Into<String>, path: impl Into<PathBuf>) -> Result<Response> {
        self.send(Request::Add {
            command: command.into(),
            path: path.into(),
        })
        .await
    }

    pub async fn get(&self, id: TaskId) -> Result<Response> {
        self.send(Request::Get { id }).await
    }

    pub async fn list(&self, short: bool) -> Result<Response> {
        self.send(Request::List { short }).await
    }

    pub async fn remove(&self, id: TaskId) -> Result<Response> {
        self.send(Request::Remove { id }).await
    }

    pub async fn history(&self) -> Result<Response> {
        self.send(Request::History).await
    }

    pub async fn clean(&self) -> Result<Response> {
        self.send(Request::Clean).await
    }

    /// Send a request to the daemon and wait for its response
    pub async fn send(&self, request: Request) -> Result<Response> {
        debug!(socket_path = ?self.socket_path, request = request.name(), "DaemonClient: sending request");
        let stream = self.connect().await?;
        self.send_on_stream(stream, request).await
    }

    /// Connect to the daemon, retrying for the configured connect wait
    ///
    /// Nothing has been sent when this fails, so the caller may safely retry
    /// the whole request elsewhere.
    pub async fn connect(&self) -> Result<UnixStream> {
        let deadline = Instant::now() + self.connect_wait;
        loop {
            let attempt = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
                .await
                .context("Connection timeout")
                .and_then(|r| r.context("Failed to connect to daemon socket"));
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(e) => {
                    debug!(error = %e, "DaemonClient: daemon not reachable yet, retrying");
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Send a request on an existing stream
    pub async fn send_on_stream(&self, mut stream: UnixStream, request: Request) -> Result<Response> {
        let msg_json = serde_json::to_string(&request).context("Failed to serialize request")?;

        if msg_json.len() > MAX_REQUEST_SIZE {
            return Err(eyre::eyre!("Request too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write request")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream);
        let mut response_line = String::new();

        tokio::time::timeout(self.timeout, reader.read_line(&mut response_line))
            .await
            .context("Read timeout")?
            .context("Failed to read response")?;

        if response_line.is_empty() {
            return Err(eyre::eyre!("Daemon closed the connection without responding"));
        }

        let response: Response =
            serde_json::from_str(response_line.trim()).context("Failed to parse daemon response")?;

        debug!(?response, "DaemonClient: received response");
        Ok(response)
    }
}

//! TaskQueue - sequential background task queue
//!
//! CLI entry point. Each invocation either hands its operation to a running
//! daemon or becomes the daemon itself.

use std::fs;
use std::io::Write;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use taskqueue::cli::{Cli, get_log_path};
use taskqueue::config::Config;
use taskqueue::daemon::{self, DaemonLock, Role, RunningDaemon, VERSION};
use taskqueue::ipc::{DaemonClient, Request, Response};

/// How long a client waits for an elected daemon to bind before electing again
const CONNECT_ATTEMPT_WAIT: Duration = Duration::from_millis(500);

/// Pause before electing again after reaching a daemon that is shutting down
const REELECT_DELAY: Duration = Duration::from_millis(100);

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    // Every invocation shares the file, so append instead of truncating
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    let Some(request) = cli.command.to_request()? else {
        println!("tq {}", VERSION);
        return Ok(());
    };

    let client = DaemonClient::new(&config.daemon.socket_path).with_timeout(config.daemon.request_timeout());

    // A daemon in its shutdown grace still holds the lock but takes no work,
    // so keep electing until it is gone or this invocation runs out of time
    let deadline = Instant::now() + config.daemon.request_timeout() + config.daemon.shutdown_grace();
    loop {
        if let Role::Daemon(lock) = daemon::elect(&client, &config.daemon.lock_path).await? {
            return run_daemon(&config, lock, &client, request).await;
        }
        debug!("main: running as client");

        // The winner of a concurrent election may still be binding its socket
        let waiting = client.clone().with_connect_wait(CONNECT_ATTEMPT_WAIT);
        let stream = match waiting.connect().await {
            Ok(stream) => stream,
            Err(e) if Instant::now() < deadline => {
                debug!(error = %e, "main: no daemon reachable, electing again");
                continue;
            }
            Err(e) => return Err(e),
        };

        match client.send_on_stream(stream, request.clone()).await? {
            Response::ShuttingDown { message } if Instant::now() < deadline => {
                debug!(%message, "main: daemon is shutting down, electing again");
                tokio::time::sleep(REELECT_DELAY).await;
            }
            response => return print_response(response),
        }
    }
}

/// Send one request and print the daemon's answer
async fn submit(client: &DaemonClient, request: Request) -> Result<()> {
    debug!(request = request.name(), "submit: called");
    print_response(client.send(request).await?)
}

fn print_response(response: Response) -> Result<()> {
    match response {
        Response::Text { body } => {
            println!("{}", body);
            Ok(())
        }
        Response::NotFound { message } => {
            println!("{}", message.yellow());
            Ok(())
        }
        Response::Pong { version } => {
            println!("Daemon already running (version {})", version);
            Ok(())
        }
        Response::Error { message } | Response::ShuttingDown { message } => {
            Err(eyre::eyre!("Daemon error: {}", message))
        }
    }
}

/// Stay resident until the idle watchdog or a signal ends the daemon
async fn run_daemon(config: &Config, lock: DaemonLock, client: &DaemonClient, request: Request) -> Result<()> {
    println!("{}", "Starting daemon...".green());
    let mut daemon = RunningDaemon::start(config, lock).await?;

    // This process is also the daemon's first client
    if let Err(e) = submit(client, request).await {
        eprintln!("{} {:#}", "Error:".red(), e);
    }

    let Some(mut idle_shutdown) = daemon.take_shutdown_signal() else {
        daemon.stop().await;
        return Ok(());
    };

    let mut heartbeat = tokio::time::interval(config.daemon.heartbeat());
    heartbeat.tick().await;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                print!("*");
                let _ = std::io::stdout().flush();
            }
            _ = &mut idle_shutdown => {
                println!();
                println!("Daemon idle, shutting down...");
                // Nothing new may arrive during the grace period
                daemon.close();
                tokio::time::sleep(config.daemon.shutdown_grace()).await;
                break;
            }
            _ = sigint.recv() => {
                warn!("SIGINT received");
                println!();
                break;
            }
            _ = sigterm.recv() => {
                warn!("SIGTERM received");
                break;
            }
        }
    }

    daemon.stop().await;
    info!("Daemon exited");
    Ok(())
}

//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use eyre::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::TaskId;
use crate::ipc::Request;

/// TaskQueue - run shell commands one at a time in the background
#[derive(Debug, Parser)]
#[command(
    name = "tq",
    about = "Sequential background task queue with an on-demand daemon",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help(),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Queue a shell command to run in the current directory
    Add {
        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// List tasks of the running daemon
    List {
        /// Only command, path, status and log file
        #[arg(short, long)]
        short: bool,
    },

    /// Show tasks finished by previous daemons
    History,

    /// Manage a single task
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Delete the history and stale output files
    Clean,

    /// Print the version and exit
    Version,
}

/// Single-task subcommands
#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Queue a shell command to run in the current directory
    Add {
        /// Command and its arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Remove a queued task
    Rm {
        /// Task ID
        id: TaskId,
    },

    /// Show one task in detail
    Get {
        /// Task ID
        id: TaskId,
    },
}

impl Command {
    /// The control-plane request this invocation submits
    ///
    /// `None` for commands answered locally without a daemon.
    pub fn to_request(&self) -> Result<Option<Request>> {
        debug!(command = ?self, "to_request: called");
        let request = match self {
            Self::Add { command } | Self::Task {
                command: TaskCommand::Add { command },
            } => {
                let cwd = std::env::current_dir().context("Failed to determine current directory")?;
                add_request(command, &cwd)
            }
            Self::List { short } => Request::List { short: *short },
            Self::History => Request::History,
            Self::Task {
                command: TaskCommand::Rm { id },
            } => Request::Remove { id: *id },
            Self::Task {
                command: TaskCommand::Get { id },
            } => Request::Get { id: *id },
            Self::Clean => Request::Clean,
            Self::Version => return Ok(None),
        };
        Ok(Some(request))
    }
}

fn add_request(words: &[String], cwd: &Path) -> Request {
    Request::Add {
        command: words.join(" "),
        path: cwd.to_path_buf(),
    }
}

/// Location of the shared log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskqueue")
        .join("logs")
        .join("tq.log")
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}

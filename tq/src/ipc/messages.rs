//! Control-plane message types
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::TaskId;

/// Requests from a client invocation to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum Request {
    /// Queue a shell command to run in `path`
    Add { command: String, path: PathBuf },

    /// Show one task in long form
    Get { id: TaskId },

    /// List this daemon's tasks in ascending id order
    List {
        #[serde(default)]
        short: bool,
    },

    /// Mark a queued task as removed
    Remove { id: TaskId },

    /// List tasks finished before the oldest live task
    History,

    /// Purge the history store
    Clean,

    /// Check whether a daemon is listening
    Ping,
}

impl Request {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Get { .. } => "get",
            Self::List { .. } => "list",
            Self::Remove { .. } => "remove",
            Self::History => "history",
            Self::Clean => "clean",
            Self::Ping => "ping",
        }
    }
}

/// Responses from the daemon to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Response {
    /// Plain tabulated text to print as-is
    Text { body: String },

    /// The requested task does not exist
    NotFound { message: String },

    /// Pong response to ping
    Pong { version: String },

    /// Error response
    Error { message: String },

    /// The daemon stopped accepting work; the client should elect again
    ShuttingDown { message: String },
}

impl Response {
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    pub fn not_found() -> Self {
        Self::NotFound {
            message: "Task not found".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn shutting_down() -> Self {
        Self::ShuttingDown {
            message: "Daemon is shutting down".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_serialize() {
        let msg = Request::Add {
            command: "echo hi".to_string(),
            path: PathBuf::from("/tmp"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"Add","command":"echo hi","path":"/tmp"}"#);
    }

    #[test]
    fn test_list_short_defaults_to_false() {
        let msg: Request = serde_json::from_str(r#"{"type":"List"}"#).unwrap();
        assert_eq!(msg, Request::List { short: false });
    }

    #[test]
    fn test_ping_serialize() {
        let json = serde_json::to_string(&Request::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = serde_json::from_str::<Request>(r#"{"type":"Get","id":1,"extra":true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<Request>(r#"{"type":"Shutdown"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_field_rejected() {
        let result = serde_json::from_str::<Request>(r#"{"type":"Remove"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_not_found_serialize() {
        let json = serde_json::to_string(&Response::not_found()).unwrap();
        assert_eq!(json, r#"{"type":"NotFound","message":"Task not found"}"#);
    }

    #[test]
    fn test_error_response_serialize() {
        let json = serde_json::to_string(&Response::error("Something went wrong")).unwrap();
        assert_eq!(json, r#"{"type":"Error","message":"Something went wrong"}"#);
    }

    #[test]
    fn test_shutting_down_serialize() {
        let json = serde_json::to_string(&Response::shutting_down()).unwrap();
        assert_eq!(json, r#"{"type":"ShuttingDown","message":"Daemon is shutting down"}"#);
    }

    #[test]
    fn test_request_names() {
        assert_eq!(Request::History.name(), "history");
        assert_eq!(Request::Remove { id: 1 }.name(), "remove");
    }
}

//! Protocol client: the initialize handshake, tool discovery, and tool
//! execution over either transport, with per-operation deadlines.

mod connection;
mod manager;

pub use connection::{ConnectionState, McpConnection, call_tool, discover_tools, test_connection};
pub use manager::ServerManager;

use serde::Serialize;
use thiserror::Error;

use crate::transport::TransportError;

/// Deadline for the connectivity probe.
pub const CONNECT_TIMEOUT_SECS: u64 = 5;
/// Deadline for a full discovery pass (initialize + tools/list).
pub const DISCOVER_TIMEOUT_SECS: u64 = 10;
/// Deadline for a single tool call on a local subprocess.
pub const CALL_TIMEOUT_SECS: u64 = 30;
/// Deadline for a single tool call on a remote server. Remote tool
/// execution is routinely slower than local.
pub const CALL_TIMEOUT_REMOTE_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("deadline of {seconds}s exceeded")]
    Timeout { seconds: u64 },
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("operation '{operation}' requires an initialized connection (state: {state})")]
    NotReady {
        operation: &'static str,
        state: ConnectionState,
    },
}

/// Outcome of a connectivity probe. Always a value, never a fault.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionReport {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a single tool invocation. A misbehaving or unreachable tool
/// server degrades capability; it never crashes the run, so errors arrive
/// here as data.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

//! Byte-level channels carrying JSON-RPC envelopes.
//!
//! Two implementations share one contract: a correlated request/response
//! exchange plus fire-and-forget notifications. Deadlines are owned by the
//! caller (the client tiers wrap each exchange in `tokio::time::timeout`);
//! `shutdown` is safe to call from the timeout path and is idempotent.

mod http;
mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::process::ExitStatus;
use thiserror::Error;

use crate::protocol::RpcResponse;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn MCP server '{server}': {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("MCP server '{server}' transport error: {message}")]
    Io { server: String, message: String },
    #[error("MCP server '{server}' replied with HTTP status {status}")]
    HttpStatus { server: String, status: u16 },
    #[error("MCP server '{server}' closed the connection")]
    Closed {
        server: String,
        exit: Option<ExitStatus>,
    },
    #[error("server '{server}' has no {field} configured for its '{transport}' transport")]
    Misconfigured {
        server: String,
        transport: &'static str,
        field: &'static str,
    },
}

impl TransportError {
    /// A zero-status exit is treated as benign by the loose connection
    /// probe: one-shot servers print their reply and quit.
    pub fn is_clean_exit(&self) -> bool {
        matches!(self, TransportError::Closed { exit: Some(status), .. } if status.success())
    }
}

/// One logical connection to a tool server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the envelope carrying its id.
    async fn request(&self, method: &str, params: Value) -> Result<RpcResponse, TransportError>;

    /// Send a notification; no response is expected.
    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError>;

    /// Tear the connection down. Idempotent; called on every exit path,
    /// including deadline expiry.
    async fn shutdown(&self);
}

//! One logical connection to a tool server, and the three operations the
//! rest of the system consumes.

use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::{
    CALL_TIMEOUT_REMOTE_SECS, CALL_TIMEOUT_SECS, CONNECT_TIMEOUT_SECS, ClientError,
    ConnectionReport, DISCOVER_TIMEOUT_SECS, ToolCallOutcome,
};
use crate::catalog::ToolDescriptor;
use crate::config::{ServerConfig, TransportKind};
use crate::protocol::RpcRequest;
use crate::transport::{HttpTransport, StdioTransport, Transport};

/// Lifecycle of a logical connection. `Closed` is terminal and reachable
/// from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Initializing,
    Ready,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Initializing => "initializing",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// A protocol connection over one of the two transports. The transport is
/// selected once from the declared kind; there is no runtime probing.
pub struct McpConnection {
    server: String,
    transport: Box<dyn Transport>,
    state: ConnectionState,
}

impl McpConnection {
    pub fn open(config: &ServerConfig) -> Result<Self, ClientError> {
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Stdio => Box::new(StdioTransport::spawn(config)?),
            TransportKind::Http | TransportKind::Sse => Box::new(HttpTransport::connect(config)?),
        };
        Ok(Self {
            server: config.name.clone(),
            transport,
            state: ConnectionState::Unconnected,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Perform the `initialize` handshake. Any subsequent request on this
    /// connection is only sent after the handshake response has been
    /// observed; the sequential awaits here are what guarantee it.
    pub async fn initialize(&mut self) -> Result<Value, ClientError> {
        if self.state != ConnectionState::Unconnected {
            return Err(ClientError::NotReady {
                operation: "initialize",
                state: self.state,
            });
        }
        self.state = ConnectionState::Initializing;

        let response = match self
            .transport
            .request("initialize", RpcRequest::initialize_params())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.close().await;
                return Err(err.into());
            }
        };

        let result = match response.into_result() {
            Ok(result) => result,
            Err(error) => {
                let mapped = ClientError::Rpc {
                    code: error.code,
                    message: error.message,
                };
                self.close().await;
                return Err(mapped);
            }
        };

        // Lenient servers may reject or ignore the notification; that is
        // not a handshake failure.
        if let Err(err) = self
            .transport
            .notify("notifications/initialized", json!({}))
            .await
        {
            debug!(server = %self.server, %err, "initialized notification not accepted");
        }

        self.state = ConnectionState::Ready;
        debug!(server = %self.server, "handshake complete");
        Ok(result)
    }

    /// `tools/list`, parsed into descriptors with namespaced full names.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>, ClientError> {
        self.require_ready("tools/list")?;
        let response = match self.transport.request("tools/list", json!({})).await {
            Ok(response) => response,
            Err(err) => {
                self.close().await;
                return Err(err.into());
            }
        };
        let result = response.into_result().map_err(|error| ClientError::Rpc {
            code: error.code,
            message: error.message,
        })?;
        Ok(parse_tool_list(&self.server, &result))
    }

    /// `tools/call` with `{name, arguments}` params.
    pub async fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<Value, ClientError> {
        self.require_ready("tools/call")?;
        let params = json!({
            "name": tool,
            "arguments": match arguments {
                Value::Null => Value::Object(Default::default()),
                other => other,
            },
        });
        let response = match self.transport.request("tools/call", params).await {
            Ok(response) => response,
            Err(err) => {
                self.close().await;
                return Err(err.into());
            }
        };
        response.into_result().map_err(|error| ClientError::Rpc {
            code: error.code,
            message: error.message,
        })
    }

    pub async fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            self.state = ConnectionState::Closed;
            self.transport.shutdown().await;
        }
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), ClientError> {
        if self.state != ConnectionState::Ready {
            return Err(ClientError::NotReady {
                operation,
                state: self.state,
            });
        }
        Ok(())
    }
}

fn parse_tool_list(server: &str, result: &Value) -> Vec<ToolDescriptor> {
    let Some(tools) = result.get("tools").and_then(Value::as_array) else {
        warn!(server, "tools/list result carried no tool array");
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|tool| {
            let name = tool.get("name").and_then(Value::as_str)?;
            let description = tool
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let schema = tool.get("inputSchema").cloned();
            Some(ToolDescriptor::new(server, name, description, schema))
        })
        .collect()
}

/// Open a transport, send `initialize`, and declare success on any
/// well-formed response. This is deliberately loose: a JSON-RPC error
/// envelope, or a zero-status exit from a one-shot stdio server, both
/// count as evidence of a working server. The 5 s deadline always tears
/// the transport down on expiry.
pub async fn test_connection(config: &ServerConfig) -> ConnectionReport {
    let mut conn = match McpConnection::open(config) {
        Ok(conn) => conn,
        Err(err) => return ConnectionReport::failed(err.to_string()),
    };

    let deadline = Duration::from_secs(CONNECT_TIMEOUT_SECS);
    let report = match timeout(deadline, conn.initialize()).await {
        Ok(Ok(_)) => ConnectionReport::ok(),
        // A protocol-level error is still a response from a live server.
        Ok(Err(ClientError::Rpc { .. })) => ConnectionReport::ok(),
        Ok(Err(ClientError::Transport(err))) if err.is_clean_exit() => ConnectionReport::ok(),
        Ok(Err(err)) => ConnectionReport::failed(err.to_string()),
        Err(_) => ConnectionReport::failed(
            ClientError::Timeout {
                seconds: CONNECT_TIMEOUT_SECS,
            }
            .to_string(),
        ),
    };

    conn.close().await;
    info!(server = %config.name, success = report.success, "connectivity test finished");
    report
}

/// Initialize and list tools under one 10 s deadline. Discovery never
/// fails its caller: every error path collapses to an empty list, with the
/// cause preserved in the log.
pub async fn discover_tools(config: &ServerConfig) -> Vec<ToolDescriptor> {
    let mut conn = match McpConnection::open(config) {
        Ok(conn) => conn,
        Err(err) => {
            warn!(server = %config.name, %err, "discovery failed to open transport");
            return Vec::new();
        }
    };

    let deadline = Duration::from_secs(DISCOVER_TIMEOUT_SECS);
    let listed = timeout(deadline, async {
        conn.initialize().await?;
        conn.list_tools().await
    })
    .await;

    let tools = match listed {
        Ok(Ok(tools)) => tools,
        Ok(Err(err)) => {
            warn!(server = %config.name, %err, "discovery failed");
            Vec::new()
        }
        Err(_) => {
            warn!(server = %config.name, "discovery timed out");
            Vec::new()
        }
    };

    conn.close().await;
    info!(server = %config.name, tools = tools.len(), "discovery finished");
    tools
}

/// Initialize and invoke one tool under the transport-appropriate
/// deadline (30 s local, 60 s remote). The outcome is always structured;
/// protocol errors and transport failures arrive as `success = false`.
pub async fn call_tool(config: &ServerConfig, tool: &str, arguments: Value) -> ToolCallOutcome {
    let mut conn = match McpConnection::open(config) {
        Ok(conn) => conn,
        Err(err) => return ToolCallOutcome::failed(err.to_string()),
    };

    let seconds = if config.transport.is_remote() {
        CALL_TIMEOUT_REMOTE_SECS
    } else {
        CALL_TIMEOUT_SECS
    };
    let called = timeout(Duration::from_secs(seconds), async {
        conn.initialize().await?;
        conn.call_tool(tool, arguments).await
    })
    .await;

    let outcome = match called {
        Ok(Ok(result)) => ToolCallOutcome::ok(result),
        Ok(Err(err)) => ToolCallOutcome::failed(err.to_string()),
        Err(_) => ToolCallOutcome::failed(ClientError::Timeout { seconds }.to_string()),
    };

    conn.close().await;
    info!(
        server = %config.name,
        tool,
        success = outcome.success,
        "tool call finished"
    );
    outcome
}

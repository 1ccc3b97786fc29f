//! Remote transport: JSON-RPC over HTTP POST, with optional
//! Server-Sent-Events response bodies (streamable HTTP servers).

use futures::StreamExt;
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{Transport, TransportError};
use crate::config::ServerConfig;
use crate::protocol::{RpcRequest, RpcResponse};

const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// One logical HTTP connection to a tool server.
///
/// Streamable HTTP servers issue a session identifier in the response
/// headers of the `initialize` call; once observed it is echoed on every
/// subsequent request of this transport instance and discarded with it.
#[derive(Debug)]
pub struct HttpTransport {
    server: String,
    url: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
    session: Mutex<Option<String>>,
    id_counter: AtomicU64,
}

impl HttpTransport {
    pub fn connect(config: &ServerConfig) -> Result<Self, TransportError> {
        let url = config.url.clone().ok_or(TransportError::Misconfigured {
            server: config.name.clone(),
            transport: "http",
            field: "url",
        })?;

        Ok(Self {
            server: config.name.clone(),
            url,
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            client: reqwest::Client::new(),
            session: Mutex::new(None),
            id_counter: AtomicU64::new(1),
        })
    }

    fn io_error(&self, message: impl Into<String>) -> TransportError {
        TransportError::Io {
            server: self.server.clone(),
            message: message.into(),
        }
    }

    async fn post(&self, envelope: &RpcRequest) -> Result<reqwest::Response, TransportError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, ACCEPT_BOTH)
            .json(envelope);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let session = self.session.lock().expect("session lock").clone();
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|err| self.io_error(err.to_string()))?;

        // The session identifier may appear on any reply; the initialize
        // response is where conforming servers put it.
        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            let mut slot = self.session.lock().expect("session lock");
            if slot.as_deref() != Some(session) {
                debug!(server = %self.server, "captured session identifier");
                *slot = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                server: self.server.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Scan an event-stream body for the envelope correlated to `id`.
    /// Only one response per request is needed, so this is a minimal
    /// `data:` line scanner rather than a general SSE consumer.
    async fn scan_event_stream(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<RpcResponse, TransportError> {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut data_lines: Vec<String> = Vec::new();

        loop {
            let chunk = match body.next().await {
                Some(chunk) => chunk.map_err(|err| self.io_error(err.to_string()))?,
                None => break,
            };
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                let line = line.trim_end_matches(['\n', '\r']);

                if let Some(payload) = line.strip_prefix("data:") {
                    data_lines.push(payload.trim_start().to_string());
                } else if line.is_empty() && !data_lines.is_empty() {
                    let event = data_lines.join("\n");
                    data_lines.clear();
                    if let Some(response) = self.match_event(&event, id) {
                        return Ok(response);
                    }
                }
                // Comment and `event:`/`id:` lines carry nothing we need.
            }
        }

        // Stream ended mid-event; some servers omit the trailing blank line.
        if !data_lines.is_empty() {
            let event = data_lines.join("\n");
            if let Some(response) = self.match_event(&event, id) {
                return Ok(response);
            }
        }

        Err(self.io_error("event stream ended without a correlated response"))
    }

    fn match_event(&self, event: &str, id: u64) -> Option<RpcResponse> {
        match serde_json::from_str::<RpcResponse>(event) {
            Ok(response) if response.id_u64() == Some(id) => Some(response),
            Ok(_) => {
                debug!(server = %self.server, "skipping uncorrelated event");
                None
            }
            Err(err) => {
                debug!(server = %self.server, %err, "skipping unparseable event");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<RpcResponse, TransportError> {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let envelope = RpcRequest::request(id, method, params);
        let response = self.post(&envelope).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            self.scan_event_stream(response, id).await
        } else {
            let body = response
                .text()
                .await
                .map_err(|err| self.io_error(err.to_string()))?;
            serde_json::from_str(&body)
                .map_err(|err| self.io_error(format!("invalid response body: {err}")))
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let envelope = RpcRequest::notification(method, params);
        // 202 Accepted with an empty body is the common reply.
        self.post(&envelope).await.map(|_| ())
    }

    async fn shutdown(&self) {
        // Nothing to tear down; the connection is per-request. The session
        // identifier dies with this instance.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_requires_a_url() {
        let config = ServerConfig {
            name: "remote".into(),
            transport: crate::config::TransportKind::Http,
            command: None,
            args: Vec::new(),
            env: Default::default(),
            url: None,
            headers: Default::default(),
        };
        let err = HttpTransport::connect(&config).expect_err("missing url");
        assert!(matches!(
            err,
            TransportError::Misconfigured { field: "url", .. }
        ));
    }
}

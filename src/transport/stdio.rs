//! Subprocess transport: one JSON document per line over piped stdio.

use serde_json::Value;
use std::collections::HashMap;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, warn};

use super::{Transport, TransportError};
use crate::config::ServerConfig;
use crate::protocol::{RpcRequest, RpcResponse};

/// A spawned tool server with line-framed JSON-RPC over its stdio.
///
/// Multiple requests may be in flight over the same child at once; a
/// background reader task routes each inbound envelope to the pending
/// request holding its id. Termination of the child is attempted exactly
/// once per transport instance, whether triggered by deadline expiry,
/// explicit shutdown, or the child closing its stdout.
#[derive(Clone, Debug)]
pub struct StdioTransport {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    server: String,
    writer: AsyncMutex<Option<BufWriter<ChildStdin>>>,
    child: AsyncMutex<Option<Child>>,
    pending: AsyncMutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
    exit: AsyncMutex<Option<ExitStatus>>,
    id_counter: AtomicU64,
    kill_attempted: AtomicBool,
    closed: AtomicBool,
}

impl StdioTransport {
    /// Spawn the configured command with its argument list and environment
    /// overlay, wiring stdin, stdout, and stderr as independent pipes.
    pub fn spawn(config: &ServerConfig) -> Result<Self, TransportError> {
        let command_path = config.command.as_deref().ok_or(TransportError::Misconfigured {
            server: config.name.clone(),
            transport: "stdio",
            field: "command",
        })?;

        let mut command = Command::new(command_path);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &config.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| TransportError::Spawn {
            server: config.name.clone(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| TransportError::Io {
            server: config.name.clone(),
            message: "failed to capture server stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Io {
            server: config.name.clone(),
            message: "failed to capture server stdout".into(),
        })?;
        let stderr = child.stderr.take();

        let inner = Arc::new(Inner {
            server: config.name.clone(),
            writer: AsyncMutex::new(Some(BufWriter::new(stdin))),
            child: AsyncMutex::new(Some(child)),
            pending: AsyncMutex::new(HashMap::new()),
            exit: AsyncMutex::new(None),
            id_counter: AtomicU64::new(1),
            kill_attempted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let reader = Arc::clone(&inner);
        tokio::spawn(async move {
            reader.reader_loop(stdout).await;
        });
        if let Some(stderr) = stderr {
            let diag = Arc::clone(&inner);
            tokio::spawn(async move {
                diag.stderr_loop(stderr).await;
            });
        }

        Ok(Self { inner })
    }

    /// Exit status of the child, once observed by the reader or reaper.
    pub async fn exit_status(&self) -> Option<ExitStatus> {
        *self.inner.exit.lock().await
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<RpcResponse, TransportError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(inner.closed_error().await);
        }

        let id = inner.id_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = inner.pending.lock().await;
            pending.insert(id, tx);
        }

        let envelope = RpcRequest::request(id, method, params);
        if let Err(err) = inner.write_line(&envelope).await {
            // A broken pipe means the child exited before the write
            // landed. Keep waiting: the reader task observes the EOF,
            // reaps the child, and fails this slot with the recorded exit
            // status, which the loose connection probe needs.
            debug!(server = %inner.server, %err, "write failed; awaiting connection closure");
        }

        // The reader task either delivers the correlated envelope or drops
        // the sender when the connection closes. A response already routed
        // to its slot wins over a concurrent exit observation.
        match rx.await {
            Ok(response) => Ok(response),
            Err(_) => Err(inner.closed_error().await),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let envelope = RpcRequest::notification(method, params);
        self.inner.write_line(&envelope).await
    }

    async fn shutdown(&self) {
        self.inner.close().await;
    }
}

impl Inner {
    async fn reader_loop(self: Arc<Self>, stdout: ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(raw)) => self.route_line(&raw).await,
                Ok(None) => break,
                Err(err) => {
                    debug!(server = %self.server, %err, "error reading server stdout");
                    break;
                }
            }
        }
        self.close().await;
    }

    /// Parse one stdout line and route it. Lines that are not JSON-RPC
    /// envelopes are discarded: some servers print banners or log noise on
    /// the protocol stream, and that must never be fatal.
    async fn route_line(&self, raw: &str) {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(value) => value,
            Err(_) => {
                debug!(server = %self.server, line = trimmed, "discarding non-protocol output line");
                return;
            }
        };

        if value.get("method").is_some() {
            // Server-initiated request or notification; outside this
            // client's request/response cycle.
            debug!(
                server = %self.server,
                method = value.get("method").and_then(serde_json::Value::as_str).unwrap_or_default(),
                "ignoring server-initiated message"
            );
            return;
        }

        let response: RpcResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(err) => {
                debug!(server = %self.server, %err, "discarding malformed envelope");
                return;
            }
        };

        let Some(id) = response.id_u64() else {
            debug!(server = %self.server, "discarding envelope without usable id");
            return;
        };

        let slot = self.pending.lock().await.remove(&id);
        match slot {
            Some(sender) => {
                let _ = sender.send(response);
            }
            None => {
                debug!(server = %self.server, response_id = id, "response for unknown request");
            }
        }
    }

    async fn stderr_loop(self: Arc<Self>, stderr: ChildStderr) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if !line.trim().is_empty() {
                debug!(server = %self.server, diagnostic = %line, "server stderr");
            }
        }
    }

    async fn write_line(&self, envelope: &RpcRequest) -> Result<(), TransportError> {
        let encoded = serde_json::to_string(envelope).map_err(|source| TransportError::Io {
            server: self.server.clone(),
            message: format!("failed to encode envelope: {source}"),
        })?;

        let mut writer = self.writer.lock().await;
        let stream = writer.as_mut().ok_or_else(|| TransportError::Io {
            server: self.server.clone(),
            message: "connection already closed".into(),
        })?;
        let write = async {
            stream.write_all(encoded.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        };
        write.await.map_err(|source| TransportError::Io {
            server: self.server.clone(),
            message: source.to_string(),
        })
    }

    /// Tear the child down and fail every pending request. The kill itself
    /// happens at most once; later callers only observe the recorded exit.
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        {
            let mut writer = self.writer.lock().await;
            writer.take();
        }

        if !self.kill_attempted.swap(true, Ordering::SeqCst) {
            let mut child_slot = self.child.lock().await;
            if let Some(mut child) = child_slot.take() {
                // A no-op on a child that already exited; `wait` then
                // reports the real exit status rather than the signal.
                if let Err(err) = child.kill().await {
                    debug!(server = %self.server, %err, "kill failed (process may have exited)");
                }
                match child.wait().await {
                    Ok(status) => {
                        let mut exit = self.exit.lock().await;
                        *exit = Some(status);
                    }
                    Err(err) => {
                        warn!(server = %self.server, %err, "failed to reap server process");
                    }
                }
            }
        }

        let mut pending = self.pending.lock().await;
        pending.clear();
    }

    async fn closed_error(&self) -> TransportError {
        TransportError::Closed {
            server: self.server.clone(),
            exit: *self.exit.lock().await,
        }
    }
}

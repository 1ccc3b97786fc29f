use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{AgentError, AgentEvent};
use crate::catalog::ToolDescriptor;
use crate::client::{ServerManager, ToolCallOutcome};
use crate::model::{ChatMessage, ContentBlock, ModelProvider, ModelRequest, Role};

/// Hard cap on model turns per run. Guarantees termination even against a
/// model that never stops requesting tools.
pub const MAX_TURNS: usize = 10;

/// Drives one conversation against the model endpoint, dispatching the
/// tool invocations it requests and feeding the results back.
///
/// Tool invocations within a batch run sequentially, in the order the
/// model requested them; deterministic ordering of the streamed
/// call/result events is worth more here than throughput.
pub struct AgentLoop<P> {
    provider: Arc<P>,
    servers: Arc<ServerManager>,
    model: String,
    max_turns: usize,
}

impl<P: ModelProvider> AgentLoop<P> {
    pub fn new(provider: Arc<P>, servers: Arc<ServerManager>, model: impl Into<String>) -> Self {
        Self {
            provider,
            servers,
            model: model.into(),
            max_turns: MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    /// Run to completion, cancellation, or the turn cap. Returns the
    /// accumulated assistant text; everything incremental (text chunks,
    /// tool calls, tool results) goes to `sink` as it happens.
    ///
    /// Cancellation is cooperative: it is checked before each model call
    /// and before each tool invocation. An invocation already dispatched
    /// is allowed to finish; the rest of its batch is skipped.
    pub async fn run(
        &self,
        mut conversation: Vec<ChatMessage>,
        enabled_tools: Vec<ToolDescriptor>,
        sink: mpsc::Sender<AgentEvent>,
        token: CancellationToken,
    ) -> Result<String, AgentError> {
        let mut transcript = String::new();

        for turn in 0..self.max_turns {
            if token.is_cancelled() {
                info!(turn, "run cancelled before model call");
                return Err(AgentError::Aborted);
            }

            debug!(turn, messages = conversation.len(), "submitting turn to model");
            let reply = self
                .provider
                .complete(ModelRequest {
                    model: self.model.clone(),
                    messages: conversation.clone(),
                    tools: enabled_tools.clone(),
                })
                .await?;

            let mut requested: Vec<(String, String, Value)> = Vec::new();
            for block in &reply.blocks {
                match block {
                    ContentBlock::Text { text } => {
                        transcript.push_str(text);
                        emit(&sink, AgentEvent::Text { text: text.clone() }).await;
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        requested.push((id.clone(), name.clone(), input.clone()));
                    }
                    ContentBlock::ToolResult { .. } => {
                        debug!("model emitted a tool_result block; ignoring");
                    }
                }
            }

            conversation.push(ChatMessage {
                role: Role::Assistant,
                blocks: reply.blocks.clone(),
            });

            // A natural stop with no pending invocations ends the run; a
            // turn that carries tool-use blocks is processed even if the
            // endpoint mislabels its stop reason.
            if requested.is_empty() {
                info!(turn, stop = ?reply.stop, "model finished without requesting tools");
                return Ok(transcript);
            }

            let mut results = Vec::with_capacity(requested.len());
            for (use_id, full_name, input) in requested {
                if token.is_cancelled() {
                    info!(tool = %full_name, "run cancelled; skipping remaining tool calls");
                    return Err(AgentError::Aborted);
                }

                emit(
                    &sink,
                    AgentEvent::ToolCall {
                        full_name: full_name.clone(),
                        input: input.clone(),
                    },
                )
                .await;

                let outcome = self.execute(&enabled_tools, &full_name, input).await;
                let content = match (&outcome.result, &outcome.error) {
                    (Some(result), _) => result.clone(),
                    (None, Some(error)) => json!({ "error": error }),
                    (None, None) => Value::Null,
                };

                emit(
                    &sink,
                    AgentEvent::ToolResult {
                        full_name: full_name.clone(),
                        success: outcome.success,
                        content: content.clone(),
                    },
                )
                .await;

                results.push(ContentBlock::ToolResult {
                    tool_use_id: use_id,
                    content,
                    is_error: !outcome.success,
                });
            }

            conversation.push(ChatMessage {
                role: Role::Tool,
                blocks: results,
            });
        }

        warn!(max_turns = self.max_turns, "run hit the turn cap");
        Ok(transcript)
    }

    /// A failed invocation (unknown name, disabled tool, unreachable
    /// server, protocol error) is an outcome, not a fault; the model
    /// reads the error text on its next turn.
    async fn execute(
        &self,
        enabled: &[ToolDescriptor],
        full_name: &str,
        input: Value,
    ) -> ToolCallOutcome {
        if !enabled.iter().any(|tool| tool.full_name == full_name) {
            warn!(tool = full_name, "model requested a tool outside the enabled set");
            return ToolCallOutcome::failed(format!(
                "tool \"{full_name}\" is not available in this run"
            ));
        }
        self.servers.call_full_name(full_name, input).await
    }
}

async fn emit(sink: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    // A departed caller stops listening; that must not abort the run.
    if sink.send(event).await.is_err() {
        debug!("event sink closed; continuing without streaming");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, TransportKind};
    use crate::model::{ModelError, ModelTurn, StopReason};
    use crate::runs::RunRegistry;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Plays back a fixed sequence of model turns.
    struct ScriptedProvider {
        turns: Mutex<Vec<ModelTurn>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<ModelTurn>) -> Self {
            Self {
                turns: Mutex::new(turns),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<ModelRequest> {
            self.requests.lock().expect("requests lock").clone()
        }
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        async fn complete(&self, request: ModelRequest) -> Result<ModelTurn, ModelError> {
            self.requests.lock().expect("requests lock").push(request);
            let mut turns = self.turns.lock().expect("turns lock");
            if turns.is_empty() {
                return Err(ModelError::invalid("script exhausted"));
            }
            Ok(turns.remove(0))
        }
    }

    fn text_turn(text: &str) -> ModelTurn {
        ModelTurn {
            blocks: vec![ContentBlock::Text { text: text.into() }],
            stop: StopReason::EndTurn,
        }
    }

    fn tool_turn(uses: Vec<(&str, &str)>) -> ModelTurn {
        ModelTurn {
            blocks: uses
                .into_iter()
                .map(|(id, name)| ContentBlock::ToolUse {
                    id: id.into(),
                    name: name.into(),
                    input: json!({}),
                })
                .collect(),
            stop: StopReason::ToolUse,
        }
    }

    fn scripted_server(name: &str, script: &str) -> ServerConfig {
        ServerConfig {
            name: name.into(),
            transport: TransportKind::Stdio,
            command: Some("sh".into()),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
        }
    }

    const PING_SCRIPT: &str = r#"
        read -r _init
        echo '{"jsonrpc":"2.0","id":1,"result":{}}'
        read -r _note
        read -r _call
        echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"pong"}]}}'
        sleep 2
    "#;

    const SLOW_PING_SCRIPT: &str = r#"
        read -r _init
        echo '{"jsonrpc":"2.0","id":1,"result":{}}'
        read -r _note
        read -r _call
        sleep 1
        echo '{"jsonrpc":"2.0","id":2,"result":{"content":[{"type":"text","text":"pong"}]}}'
        sleep 2
    "#;

    fn descriptor(server: &str, tool: &str) -> ToolDescriptor {
        ToolDescriptor::new(server, tool, "", None)
    }

    fn user_says(prompt: &str) -> Vec<ChatMessage> {
        vec![ChatMessage::text(Role::User, prompt)]
    }

    #[tokio::test]
    async fn plain_reply_ends_the_loop_in_one_turn() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("hello there")]));
        let servers = Arc::new(ServerManager::new(Vec::new()));
        let agent = AgentLoop::new(Arc::clone(&provider), servers, "test-model");

        let (tx, mut rx) = mpsc::channel(16);
        let out = agent
            .run(user_says("hi"), Vec::new(), tx, CancellationToken::new())
            .await
            .expect("run succeeds");

        assert_eq!(out, "hello there");
        assert_eq!(provider.requests().len(), 1);
        match rx.recv().await {
            Some(AgentEvent::Text { text }) => assert_eq!(text, "hello there"),
            other => panic!("expected text event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_exchange_feeds_the_result_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(vec![("call_1", "mcp__net__ping")]),
            text_turn("the server says pong"),
        ]));
        let servers = Arc::new(ServerManager::new(vec![scripted_server("net", PING_SCRIPT)]));
        let agent = AgentLoop::new(Arc::clone(&provider), servers, "test-model");

        let (tx, mut rx) = mpsc::channel(16);
        let out = agent
            .run(
                user_says("ping the server"),
                vec![descriptor("net", "ping")],
                tx,
                CancellationToken::new(),
            )
            .await
            .expect("run succeeds");
        assert_eq!(out, "the server says pong");

        // call event, then result event, then the final text.
        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolCall { .. })));
        match rx.recv().await {
            Some(AgentEvent::ToolResult { success, content, .. }) => {
                assert!(success);
                assert_eq!(content["content"][0]["text"], "pong");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(AgentEvent::Text { .. })));

        // The second model request must carry the exchange.
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let followup = &requests[1].messages;
        assert_eq!(followup.len(), 3);
        assert_eq!(followup[1].role, Role::Assistant);
        assert_eq!(followup[2].role, Role::Tool);
        assert!(matches!(
            followup[2].blocks[0],
            ContentBlock::ToolResult { is_error: false, .. }
        ));
    }

    #[tokio::test]
    async fn tool_failure_becomes_an_error_result_and_the_loop_continues() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(vec![("call_1", "mcp__ghost__anything")]),
            text_turn("that server is gone"),
        ]));
        // "ghost" is not configured at all.
        let servers = Arc::new(ServerManager::new(Vec::new()));
        let agent = AgentLoop::new(Arc::clone(&provider), servers, "test-model");

        let (tx, mut rx) = mpsc::channel(16);
        let out = agent
            .run(
                user_says("try the ghost"),
                vec![descriptor("ghost", "anything")],
                tx,
                CancellationToken::new(),
            )
            .await
            .expect("tool failure must not abort the run");
        assert_eq!(out, "that server is gone");

        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolCall { .. })));
        match rx.recv().await {
            Some(AgentEvent::ToolResult { success, content, .. }) => {
                assert!(!success);
                assert_eq!(content["error"], "MCP server \"ghost\" not found");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_tool_is_refused_without_reaching_a_server() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(vec![("call_1", "mcp__net__ping")]),
            text_turn("understood"),
        ]));
        let servers = Arc::new(ServerManager::new(vec![scripted_server("net", PING_SCRIPT)]));
        let agent = AgentLoop::new(provider, servers, "test-model");

        let (tx, mut rx) = mpsc::channel(16);
        // Enabled set is empty: the configured server must not be touched.
        let out = agent
            .run(user_says("ping"), Vec::new(), tx, CancellationToken::new())
            .await
            .expect("run succeeds");
        assert_eq!(out, "understood");

        assert!(matches!(rx.recv().await, Some(AgentEvent::ToolCall { .. })));
        match rx.recv().await {
            Some(AgentEvent::ToolResult { success, .. }) => assert!(!success),
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn turn_cap_bounds_a_tool_hungry_model() {
        let mut turns = Vec::new();
        for i in 0..20 {
            let id = format!("call_{i}");
            turns.push(tool_turn(vec![(id.as_str(), "mcp__net__ping")]));
        }
        let provider = Arc::new(ScriptedProvider::new(turns));
        let servers = Arc::new(ServerManager::new(Vec::new()));
        let agent = AgentLoop::new(Arc::clone(&provider), servers, "test-model").with_max_turns(3);

        let (tx, _rx) = mpsc::channel(64);
        agent
            .run(
                user_says("loop forever"),
                vec![descriptor("net", "ping")],
                tx,
                CancellationToken::new(),
            )
            .await
            .expect("cap ends the run without an error");
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn cancellation_lets_the_dispatched_call_finish_and_blocks_the_next() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_turn(vec![
            ("call_1", "mcp__net__ping"),
            ("call_2", "mcp__net__ping"),
        ])]));
        let servers = Arc::new(ServerManager::new(vec![scripted_server(
            "net",
            SLOW_PING_SCRIPT,
        )]));
        let agent = Arc::new(AgentLoop::new(provider, servers, "test-model"));

        let registry = RunRegistry::new();
        let guard = registry.register("run-cancel");
        let token = guard.token();

        let (tx, mut rx) = mpsc::channel(16);
        let enabled = vec![descriptor("net", "ping")];
        let handle = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move {
                agent.run(user_says("ping twice"), enabled, tx, token).await
            })
        };

        // Cancel while call 1 is in flight (its server sleeps first).
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            if matches!(event, AgentEvent::ToolCall { .. }) {
                registry.cancel("run-cancel");
            }
            events.push(event);
        }

        let result = handle.await.expect("task joins");
        assert!(matches!(result, Err(AgentError::Aborted)));

        let calls = events
            .iter()
            .filter(|event| matches!(event, AgentEvent::ToolCall { .. }))
            .count();
        let results: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                AgentEvent::ToolResult { success, .. } => Some(*success),
                _ => None,
            })
            .collect();
        assert_eq!(calls, 1, "call 2 must never start");
        assert_eq!(results, vec![true], "call 1 runs to completion");
    }

    #[tokio::test]
    async fn cancellation_before_the_first_model_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![text_turn("never sent")]));
        let servers = Arc::new(ServerManager::new(Vec::new()));
        let agent = AgentLoop::new(Arc::clone(&provider), servers, "test-model");

        let token = CancellationToken::new();
        token.cancel();
        let (tx, _rx) = mpsc::channel(4);
        let result = agent.run(user_says("hi"), Vec::new(), tx, token).await;
        assert!(matches!(result, Err(AgentError::Aborted)));
        assert!(provider.requests().is_empty());
    }
}

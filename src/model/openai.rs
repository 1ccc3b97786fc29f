//! OpenAI-compatible chat-completions client (works with OpenAI, Groq,
//! Mistral, Ollama's compatibility endpoint, and the like), including the
//! `tool_calls` wire format for tool-aware requests.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{ChatMessage, ContentBlock, ModelError, ModelProvider, ModelRequest, ModelTurn, Role, StopReason};
use crate::config::ModelConfig;

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key_env: Option<String>,
    api_key: Option<String>,
}

impl OpenAiProvider {
    /// Build from configuration. The API key, when required, is read once
    /// from the named environment variable; a missing variable surfaces on
    /// the first call, not at startup.
    pub fn from_config(config: &ModelConfig) -> Self {
        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key_env: config.api_key_env.clone(),
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait::async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelTurn, ModelError> {
        if let Some(var) = &self.api_key_env {
            if self.api_key.is_none() {
                return Err(ModelError::MissingApiKey { var: var.clone() });
            }
        }

        let payload = WireRequest {
            model: request.model.clone(),
            messages: to_wire_messages(&request.messages),
            tools: to_wire_tools(&request),
            stream: false,
        };

        info!(
            model = request.model.as_str(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let mut builder = self.client.post(self.endpoint()).json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|source| ModelError::Network { source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Endpoint {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let reply: WireResponse = response
            .json()
            .await
            .map_err(|source| ModelError::Network { source })?;
        debug!("received chat completion response");

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::invalid("no choices in response"))?;
        let message = choice
            .message
            .ok_or_else(|| ModelError::invalid("choice carried no message"))?;

        let mut blocks = Vec::new();
        if let Some(content) = message.content {
            if !content.is_empty() {
                blocks.push(ContentBlock::Text { text: content });
            }
        }
        let mut requested_tools = false;
        for call in message.tool_calls.unwrap_or_default() {
            requested_tools = true;
            let input: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
            blocks.push(ContentBlock::ToolUse {
                id: call.id,
                name: call.function.name,
                input,
            });
        }

        let stop = if requested_tools || choice.finish_reason.as_deref() == Some("tool_calls") {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };

        Ok(ModelTurn { blocks, stop })
    }
}

fn to_wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::System | Role::User => {
                wire.push(json!({
                    "role": role_label(message.role),
                    "content": message.plain_text(),
                }));
            }
            Role::Assistant => {
                let mut tool_calls = Vec::new();
                for block in &message.blocks {
                    if let ContentBlock::ToolUse { id, name, input } = block {
                        tool_calls.push(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            },
                        }));
                    }
                }
                let mut entry = json!({
                    "role": "assistant",
                    "content": message.plain_text(),
                });
                if !tool_calls.is_empty() {
                    entry["tool_calls"] = Value::Array(tool_calls);
                }
                wire.push(entry);
            }
            Role::Tool => {
                for block in &message.blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = block
                    {
                        wire.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": content.to_string(),
                        }));
                    }
                }
            }
        }
    }
    wire
}

fn to_wire_tools(request: &ModelRequest) -> Option<Vec<Value>> {
    if request.tools.is_empty() {
        return None;
    }
    let tools = request
        .tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.full_name,
                    "description": tool.description,
                    "parameters": tool
                        .input_schema
                        .clone()
                        .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
                },
            })
        })
        .collect();
    Some(tools)
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    stream: bool,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

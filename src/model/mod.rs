//! Model endpoint seam: conversation types and the provider trait the
//! agent loop drives.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::catalog::ToolDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One unit of model-visible content. Tool invocations and their results
/// travel through the conversation as first-class blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenation of the message's plain-text blocks.
    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        for block in &self.blocks {
            if let ContentBlock::Text { text } = block {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }
}

/// Why the model stopped emitting content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Natural end of turn; the loop finishes.
    EndTurn,
    /// The model wants tool results before continuing.
    ToolUse,
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// The enabled tool catalog, addressed by full name.
    pub tools: Vec<ToolDescriptor>,
}

/// One reply from the model endpoint.
#[derive(Debug, Clone)]
pub struct ModelTurn {
    pub blocks: Vec<ContentBlock>,
    pub stop: StopReason,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("network error calling model endpoint: {source}")]
    Network {
        #[source]
        source: reqwest::Error,
    },
    #[error("model endpoint requires an API key in ${var}")]
    MissingApiKey { var: String },
    #[error("model endpoint returned status {status}: {body}")]
    Endpoint { status: u16, body: String },
    #[error("model endpoint returned an invalid response: {reason}")]
    InvalidResponse { reason: String },
}

impl ModelError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            reason: reason.into(),
        }
    }
}

/// The single seam between the agent loop and whatever serves the model.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> Result<ModelTurn, ModelError>;
}

//! JSON-RPC 2.0 envelopes shared by both transports.
//!
//! Requests and responses are explicit tagged types rather than raw
//! `serde_json::Value` trees so that the `{result, error}` split is matched
//! exhaustively at every call site.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// An outbound JSON-RPC envelope. `id == None` marks a notification.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Standard `initialize` params: protocol revision, empty capability
    /// set, and the client identity.
    pub fn initialize_params() -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }
}

/// An inbound JSON-RPC envelope correlated to a request by `id`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub payload: RpcPayload,
}

/// The result-or-error split of a JSON-RPC response. A `result` field is
/// not required: lenient demo servers emit bare `{"jsonrpc":"2.0","id":1}`
/// acknowledgements, which parse as a `Null` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RpcPayload {
    Error {
        error: RpcErrorBody,
    },
    Result {
        #[serde(default)]
        result: Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default = "default_error_code")]
    pub code: i64,
    #[serde(default = "default_error_message")]
    pub message: String,
}

fn default_error_code() -> i64 {
    -32000
}

fn default_error_message() -> String {
    "unknown error".to_string()
}

impl RpcResponse {
    /// Numeric view of the correlation id, when the server sent one.
    /// String ids that parse as integers are accepted for lenient servers.
    pub fn id_u64(&self) -> Option<u64> {
        match self.id.as_ref()? {
            Value::Number(num) => num.as_u64(),
            Value::String(text) => text.parse().ok(),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Value, RpcErrorBody> {
        match self.payload {
            RpcPayload::Result { result } => Ok(result),
            RpcPayload::Error { error } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_id_for_notifications() {
        let note = RpcRequest::notification("notifications/initialized", json!({}));
        let encoded = serde_json::to_value(&note).expect("serialize");
        assert!(encoded.get("id").is_none());
        assert_eq!(encoded["jsonrpc"], "2.0");
    }

    #[test]
    fn response_splits_result_and_error() {
        let ok: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[]}}"#)
                .expect("parse result");
        assert!(matches!(ok.payload, RpcPayload::Result { .. }));
        assert_eq!(ok.id_u64(), Some(1));

        let err: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":"2","error":{"code":-32601,"message":"no such method"}}"#,
        )
        .expect("parse error");
        assert_eq!(err.id_u64(), Some(2));
        match err.payload {
            RpcPayload::Error { error } => {
                assert_eq!(error.code, -32601);
                assert_eq!(error.message, "no such method");
            }
            RpcPayload::Result { .. } => panic!("expected error payload"),
        }
    }

    #[test]
    fn error_body_defaults_fill_missing_fields() {
        let resp: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"error":{}}"#).expect("parse");
        match resp.into_result() {
            Err(body) => {
                assert_eq!(body.code, -32000);
                assert_eq!(body.message, "unknown error");
            }
            Ok(_) => panic!("expected error"),
        }
    }
}

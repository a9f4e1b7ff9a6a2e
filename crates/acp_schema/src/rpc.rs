use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const AUTH_REQUIRED: i64 = -32000;
pub const RESOURCE_NOT_FOUND: i64 = -32002;

/// A JSON-RPC request id: the wire allows both integers and strings, and the
/// two never compare equal even when they name the same number.
///
/// Ids minted by this SDK are integer-valued strings (`"1"`, `"2"`, ...),
/// strictly increasing from 1 for each connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Str(String),
}

impl RequestId {
    pub fn from_counter(n: u64) -> Self {
        Self::Str(n.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

/// The `error` member of a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("agent returned error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// Error response frame; `id` is null when the agent could not parse the
/// request it is answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    pub error: RpcError,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_id_round_trips_both_variants() {
        let number: RequestId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(number, RequestId::Number(7));
        assert_eq!(serde_json::to_value(&number).unwrap(), json!(7));

        let string: RequestId = serde_json::from_value(json!("7")).unwrap();
        assert_eq!(string, RequestId::Str("7".to_string()));
        assert_eq!(serde_json::to_value(&string).unwrap(), json!("7"));
    }

    #[test]
    fn request_id_equality_is_by_variant_and_value() {
        assert_ne!(RequestId::Number(7), RequestId::Str("7".to_string()));
        assert_eq!(RequestId::from_counter(3), RequestId::Str("3".to_string()));
    }

    #[test]
    fn request_frame_omits_missing_params() {
        let frame = JsonRpcRequest::new(RequestId::from_counter(1), "initialize", None);
        let encoded = serde_json::to_string(&frame).unwrap();
        assert_eq!(encoded, r#"{"jsonrpc":"2.0","id":"1","method":"initialize"}"#);
    }

    #[test]
    fn error_response_serializes_null_id() {
        let frame = JsonRpcErrorResponse::new(None, RpcError::new(PARSE_ERROR, "bad frame"));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(PARSE_ERROR));
    }
}

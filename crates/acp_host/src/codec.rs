use acp_schema::{RequestId, RpcError};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const PREVIEW_LIMIT: usize = 160;

/// A classified inbound JSON-RPC frame.
///
/// Responses keep their `result` as an uninterpreted [`Value`]; the caller
/// that issued the request decodes it into the type it expects.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Response {
        id: RequestId,
        result: Value,
    },
    Error {
        id: Option<RequestId>,
        error: RpcError,
    },
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
}

#[derive(Debug, Error)]
#[error("malformed frame: {reason} (payload: {preview})")]
pub struct CodecError {
    pub reason: String,
    pub preview: String,
}

impl CodecError {
    fn new(reason: impl Into<String>, payload: &str) -> Self {
        Self {
            reason: reason.into(),
            preview: preview(payload),
        }
    }
}

fn preview(payload: &str) -> String {
    if payload.len() <= PREVIEW_LIMIT {
        return payload.to_string();
    }
    let cut = payload
        .char_indices()
        .take_while(|(idx, _)| *idx < PREVIEW_LIMIT)
        .last()
        .map_or(0, |(idx, ch)| idx + ch.len_utf8());
    format!("{}…", &payload[..cut])
}

/// Serializes an outbound frame as a single line of UTF-8 JSON.
///
/// `serde_json` never escapes forward slashes, which some peers require.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Classifies one line from the byte stream. Returns `None` for lines the
/// reader skips silently: blank lines and stray non-JSON output (anything
/// not starting with `{`), which subprocess banners commonly produce.
pub fn classify_line(line: &str) -> Option<Result<InboundMessage, CodecError>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return None;
    }
    Some(match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => classify_value(value),
        Err(err) => Err(CodecError::new(err.to_string(), trimmed)),
    })
}

/// Classifies an already-parsed frame by probing its discriminant members:
/// `error`, then `id` + `result`, then `id` + `method`, then bare `method`.
/// Ambiguous frames are never guessed at.
pub fn classify_value(value: Value) -> Result<InboundMessage, CodecError> {
    let mut map = match value {
        Value::Object(map) => map,
        other => {
            return Err(CodecError::new(
                "frame is not a JSON object",
                &other.to_string(),
            ))
        }
    };

    let id = match map.remove("id") {
        None | Some(Value::Null) => None,
        Some(id) => match serde_json::from_value::<RequestId>(id) {
            Ok(id) => Some(id),
            Err(_) => {
                return Err(CodecError::new(
                    "id is neither a string nor an integer",
                    &dump(&map),
                ))
            }
        },
    };

    if let Some(error) = map.remove("error") {
        let error: RpcError = serde_json::from_value(error)
            .map_err(|err| CodecError::new(format!("invalid error member: {err}"), &dump(&map)))?;
        return Ok(InboundMessage::Error { id, error });
    }

    if let Some(result) = map.remove("result") {
        let Some(id) = id else {
            return Err(CodecError::new("response frame without an id", &dump(&map)));
        };
        return Ok(InboundMessage::Response { id, result });
    }

    match map.remove("method") {
        Some(Value::String(method)) => {
            let params = map.remove("params").unwrap_or(Value::Null);
            Ok(match id {
                Some(id) => InboundMessage::Request {
                    id,
                    method,
                    params,
                },
                None => InboundMessage::Notification { method, params },
            })
        }
        Some(_) => Err(CodecError::new("method is not a string", &dump(&map))),
        None => Err(CodecError::new(
            "frame is not a response, error, request, or notification",
            &dump(&map),
        )),
    }
}

fn dump(map: &serde_json::Map<String, Value>) -> String {
    serde_json::to_string(map).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use acp_schema::JsonRpcRequest;
    use serde_json::json;

    #[test]
    fn blank_and_non_json_lines_are_skipped() {
        assert!(classify_line("").is_none());
        assert!(classify_line("   \r").is_none());
        assert!(classify_line("npm WARN deprecated").is_none());
        assert!(classify_line("[1,2,3]").is_none());
    }

    #[test]
    fn response_frames_keep_the_raw_result() {
        let message = classify_line(r#"{"jsonrpc":"2.0","id":"3","result":{"a":[1,2]}}"#)
            .unwrap()
            .unwrap();
        match message {
            InboundMessage::Response { id, result } => {
                assert_eq!(id, RequestId::from("3"));
                assert_eq!(result, json!({"a": [1, 2]}));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn error_frames_allow_a_null_id() {
        let message =
            classify_line(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"bad"}}"#)
                .unwrap()
                .unwrap();
        match message {
            InboundMessage::Error { id, error } => {
                assert!(id.is_none());
                assert_eq!(error.code, -32700);
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn requests_and_notifications_split_on_id_presence() {
        let request = classify_line(r#"{"jsonrpc":"2.0","id":7,"method":"fs/read_text_file"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(
            request,
            InboundMessage::Request { id: RequestId::Number(7), ref method, .. } if method == "fs/read_text_file"
        ));

        let notification = classify_line(r#"{"jsonrpc":"2.0","method":"session/update","params":{}}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(
            notification,
            InboundMessage::Notification { ref method, .. } if method == "session/update"
        ));
    }

    #[test]
    fn ambiguous_frames_report_a_codec_error_with_preview() {
        let err = classify_line(r#"{"jsonrpc":"2.0","id":"1"}"#).unwrap().unwrap_err();
        assert!(err.preview.contains("jsonrpc"));

        let err = classify_line("{broken").unwrap().unwrap_err();
        assert!(!err.reason.is_empty());
    }

    #[test]
    fn long_payload_previews_are_truncated() {
        let long = format!("{{\"method\":\"x\",\"params\":\"{}\"", "y".repeat(400));
        let err = classify_line(&long).unwrap().unwrap_err();
        assert!(err.preview.len() < 200);
        assert!(err.preview.ends_with('…'));
    }

    #[test]
    fn forward_slashes_are_not_escaped() {
        let frame = JsonRpcRequest::new(
            RequestId::from_counter(1),
            "session/prompt",
            Some(json!({"path": "src/lib.rs"})),
        );
        let encoded = encode(&frame).unwrap();
        assert!(encoded.contains(r#""method":"session/prompt""#));
        assert!(encoded.contains("src/lib.rs"));
        assert!(!encoded.contains(r"\/"));
    }
}

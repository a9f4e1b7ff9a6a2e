use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use acp_schema::{
    CallToolResponse, ContentBlock, PermissionOptionId, RequestPermissionRequest, SessionUpdate,
    ToolDefinition,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as TokioMutex};

use crate::codec::{self, InboundMessage};
use crate::delegate::{AcpDelegate, DelegateError};
use crate::error::AcpHostError;
use crate::transport::AgentTransport;

/// In-memory transport driven by the test: records every outbound frame,
/// auto-replies to stubbed methods, and lets the test inject arbitrary
/// inbound frames or simulate EOF.
pub(super) struct ScriptTransport {
    sent: StdMutex<Vec<Value>>,
    results: StdMutex<HashMap<String, Value>>,
    channel: TokioMutex<ChannelState>,
}

#[derive(Default)]
struct ChannelState {
    tx: Option<mpsc::Sender<InboundMessage>>,
    rx: Option<mpsc::Receiver<InboundMessage>>,
}

impl ScriptTransport {
    pub(super) fn new() -> Self {
        Self {
            sent: StdMutex::new(Vec::new()),
            results: StdMutex::new(HashMap::new()),
            channel: TokioMutex::new(ChannelState::default()),
        }
    }

    /// Every request for `method` is answered with `result`.
    pub(super) fn stub_result(&self, method: &str, result: Value) {
        self.results
            .lock()
            .unwrap()
            .insert(method.to_string(), result);
    }

    pub(super) fn stub_initialize(&self) {
        self.stub_result(
            "initialize",
            json!({
                "protocolVersion": 1,
                "agentCapabilities": {"loadSession": true},
                "agentInfo": {"name": "mock-agent", "version": "1.0"}
            }),
        );
    }

    pub(super) fn stub_new_session(&self, session_id: &str) {
        self.stub_result("session/new", json!({ "sessionId": session_id }));
    }

    /// Injects one raw inbound line, exactly as a pipe would deliver it.
    pub(super) async fn push_raw(&self, raw: &str) {
        let message = codec::classify_line(raw)
            .expect("test frame must not be skippable")
            .expect("test frame must classify");
        self.push(message).await;
    }

    pub(super) async fn push_value(&self, frame: Value) {
        let message = codec::classify_value(frame).expect("test frame must classify");
        self.push(message).await;
    }

    async fn push(&self, message: InboundMessage) {
        let tx = self
            .channel
            .lock()
            .await
            .tx
            .clone()
            .expect("transport not connected");
        tx.send(message).await.expect("inbound channel closed");
    }

    /// Simulates the peer going away: the inbound channel closes as it
    /// would on pipe EOF.
    pub(super) async fn close(&self) {
        self.channel.lock().await.tx = None;
    }

    pub(super) fn sent_frames(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub(super) fn frames_with_method(&self, method: &str) -> Vec<Value> {
        self.sent_frames()
            .into_iter()
            .filter(|frame| frame["method"] == json!(method))
            .collect()
    }

    pub(super) async fn wait_for_frame(&self, pred: impl Fn(&Value) -> bool) -> Value {
        wait_until(|| self.sent_frames().into_iter().find(|frame| pred(frame))).await
    }

    pub(super) async fn wait_for_method(&self, method: &str) -> Value {
        self.wait_for_frame(|frame| frame["method"] == json!(method))
            .await
    }

    /// Waits for the reply (response or error frame) the client wrote for
    /// request id `id`.
    pub(super) async fn wait_for_reply(&self, id: Value) -> Value {
        self.wait_for_frame(|frame| {
            frame["id"] == id && (frame.get("result").is_some() || frame.get("error").is_some())
        })
        .await
    }
}

#[async_trait]
impl AgentTransport for ScriptTransport {
    async fn connect(&self) -> Result<(), AcpHostError> {
        let mut channel = self.channel.lock().await;
        let (tx, rx) = mpsc::channel(64);
        channel.tx = Some(tx);
        channel.rx = Some(rx);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AcpHostError> {
        let mut channel = self.channel.lock().await;
        channel.tx = None;
        channel.rx = None;
        Ok(())
    }

    async fn send_frame(&self, frame: String) -> Result<(), AcpHostError> {
        let value: Value = serde_json::from_str(&frame).expect("outbound frame must be JSON");
        self.sent.lock().unwrap().push(value.clone());

        let method = value.get("method").and_then(Value::as_str);
        let id = value.get("id").cloned();
        if let (Some(method), Some(id)) = (method, id) {
            let result = self.results.lock().unwrap().get(method).cloned();
            if let Some(result) = result {
                let tx = self.channel.lock().await.tx.clone();
                if let Some(tx) = tx {
                    let reply = codec::classify_value(
                        json!({"jsonrpc": "2.0", "id": id, "result": result}),
                    )
                    .expect("stub reply must classify");
                    let _ = tx.send(reply).await;
                }
            }
        }
        Ok(())
    }

    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.channel.lock().await.rx.take()
    }
}

/// Delegate that records updates and answers hooks from test fixtures.
#[derive(Default)]
pub(super) struct RecordingDelegate {
    pub(super) updates: StdMutex<Vec<SessionUpdate>>,
    pub(super) permission_choice: StdMutex<Option<String>>,
    pub(super) files: StdMutex<HashMap<String, String>>,
    pub(super) tools: StdMutex<Vec<ToolDefinition>>,
}

impl RecordingDelegate {
    pub(super) fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    pub(super) fn chunk_texts(&self, index: usize) -> Vec<String> {
        self.updates.lock().unwrap()[index]
            .message_chunks
            .iter()
            .filter_map(|chunk| chunk.as_text().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl AcpDelegate for RecordingDelegate {
    async fn on_update(&self, update: SessionUpdate) {
        self.updates.lock().unwrap().push(update);
    }

    async fn choose_permission(
        &self,
        _request: RequestPermissionRequest,
    ) -> Result<PermissionOptionId, DelegateError> {
        match self.permission_choice.lock().unwrap().clone() {
            Some(choice) => Ok(choice.into()),
            None => Err(DelegateError::new("no permission choice configured")),
        }
    }

    async fn read_file(&self, path: &Path) -> Result<String, DelegateError> {
        self.files
            .lock()
            .unwrap()
            .get(&path.display().to_string())
            .cloned()
            .ok_or_else(|| DelegateError::new(format!("no such file: {}", path.display())))
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<(), DelegateError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.display().to_string(), content.to_string());
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, DelegateError> {
        Ok(self.tools.lock().unwrap().clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Value,
    ) -> Result<CallToolResponse, DelegateError> {
        if name == "echo" {
            Ok(CallToolResponse {
                success: true,
                content: vec![ContentBlock::text("echoed")],
            })
        } else {
            Err(DelegateError::new(format!("unknown tool: {name}")))
        }
    }
}

/// Polls `probe` until it yields a value; panics after two seconds. Under a
/// paused clock the sleeps auto-advance, so timer-driven behavior is
/// deterministic.
pub(super) async fn wait_until<T>(probe: impl Fn() -> Option<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Some(value) = probe() {
                return value;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within two seconds")
}

/// A `session/update` notification in the tagged wire form carrying one
/// text chunk.
pub(super) fn chunk_update(session_id: &str, text: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": "session/update",
        "params": {
            "sessionId": session_id,
            "update": {
                "sessionUpdate": "agent_message_chunk",
                "content": {"type": "text", "text": text}
            }
        }
    })
}

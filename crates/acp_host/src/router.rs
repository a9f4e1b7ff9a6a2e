use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use acp_schema::{
    JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, RpcError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec;
use crate::error::AcpHostError;
use crate::settings::Settings;
use crate::transport::AgentTransport;

type PendingSender = oneshot::Sender<Result<Value, RpcError>>;
type PendingMap = Arc<Mutex<HashMap<RequestId, PendingSender>>>;

/// Correlates outbound requests with inbound responses.
///
/// Callers park on a oneshot future keyed by the request id; the engine loop
/// feeds every inbound response or error frame back through
/// [`resolve_response`](Router::resolve_response) /
/// [`resolve_error`](Router::resolve_error). Each pending entry is removed
/// exactly once: by its response, its error, caller cancellation (drop), or
/// [`fail_all`](Router::fail_all) on disconnect.
pub(crate) struct Router {
    transport: Arc<dyn AgentTransport>,
    pending: PendingMap,
    next_id: AtomicU64,
    verbose: bool,
    timing: bool,
}

impl Router {
    pub(crate) fn new(transport: Arc<dyn AgentTransport>, settings: &Settings) -> Self {
        Self {
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            verbose: settings.verbose,
            timing: settings.timing,
        }
    }

    /// Starts a fresh connection: ids restart at 1, nothing is pending.
    pub(crate) fn reset(&self) {
        self.next_id.store(0, Ordering::SeqCst);
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, AcpHostError> {
        let value = self.request_value(method, params).await?;
        serde_json::from_value(value).map_err(AcpHostError::Decode)
    }

    pub(crate) async fn request_value(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, AcpHostError> {
        let id = RequestId::from_counter(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let frame = codec::encode(&JsonRpcRequest::new(id.clone(), method, params))?;
        let request_bytes = frame.len();

        // Register before writing so an immediate response cannot be lost.
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id.clone(), tx);
        }
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id: Some(id),
        };

        if self.verbose {
            tracing::debug!(method, frame = %frame, "-> request");
        }
        let started = Instant::now();
        self.transport.send_frame(frame).await?;

        let outcome = rx.await;
        guard.defuse();
        let outcome = outcome.map_err(|_| AcpHostError::Disconnected)?;

        if self.timing {
            let response_bytes = match &outcome {
                Ok(result) => serde_json::to_string(result).map(|s| s.len()).unwrap_or(0),
                Err(_) => 0,
            };
            tracing::info!(
                target: "acp_host::timing",
                method,
                elapsed_ms = started.elapsed().as_millis() as u64,
                request_bytes,
                response_bytes,
                ok = outcome.is_ok(),
                "request completed"
            );
        }
        outcome.map_err(AcpHostError::Rpc)
    }

    pub(crate) async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), AcpHostError> {
        let frame = codec::encode(&JsonRpcNotification::new(method, params))?;
        if self.verbose {
            tracing::debug!(method, frame = %frame, "-> notification");
        }
        self.transport.send_frame(frame).await
    }

    pub(crate) async fn respond(&self, id: RequestId, result: Value) -> Result<(), AcpHostError> {
        let frame = codec::encode(&JsonRpcResponse::new(id, result))?;
        if self.verbose {
            tracing::debug!(frame = %frame, "-> response");
        }
        self.transport.send_frame(frame).await
    }

    pub(crate) async fn respond_error(
        &self,
        id: Option<RequestId>,
        code: i64,
        message: impl Into<String>,
    ) -> Result<(), AcpHostError> {
        let frame = codec::encode(&JsonRpcErrorResponse::new(id, RpcError::new(code, message)))?;
        if self.verbose {
            tracing::debug!(frame = %frame, "-> error response");
        }
        self.transport.send_frame(frame).await
    }

    /// Feeds a response frame to its parked caller. A response whose id is
    /// unknown is normal after cancellation and is discarded quietly.
    pub(crate) fn resolve_response(&self, id: &RequestId, result: Value) {
        match self.take_pending(id) {
            Some(tx) => {
                let _ = tx.send(Ok(result));
            }
            None => tracing::debug!(%id, "discarding response for unknown request id"),
        }
    }

    /// Feeds an error frame to its parked caller. A null id resolves no
    /// future; the error is only made visible in the log.
    pub(crate) fn resolve_error(&self, id: Option<&RequestId>, error: RpcError) {
        let Some(id) = id else {
            tracing::warn!(code = error.code, message = %error.message, "agent error without a request id");
            return;
        };
        match self.take_pending(id) {
            Some(tx) => {
                let _ = tx.send(Err(error));
            }
            None => tracing::debug!(%id, "discarding error for unknown request id"),
        }
    }

    /// Resolves every pending future with the disconnect error by dropping
    /// its sender.
    pub(crate) fn fail_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    fn take_pending(&self, id: &RequestId) -> Option<PendingSender> {
        self.pending.lock().ok().and_then(|mut map| map.remove(id))
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// Removes the pending entry when the requesting future is dropped before a
/// terminal outcome — caller cancellation is a purely local abort.
struct PendingGuard {
    pending: PendingMap,
    id: Option<RequestId>,
}

impl PendingGuard {
    fn defuse(mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if let Ok(mut pending) = self.pending.lock() {
                pending.remove(&id);
            }
        }
    }
}

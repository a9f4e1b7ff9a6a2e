use std::path::Path;

use acp_schema::{
    CallToolResponse, PermissionOptionId, RequestPermissionRequest, SessionUpdate, ToolDefinition,
};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a delegate hook; the engine turns it into the
/// JSON-RPC error response the agent sees.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct DelegateError(pub String);

impl DelegateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The host application's capability set: streamed-update sink plus the
/// hooks that answer agent-initiated requests. Every hook runs on the
/// engine's context, so implementations may touch UI-bound state.
///
/// Defaults refuse with a declared error, so hosts implement only the hooks
/// they need.
#[async_trait]
pub trait AcpDelegate: Send + Sync {
    async fn on_update(&self, update: SessionUpdate) {
        let _ = update;
    }

    async fn choose_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> Result<PermissionOptionId, DelegateError> {
        let _ = request;
        Err(DelegateError::new(
            "permission requests are not handled by this host",
        ))
    }

    async fn read_file(&self, path: &Path) -> Result<String, DelegateError> {
        let _ = path;
        Err(DelegateError::new("file reads are not handled by this host"))
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<(), DelegateError> {
        let _ = (path, content);
        Err(DelegateError::new(
            "file writes are not handled by this host",
        ))
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, DelegateError> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResponse, DelegateError> {
        let _ = (name, arguments);
        Err(DelegateError::new("tool calls are not handled by this host"))
    }
}

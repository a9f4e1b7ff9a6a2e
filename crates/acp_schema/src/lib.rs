#![forbid(unsafe_code)]
//! Wire-level data model for the Agent Client Protocol (ACP).
//!
//! ACP is a bidirectional JSON-RPC 2.0 vocabulary between a host application
//! (an editor or IDE) and an AI coding agent. This crate holds the frame and
//! payload types shared by every transport: request ids, the JSON-RPC frame
//! shapes, protocol error codes, content blocks, capability descriptors, the
//! request/response payload for each method, and the polymorphic
//! `session/update` record with its two accepted wire encodings.
//!
//! Schema-opaque fields (tool arguments, `_meta`, permission content, MCP
//! server configs) are carried as [`serde_json::Value`] and never interpreted
//! here.

mod caps;
mod content;
mod requests;
mod rpc;
mod session;

pub use caps::{
    AgentCapabilities, AuthMethod, ClientCapabilities, FsCapabilities, Implementation,
    PromptCapabilities, ProtocolVersion,
};
pub use content::ContentBlock;
pub use requests::{
    AgentManifest, AuthenticateRequest, CallToolRequest, CallToolResponse, GetAgentRequest,
    InitializeRequest, InitializeResponse, ListToolsResponse, LoadSessionRequest,
    LoadSessionResponse, McpServerConfig, NewSessionRequest, NewSessionResponse, PermissionOption,
    PermissionOptionKind, PermissionOutcome, PromptRequest, PromptResponse, ReadTextFileRequest,
    ReadTextFileResponse, RequestPermissionRequest, RequestPermissionResponse,
    SetSessionModeRequest, SetSessionModelRequest, StopReason, TokenUsage, ToolDefinition,
    WriteTextFileRequest, WriteTextFileResponse,
};
pub use rpc::{
    JsonRpcErrorResponse, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    RpcError, AUTH_REQUIRED, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR, RESOURCE_NOT_FOUND,
};
pub use session::{
    Plan, PlanEntry, PlanEntryStatus, PermissionOptionId, SessionId, SessionMode,
    SessionModeState, SessionModel, SessionModelState, SessionNotification, SessionUpdate,
    SlashCommand, TerminalId, ToolCallSnapshot, ToolCallStatus, UpdateDecodeError,
};

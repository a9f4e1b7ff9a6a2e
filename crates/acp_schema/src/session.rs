use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::content::ContentBlock;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

opaque_id!(
    /// Opaque session key issued by the agent; stable only for the duration
    /// of one connection.
    SessionId
);
opaque_id!(
    /// Opaque terminal key issued by the agent.
    TerminalId
);
opaque_id!(
    /// Opaque key naming one choice in a permission request.
    PermissionOptionId
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMode {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    pub current_mode_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_modes: Vec<SessionMode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModel {
    pub model_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelState {
    pub current_model_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_models: Vec<SessionModel>,
}

/// Lifecycle of one tool invocation as reported by the agent. The decoder
/// folds the `in_progress`/`completed` spellings some agents emit into
/// `running`/`complete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    #[default]
    Pending,
    #[serde(alias = "in_progress")]
    Running,
    #[serde(alias = "completed")]
    Complete,
    Failed,
    Cancelled,
}

impl ToolCallStatus {
    /// Terminal states end the tool-call span.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallSnapshot {
    #[serde(alias = "toolCallId")]
    pub id: String,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
    #[default]
    Pending,
    InProgress,
    #[serde(alias = "completed")]
    Complete,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub status: PlanEntryStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default)]
    pub entries: Vec<PlanEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlashCommand {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Incremental progress for one session, merged from any number of
/// `session/update` notifications.
///
/// `message_chunks` and `tool_calls` append in arrival order; `plan`,
/// `commands` and `modes` are latest-value snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub message_chunks: Vec<ContentBlock>,
    pub tool_calls: Vec<ToolCallSnapshot>,
    pub plan: Option<Plan>,
    pub commands: Option<Vec<SlashCommand>>,
    pub modes: Option<SessionModeState>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.message_chunks.is_empty()
            && self.tool_calls.is_empty()
            && self.plan.is_none()
            && self.commands.is_none()
            && self.modes.is_none()
    }

    /// Folds a later update into this one: chunk and tool-call lists append,
    /// snapshot fields take the newer value.
    pub fn merge(&mut self, other: SessionUpdate) {
        self.message_chunks.extend(other.message_chunks);
        self.tool_calls.extend(other.tool_calls);
        if other.plan.is_some() {
            self.plan = other.plan;
        }
        if other.commands.is_some() {
            self.commands = other.commands;
        }
        if other.modes.is_some() {
            self.modes = other.modes;
        }
    }
}

#[derive(Debug, Error)]
pub enum UpdateDecodeError {
    #[error("unknown session update kind: {0}")]
    UnknownKind(String),
    #[error("invalid session update payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A decoded `session/update` notification.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionNotification {
    pub session_id: Option<SessionId>,
    pub update: SessionUpdate,
}

impl SessionNotification {
    /// Decodes notification params in either wire form: the tagged shape
    /// (an `update` object carrying a `sessionUpdate` discriminator, or the
    /// params object itself carrying one) or the untagged shape with the
    /// natural field names.
    pub fn from_params(params: &Value) -> Result<Self, UpdateDecodeError> {
        let session_id = params
            .get("sessionId")
            .and_then(Value::as_str)
            .map(SessionId::from);
        let body = params.get("update").unwrap_or(params);
        let update = match body.get("sessionUpdate").and_then(Value::as_str) {
            Some(kind) => decode_tagged(kind, body)?,
            None => decode_untagged(body)?,
        };
        Ok(Self {
            session_id,
            update,
        })
    }
}

fn decode_tagged(kind: &str, body: &Value) -> Result<SessionUpdate, UpdateDecodeError> {
    let mut update = SessionUpdate::default();
    match kind {
        "agent_message_chunk" => {
            let content = body.get("content").cloned().unwrap_or(Value::Null);
            update.message_chunks.push(serde_json::from_value(content)?);
        }
        "tool_call" | "tool_call_update" => {
            update.tool_calls.push(serde_json::from_value(body.clone())?);
        }
        "plan" => {
            update.plan = Some(serde_json::from_value(body.clone())?);
        }
        "available_commands_update" => {
            let commands = body
                .get("availableCommands")
                .or_else(|| body.get("commands"))
                .cloned()
                .unwrap_or_else(|| Value::Array(Vec::new()));
            update.commands = Some(serde_json::from_value(commands)?);
        }
        "current_mode_update" => {
            update.modes = Some(serde_json::from_value(body.clone())?);
        }
        other => return Err(UpdateDecodeError::UnknownKind(other.to_string())),
    }
    Ok(update)
}

fn decode_untagged(body: &Value) -> Result<SessionUpdate, UpdateDecodeError> {
    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Untagged {
        #[serde(default)]
        message_chunks: Vec<ContentBlock>,
        #[serde(default)]
        tool_calls: Vec<ToolCallSnapshot>,
        #[serde(default)]
        plan: Option<Plan>,
        #[serde(default, alias = "availableCommands")]
        commands: Option<Vec<SlashCommand>>,
        #[serde(default)]
        modes: Option<SessionModeState>,
    }

    let untagged: Untagged = serde_json::from_value(body.clone())?;
    Ok(SessionUpdate {
        message_chunks: untagged.message_chunks,
        tool_calls: untagged.tool_calls,
        plan: untagged.plan,
        commands: untagged.commands,
        modes: untagged.modes,
    })
}

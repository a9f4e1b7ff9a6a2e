use std::{io, path::PathBuf};

use acp_schema::RpcError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AcpHostError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("transport is already connected")]
    AlreadyConnected,
    #[error("connection to the agent was closed")]
    Disconnected,
    #[error("failed to launch agent process (command={command:?}): {source}")]
    Launch {
        command: PathBuf,
        source: io::Error,
    },
    #[error("failed to send frame to the agent: {reason}")]
    SendFailed { reason: String },
    #[error("connection attempt failed: {0}")]
    ConnectionFailed(String),
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("no active session")]
    NoActiveSession,
    #[error("agent does not advertise the {0} capability")]
    CapabilityNotSupported(&'static str),
    #[error("no agent name available for a manifest lookup")]
    NoAgentName,
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("process transport is not supported on this platform")]
    UnsupportedPlatform,
}

impl AcpHostError {
    /// True for the terminal connection-loss error that resolves every
    /// pending request.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected)
    }
}

#![forbid(unsafe_code)]
//! Host-side engine for the Agent Client Protocol (ACP).
//!
//! Drives an external AI coding agent over bidirectional JSON-RPC 2.0, with
//! the agent either spawned as a child process (line-delimited JSON on its
//! standard pipes, [`ProcessTransport`]) or reached over HTTP
//! ([`HttpTransport`]). The [`AcpClient`] negotiates the protocol, manages
//! sessions and prompt turns, coalesces high-frequency streaming updates
//! into batched deliveries, and answers agent-initiated requests
//! (permissions, filesystem access, tool listing and invocation) through
//! the host's [`AcpDelegate`].
//!
//! Environment knobs: `ACP_VERBOSE=1` for per-frame debug logs,
//! `ACP_TIMING=1` for structured timing metrics, `ACP_BATCHING=0` to
//! disable update batching, `ACP_BATCH_MS=<n>` to size the batch window
//! (default 50). All logging goes through `tracing`; the host owns the
//! subscriber.

mod client;
mod codec;
mod delegate;
mod error;
mod router;
mod session;
mod settings;
mod transport;

pub use client::{AcpClient, AcpClientBuilder};
pub use codec::{classify_line, classify_value, CodecError, InboundMessage};
pub use delegate::{AcpDelegate, DelegateError};
pub use error::AcpHostError;
pub use settings::Settings;
pub use transport::{AgentTransport, HttpTransport, ProcessTransport};

#[cfg(test)]
mod tests;

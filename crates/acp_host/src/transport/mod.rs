use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::codec::InboundMessage;
use crate::error::AcpHostError;

mod http;
#[cfg(not(target_arch = "wasm32"))]
mod process;
#[cfg(target_arch = "wasm32")]
mod process_unsupported;

pub use http::HttpTransport;
#[cfg(not(target_arch = "wasm32"))]
pub use process::ProcessTransport;
#[cfg(target_arch = "wasm32")]
pub use process_unsupported::ProcessTransport;

pub(crate) const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// A full-duplex channel to one agent.
///
/// Both variants classify their inbound traffic through the codec and
/// deliver it, in decode order, on the channel handed out by
/// [`take_inbound`](AgentTransport::take_inbound). The channel closing is
/// the disconnect signal: it means the peer is gone and no further frame
/// will arrive on this connection.
///
/// `send_frame` takes one serialized frame (no trailing newline) and is
/// internally serialized, so concurrent senders can never interleave bytes
/// within a frame.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn connect(&self) -> Result<(), AcpHostError>;

    /// Tears the connection down. Idempotent; a later `connect` starts a
    /// fresh connection.
    async fn disconnect(&self) -> Result<(), AcpHostError>;

    async fn send_frame(&self, frame: String) -> Result<(), AcpHostError>;

    /// Hands out the inbound stream for the current connection. Returns
    /// `None` when not connected or when the stream was already taken.
    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>>;
}

use std::sync::Arc;

use acp_schema::NewSessionRequest;
use serde_json::json;

use crate::client::AcpClient;
use crate::settings::Settings;

mod router;
mod support;

use support::{chunk_update, wait_until, RecordingDelegate, ScriptTransport};

/// Builds a connected client with a fresh session `s1` over a script
/// transport, insulated from the ambient environment.
async fn connected_client(
    delegate: Option<Arc<RecordingDelegate>>,
) -> (Arc<ScriptTransport>, AcpClient) {
    let transport = Arc::new(ScriptTransport::new());
    transport.stub_initialize();
    transport.stub_new_session("s1");

    let mut builder = AcpClient::builder(transport.clone()).settings(Settings::default());
    if let Some(delegate) = delegate {
        builder = builder.delegate(delegate);
    }
    let client = builder.build();
    client.connect().await.unwrap();
    client
        .new_session(NewSessionRequest::new("/workspace"))
        .await
        .unwrap();
    (transport, client)
}

use super::*;

use std::time::Duration;

use acp_schema::{RequestId, RpcError};
use serde_json::Value;

use crate::codec::InboundMessage;
use crate::router::Router;
use crate::transport::AgentTransport;

/// A router wired to a script transport, with a pump task standing in for
/// the engine loop: inbound responses and errors feed back into the router.
async fn connected_router() -> (Arc<ScriptTransport>, Arc<Router>) {
    let transport = Arc::new(ScriptTransport::new());
    transport.connect().await.unwrap();
    let router = Arc::new(Router::new(transport.clone(), &Settings::default()));

    let mut inbound = transport.take_inbound().await.unwrap();
    tokio::spawn({
        let router = Arc::clone(&router);
        async move {
            while let Some(message) = inbound.recv().await {
                match message {
                    InboundMessage::Response { id, result } => {
                        router.resolve_response(&id, result);
                    }
                    InboundMessage::Error { id, error } => {
                        router.resolve_error(id.as_ref(), error);
                    }
                    _ => {}
                }
            }
        }
    });
    (transport, router)
}

#[tokio::test]
async fn a_resolved_request_removes_its_pending_entry() {
    let (transport, router) = connected_router().await;

    let task = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.request_value("agents/get", None).await }
    });

    let frame = transport.wait_for_method("agents/get").await;
    assert_eq!(frame["id"], json!("1"));
    router.resolve_response(&RequestId::from("1"), json!({"name": "a"}));

    let result = task.await.unwrap().unwrap();
    assert_eq!(result, json!({"name": "a"}));
    assert_eq!(router.pending_len(), 0);

    // A duplicate response for the same id is discarded quietly.
    router.resolve_response(&RequestId::from("1"), json!({"name": "b"}));
    assert_eq!(router.pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelling_the_caller_removes_its_pending_entry() {
    let (_transport, router) = connected_router().await;

    let outcome = tokio::time::timeout(
        Duration::from_millis(10),
        router.request_value("session/prompt", None),
    )
    .await;
    assert!(outcome.is_err(), "no reply was scripted, so this times out");
    assert_eq!(router.pending_len(), 0);
}

#[tokio::test]
async fn an_error_frame_resolves_the_caller_with_the_agent_error() {
    let (transport, router) = connected_router().await;

    let task = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.request_value("session/prompt", None).await }
    });
    transport.wait_for_method("session/prompt").await;

    router.resolve_error(
        Some(&RequestId::from("1")),
        RpcError::new(-32603, "agent fell over"),
    );
    match task.await.unwrap() {
        Err(crate::error::AcpHostError::Rpc(error)) => assert_eq!(error.code, -32603),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn a_null_id_error_resolves_no_future() {
    let (transport, router) = connected_router().await;

    let task = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.request_value("session/prompt", None).await }
    });
    transport.wait_for_method("session/prompt").await;

    router.resolve_error(None, RpcError::new(-32700, "unparseable"));
    assert_eq!(router.pending_len(), 1, "the caller is still parked");

    router.resolve_response(&RequestId::from("1"), Value::Null);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn fail_all_resolves_every_parked_caller_with_disconnected() {
    let (transport, router) = connected_router().await;

    let tasks: Vec<_> = (0..3)
        .map(|_| {
            tokio::spawn({
                let router = Arc::clone(&router);
                async move { router.request_value("session/prompt", None).await }
            })
        })
        .collect();
    wait_until(|| (transport.frames_with_method("session/prompt").len() >= 3).then_some(())).await;
    assert_eq!(router.pending_len(), 3);

    router.fail_all();
    for task in tasks {
        assert!(matches!(
            task.await.unwrap(),
            Err(crate::error::AcpHostError::Disconnected)
        ));
    }
    assert_eq!(router.pending_len(), 0);
}

#[tokio::test]
async fn reset_restarts_the_id_sequence() {
    let (transport, router) = connected_router().await;
    transport.stub_result("authenticate", json!({}));

    // The script transport auto-replies, so these complete inline.
    router
        .request_value("authenticate", None)
        .await
        .unwrap();
    router
        .request_value("authenticate", None)
        .await
        .unwrap();

    router.reset();
    router
        .request_value("authenticate", None)
        .await
        .unwrap();

    let ids: Vec<Value> = transport
        .sent_frames()
        .iter()
        .map(|frame| frame["id"].clone())
        .collect();
    assert_eq!(ids, vec![json!("1"), json!("2"), json!("1")]);
}

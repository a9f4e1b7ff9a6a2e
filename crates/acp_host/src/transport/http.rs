use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::codec::{self, InboundMessage};
use crate::error::AcpHostError;
use crate::transport::{AgentTransport, INBOUND_CHANNEL_CAPACITY};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Talks to an agent behind an HTTP endpoint: outbound frames are POSTed to
/// `<base>/message`, inbound traffic is polled from `<base>/messages`
/// (204 = nothing pending), and `GET <base>` is the reachability probe on
/// connect. The endpoint is otherwise stateless.
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
    poll_interval: Duration,
    state: Mutex<HttpState>,
}

enum HttpState {
    Idle,
    Running(RunningPoll),
    Stopped,
}

struct RunningPoll {
    poll_task: JoinHandle<()>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    tx: mpsc::Sender<InboundMessage>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(HttpState::Idle),
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl AgentTransport for HttpTransport {
    async fn connect(&self) -> Result<(), AcpHostError> {
        let mut state = self.state.lock().await;
        if matches!(*state, HttpState::Running(_)) {
            return Err(AcpHostError::AlreadyConnected);
        }

        let response = self.http.get(&self.base_url).send().await?;
        if !response.status().is_success() {
            return Err(AcpHostError::ConnectionFailed(format!(
                "agent endpoint {} returned {}",
                self.base_url,
                response.status()
            )));
        }

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let poll_task = tokio::spawn(poll_messages(
            self.http.clone(),
            format!("{}/messages", self.base_url),
            tx.clone(),
            self.poll_interval,
        ));
        *state = HttpState::Running(RunningPoll {
            poll_task,
            inbound: Some(rx),
            tx,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AcpHostError> {
        let mut state = self.state.lock().await;
        if let HttpState::Running(running) = std::mem::replace(&mut *state, HttpState::Stopped) {
            running.poll_task.abort();
        }
        Ok(())
    }

    async fn send_frame(&self, frame: String) -> Result<(), AcpHostError> {
        let tx = {
            let state = self.state.lock().await;
            match &*state {
                HttpState::Running(running) => running.tx.clone(),
                HttpState::Idle | HttpState::Stopped => return Err(AcpHostError::NotConnected),
            }
        };

        let response = self
            .http
            .post(format!("{}/message", self.base_url))
            .header(header::CONTENT_TYPE, "application/json")
            .body(frame)
            .send()
            .await
            .map_err(|err| AcpHostError::SendFailed {
                reason: err.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcpHostError::SendFailed {
                reason: format!("agent endpoint returned {status}"),
            });
        }

        // A reply may ride back inline on the POST; treat it like polled
        // traffic.
        if status != StatusCode::NO_CONTENT {
            if let Ok(bytes) = response.bytes().await {
                if !bytes.is_empty() {
                    if let Ok(body) = serde_json::from_slice::<Value>(&bytes) {
                        forward_frames(body, &tx).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        match &mut *self.state.lock().await {
            HttpState::Running(running) => running.inbound.take(),
            _ => None,
        }
    }
}

/// Polls the messages endpoint on a fixed cadence, tolerating transient
/// failures by continuing the loop.
async fn poll_messages(
    http: reqwest::Client,
    url: String,
    tx: mpsc::Sender<InboundMessage>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let response = match http.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(error = %err, "message poll failed");
                continue;
            }
        };
        if response.status() == StatusCode::NO_CONTENT {
            continue;
        }
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "message poll returned non-success");
            continue;
        }
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!(error = %err, "message poll body was not JSON");
                continue;
            }
        };
        if !forward_frames(body, &tx).await {
            return;
        }
    }
}

/// Classifies one polled body — a single frame object or an array of frames
/// — and forwards each. Returns `false` once the receiver is gone.
async fn forward_frames(body: Value, tx: &mpsc::Sender<InboundMessage>) -> bool {
    let frames = match body {
        Value::Array(frames) => frames,
        Value::Null => return true,
        other => vec![other],
    };
    for frame in frames {
        match codec::classify_value(frame) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    return false;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed frame from poll");
            }
        }
    }
    true
}

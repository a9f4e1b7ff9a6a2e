use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use acp_schema::{
    AgentManifest, AuthenticateRequest, CallToolRequest, ClientCapabilities, ContentBlock,
    FsCapabilities, GetAgentRequest, Implementation, InitializeRequest, InitializeResponse,
    ListToolsResponse, LoadSessionRequest, LoadSessionResponse, NewSessionRequest,
    NewSessionResponse, PromptRequest, PromptResponse, ProtocolVersion, ReadTextFileRequest,
    ReadTextFileResponse, RequestId, RequestPermissionRequest, RequestPermissionResponse,
    SessionId, SessionModeState, SessionModelState, SessionNotification, SetSessionModeRequest,
    SetSessionModelRequest, WriteTextFileRequest, WriteTextFileResponse, INTERNAL_ERROR,
    INVALID_PARAMS, METHOD_NOT_FOUND, RESOURCE_NOT_FOUND,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use crate::codec::InboundMessage;
use crate::delegate::AcpDelegate;
use crate::error::AcpHostError;
use crate::router::Router;
use crate::session::{SessionTable, UpdateBuffer};
use crate::settings::Settings;
use crate::transport::AgentTransport;

/// The option id used to decline a permission request when no delegate can
/// answer it.
const REJECT_ONCE_OPTION: &str = "reject_once";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connected,
}

/// Session-oriented ACP client.
///
/// Construct with [`AcpClient::builder`], then `connect` to negotiate the
/// protocol, open a session with `new_session` or `load_session`, and drive
/// prompt turns. Streamed progress and agent-initiated requests are routed
/// to the [`AcpDelegate`] supplied at build time.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use acp_host::{AcpClient, ProcessTransport};
/// use acp_schema::NewSessionRequest;
///
/// # async fn run() -> Result<(), acp_host::AcpHostError> {
/// let transport = Arc::new(ProcessTransport::new("my-agent").arg("--acp"));
/// let client = AcpClient::builder(transport).build();
/// client.connect().await?;
/// client.new_session(NewSessionRequest::new("/path/to/project")).await?;
/// let response = client.prompt("add a README").await?;
/// println!("turn ended: {:?}", response.stop_reason);
/// # Ok(()) }
/// ```
pub struct AcpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn AgentTransport>,
    router: Router,
    delegate: Option<Arc<dyn AcpDelegate>>,
    settings: Settings,
    client_info: Implementation,
    capabilities: ClientCapabilities,
    protocol_version: u32,
    supported_versions: Vec<ProtocolVersion>,
    phase: StdMutex<Phase>,
    init: StdMutex<Option<InitializeResponse>>,
    sessions: StdMutex<SessionTable>,
    engine_task: TokioMutex<Option<JoinHandle<()>>>,
}

pub struct AcpClientBuilder {
    transport: Arc<dyn AgentTransport>,
    delegate: Option<Arc<dyn AcpDelegate>>,
    client_info: Implementation,
    capabilities: ClientCapabilities,
    protocol_version: u32,
    supported_versions: Vec<ProtocolVersion>,
    settings: Settings,
}

impl AcpClientBuilder {
    pub fn delegate(mut self, delegate: Arc<dyn AcpDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_info = Implementation::new(name, version);
        self
    }

    pub fn capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn supported_versions(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.supported_versions = versions;
        self
    }

    /// Replaces the environment-derived settings wholesale.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn batching(mut self, enabled: bool) -> Self {
        self.settings.batching = enabled;
        self
    }

    pub fn batch_window(mut self, window: std::time::Duration) -> Self {
        self.settings.batch_window = window;
        self
    }

    pub fn timing(mut self, enabled: bool) -> Self {
        self.settings.timing = enabled;
        self
    }

    pub fn verbose(mut self, enabled: bool) -> Self {
        self.settings.verbose = enabled;
        self
    }

    pub fn build(self) -> AcpClient {
        let router = Router::new(Arc::clone(&self.transport), &self.settings);
        AcpClient {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                router,
                delegate: self.delegate,
                settings: self.settings,
                client_info: self.client_info,
                capabilities: self.capabilities,
                protocol_version: self.protocol_version,
                supported_versions: self.supported_versions,
                phase: StdMutex::new(Phase::Idle),
                init: StdMutex::new(None),
                sessions: StdMutex::new(SessionTable::default()),
                engine_task: TokioMutex::new(None),
            }),
        }
    }
}

impl AcpClient {
    pub fn builder(transport: Arc<dyn AgentTransport>) -> AcpClientBuilder {
        AcpClientBuilder {
            transport,
            delegate: None,
            client_info: Implementation::new("acp-host", env!("CARGO_PKG_VERSION")),
            capabilities: ClientCapabilities {
                fs: FsCapabilities {
                    read_text_file: true,
                    write_text_file: true,
                },
                terminal: false,
                meta: None,
            },
            protocol_version: 1,
            supported_versions: vec![ProtocolVersion::new(0, 3, 0)],
            settings: Settings::from_env(),
        }
    }

    /// Connects the transport and negotiates the protocol. On success the
    /// agent's identity and capabilities are cached and gate later calls;
    /// on failure the transport is torn back down so a fresh `connect` can
    /// be attempted.
    pub async fn connect(&self) -> Result<InitializeResponse, AcpHostError> {
        if self.phase() == Phase::Connected {
            return Err(AcpHostError::AlreadyConnected);
        }

        self.inner.transport.connect().await?;
        let Some(inbound) = self.inner.transport.take_inbound().await else {
            let _ = self.inner.transport.disconnect().await;
            return Err(AcpHostError::NotConnected);
        };
        self.inner.router.reset();

        let engine = EngineLoop {
            inner: Arc::clone(&self.inner),
            inbound,
            buffers: HashMap::new(),
        };
        *self.inner.engine_task.lock().await = Some(tokio::spawn(engine.run()));

        let request = InitializeRequest {
            protocol_version: self.inner.protocol_version,
            supported_versions: self.inner.supported_versions.clone(),
            capabilities: self.inner.capabilities.clone(),
            client_info: self.inner.client_info.clone(),
        };
        let params = serde_json::to_value(&request)?;
        match self
            .inner
            .router
            .request::<InitializeResponse>("initialize", Some(params))
            .await
        {
            Ok(response) => {
                *lock(&self.inner.init) = Some(response.clone());
                *lock(&self.inner.phase) = Phase::Connected;
                Ok(response)
            }
            Err(err) => {
                self.teardown().await;
                Err(err)
            }
        }
    }

    /// Ends the connection: the engine stops, every pending request resolves
    /// with the disconnect error, and session state is dropped. The delegate
    /// receives no further calls. A later `connect` starts over.
    pub async fn disconnect(&self) -> Result<(), AcpHostError> {
        self.teardown().await;
        Ok(())
    }

    pub async fn authenticate(&self, method_id: &str) -> Result<(), AcpHostError> {
        self.ensure_connected()?;
        let request = AuthenticateRequest {
            method_id: method_id.to_string(),
        };
        self.inner
            .router
            .request_value("authenticate", Some(serde_json::to_value(&request)?))
            .await?;
        Ok(())
    }

    /// Creates a session on the agent and makes it the current one.
    pub async fn new_session(
        &self,
        request: NewSessionRequest,
    ) -> Result<NewSessionResponse, AcpHostError> {
        self.ensure_connected()?;
        let response: NewSessionResponse = self
            .inner
            .router
            .request("session/new", Some(serde_json::to_value(&request)?))
            .await?;
        lock(&self.inner.sessions).activate(
            response.session_id.clone(),
            response.modes.clone(),
            response.models.clone(),
        );
        Ok(response)
    }

    /// Attaches to an existing session. Fails up front when the agent did
    /// not advertise `loadSession` during initialize.
    pub async fn load_session(
        &self,
        session_id: SessionId,
    ) -> Result<LoadSessionResponse, AcpHostError> {
        self.ensure_connected()?;
        let supported = lock(&self.inner.init)
            .as_ref()
            .map(|init| init.agent_capabilities.load_session)
            .unwrap_or(false);
        if !supported {
            return Err(AcpHostError::CapabilityNotSupported("loadSession"));
        }

        let request = LoadSessionRequest {
            session_id: session_id.clone(),
        };
        let response: LoadSessionResponse = self
            .inner
            .router
            .request("session/load", Some(serde_json::to_value(&request)?))
            .await?;
        let id = response.session_id.clone().unwrap_or(session_id);
        lock(&self.inner.sessions).activate(id, response.modes.clone(), response.models.clone());
        Ok(response)
    }

    /// Sends a plain-text prompt turn on the current session.
    pub async fn prompt(&self, text: &str) -> Result<PromptResponse, AcpHostError> {
        self.prompt_blocks(vec![ContentBlock::text(text)]).await
    }

    /// Sends a prompt turn with explicit content blocks. Streamed
    /// `session/update` notifications arrive at the delegate while this
    /// future is pending; it resolves with the agent's stop reason.
    pub async fn prompt_blocks(
        &self,
        prompt: Vec<ContentBlock>,
    ) -> Result<PromptResponse, AcpHostError> {
        self.ensure_connected()?;
        let session_id = self.require_session()?;
        if self.inner.settings.timing {
            if let Some(state) = lock(&self.inner.sessions).state_mut(&session_id) {
                state.stats.begin_turn();
            }
        }

        let request = PromptRequest {
            session_id: session_id.clone(),
            prompt,
        };
        let response: PromptResponse = self
            .inner
            .router
            .request("session/prompt", Some(serde_json::to_value(&request)?))
            .await?;

        if self.inner.settings.timing {
            if let Some(state) = lock(&self.inner.sessions).state_mut(&session_id) {
                state.stats.finish_turn(response.stop_reason);
            }
        }
        Ok(response)
    }

    /// Asks the agent to stop the in-flight prompt turn. Fire-and-forget:
    /// the outstanding `prompt` future still resolves with the agent's
    /// terminal response, expected to carry `stop_reason = cancelled`.
    pub async fn cancel(&self) -> Result<(), AcpHostError> {
        self.ensure_connected()?;
        let session_id = self.require_session()?;
        self.inner
            .router
            .notify("session/cancel", Some(json!({ "sessionId": session_id })))
            .await
    }

    pub async fn set_session_model(&self, model_id: &str) -> Result<(), AcpHostError> {
        self.ensure_connected()?;
        let session_id = self.require_session()?;
        let request = SetSessionModelRequest {
            session_id: session_id.clone(),
            model_id: model_id.to_string(),
        };
        self.inner
            .router
            .request_value("session/set_model", Some(serde_json::to_value(&request)?))
            .await?;
        if let Some(state) = lock(&self.inner.sessions).state_mut(&session_id) {
            state.set_current_model(model_id);
        }
        Ok(())
    }

    pub async fn set_session_mode(&self, mode_id: &str) -> Result<(), AcpHostError> {
        self.ensure_connected()?;
        let session_id = self.require_session()?;
        let request = SetSessionModeRequest {
            session_id: session_id.clone(),
            mode_id: mode_id.to_string(),
        };
        self.inner
            .router
            .request_value("session/set_mode", Some(serde_json::to_value(&request)?))
            .await?;
        if let Some(state) = lock(&self.inner.sessions).state_mut(&session_id) {
            state.set_current_mode(mode_id);
        }
        Ok(())
    }

    /// Fetches the agent's manifest. With no explicit name, the agent name
    /// cached from `initialize` is used.
    pub async fn get_agent_manifest(
        &self,
        name: Option<&str>,
    ) -> Result<AgentManifest, AcpHostError> {
        self.ensure_connected()?;
        let name = match name {
            Some(name) => name.to_string(),
            None => lock(&self.inner.init)
                .as_ref()
                .and_then(|init| init.agent_info.as_ref())
                .map(|info| info.name.clone())
                .ok_or(AcpHostError::NoAgentName)?,
        };
        let request = GetAgentRequest { name };
        self.inner
            .router
            .request("agents/get", Some(serde_json::to_value(&request)?))
            .await
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == Phase::Connected
    }

    /// The response negotiated by the last successful `connect`.
    pub fn initialize_response(&self) -> Option<InitializeResponse> {
        lock(&self.inner.init).clone()
    }

    pub fn current_session_id(&self) -> Option<SessionId> {
        lock(&self.inner.sessions).current_id()
    }

    /// Mode state of the current session, kept fresh by `set_session_mode`
    /// and inbound mode updates.
    pub fn session_modes(&self) -> Option<SessionModeState> {
        let sessions = lock(&self.inner.sessions);
        sessions.current_id().and_then(|id| sessions.modes(&id))
    }

    pub fn session_models(&self) -> Option<SessionModelState> {
        let sessions = lock(&self.inner.sessions);
        sessions.current_id().and_then(|id| sessions.models(&id))
    }

    fn phase(&self) -> Phase {
        *lock(&self.inner.phase)
    }

    fn ensure_connected(&self) -> Result<(), AcpHostError> {
        match self.phase() {
            Phase::Connected => Ok(()),
            Phase::Idle => Err(AcpHostError::NotConnected),
        }
    }

    fn require_session(&self) -> Result<SessionId, AcpHostError> {
        lock(&self.inner.sessions)
            .current_id()
            .ok_or(AcpHostError::NoActiveSession)
    }

    async fn teardown(&self) {
        *lock(&self.inner.phase) = Phase::Idle;
        if let Some(task) = self.inner.engine_task.lock().await.take() {
            task.abort();
        }
        let _ = self.inner.transport.disconnect().await;
        self.inner.router.fail_all();
        lock(&self.inner.sessions).clear();
        *lock(&self.inner.init) = None;
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("client state mutex poisoned")
}

/// Per-connection actor: owns the inbound stream and the merge buffers, and
/// is the single context for delegate callbacks, inbound-request servicing,
/// and response correlation. Ends when the transport closes its channel.
struct EngineLoop {
    inner: Arc<ClientInner>,
    inbound: mpsc::Receiver<InboundMessage>,
    buffers: HashMap<SessionId, UpdateBuffer>,
}

impl EngineLoop {
    async fn run(mut self) {
        loop {
            let deadline = self.buffers.values().filter_map(|b| b.deadline).min();
            tokio::select! {
                message = self.inbound.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => break,
                },
                _ = flush_timer(deadline), if deadline.is_some() => {
                    self.flush_due().await;
                }
            }
        }

        // Transport closed underneath us. Drop per-connection state before
        // resolving parked callers, so a caller that retries immediately
        // observes not-connected rather than a half-open client.
        *lock(&self.inner.phase) = Phase::Idle;
        lock(&self.inner.sessions).clear();
        self.inner.router.fail_all();
        tracing::debug!("engine loop ended: transport closed");
    }

    async fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Response { id, result } => {
                if self.inner.settings.verbose {
                    tracing::debug!(%id, "<- response");
                }
                self.inner.router.resolve_response(&id, result);
            }
            InboundMessage::Error { id, error } => {
                if self.inner.settings.verbose {
                    tracing::debug!(code = error.code, "<- error");
                }
                self.inner.router.resolve_error(id.as_ref(), error);
            }
            InboundMessage::Request { id, method, params } => {
                if self.inner.settings.verbose {
                    tracing::debug!(%id, method, "<- request");
                }
                self.handle_request(id, &method, params).await;
            }
            InboundMessage::Notification { method, params } => {
                if self.inner.settings.verbose {
                    tracing::debug!(method, "<- notification");
                }
                self.handle_notification(&method, params).await;
            }
        }
    }

    async fn handle_notification(&mut self, method: &str, params: Value) {
        match method {
            "session/update" => self.handle_session_update(params).await,
            other => tracing::trace!(method = other, "ignoring unknown notification"),
        }
    }

    async fn handle_session_update(&mut self, params: Value) {
        let notification = match SessionNotification::from_params(&params) {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!(error = %err, "dropping undecodable session update");
                return;
            }
        };
        let session_id = notification
            .session_id
            .or_else(|| lock(&self.inner.sessions).current_id());
        let Some(session_id) = session_id else {
            tracing::debug!("dropping session update with no attributable session");
            return;
        };

        if self.inner.settings.timing {
            let payload_bytes = serde_json::to_string(&params).map(|s| s.len()).unwrap_or(0);
            if let Some(state) = lock(&self.inner.sessions).state_mut(&session_id) {
                state.stats.note_update(&notification.update, payload_bytes);
            }
        }
        if let Some(modes) = &notification.update.modes {
            if let Some(state) = lock(&self.inner.sessions).state_mut(&session_id) {
                state.modes = Some(modes.clone());
            }
        }

        if self.inner.settings.batching {
            let buffer = self.buffers.entry(session_id).or_default();
            buffer.absorb(notification.update);
            if buffer.deadline.is_none() {
                buffer.deadline =
                    Some(tokio::time::Instant::now() + self.inner.settings.batch_window);
            }
        } else if let Some(delegate) = &self.inner.delegate {
            delegate.on_update(notification.update).await;
        }
    }

    async fn flush_due(&mut self) {
        let now = tokio::time::Instant::now();
        let due: Vec<SessionId> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| buffer.deadline.is_some_and(|deadline| deadline <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            let update = self.buffers.get_mut(&id).and_then(UpdateBuffer::take);
            if let Some(update) = update {
                if let Some(delegate) = &self.inner.delegate {
                    delegate.on_update(update).await;
                }
            }
        }
    }

    async fn handle_request(&mut self, id: RequestId, method: &str, params: Value) {
        let outcome = match method {
            "session/request_permission" => self.on_request_permission(params).await,
            "fs/read_text_file" => self.on_read_text_file(params).await,
            "fs/write_text_file" => self.on_write_text_file(params).await,
            "tools/list" => self.on_list_tools().await,
            "tools/call" => self.on_call_tool(params).await,
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {other}"))),
        };
        let written = match outcome {
            Ok(result) => self.inner.router.respond(id, result).await,
            Err((code, message)) => self.inner.router.respond_error(Some(id), code, message).await,
        };
        if let Err(err) = written {
            tracing::warn!(error = %err, method, "failed to answer agent request");
        }
    }

    async fn on_request_permission(&self, params: Value) -> Result<Value, (i64, String)> {
        let request: RequestPermissionRequest =
            serde_json::from_value(params).map_err(|err| (INVALID_PARAMS, err.to_string()))?;
        let response = match &self.inner.delegate {
            Some(delegate) => match delegate.choose_permission(request).await {
                Ok(option_id) => RequestPermissionResponse::selected(option_id),
                Err(err) => {
                    tracing::warn!(error = %err, "delegate declined to choose a permission option");
                    RequestPermissionResponse::selected(REJECT_ONCE_OPTION)
                }
            },
            None => RequestPermissionResponse::selected(REJECT_ONCE_OPTION),
        };
        encode_result(&response)
    }

    async fn on_read_text_file(&self, params: Value) -> Result<Value, (i64, String)> {
        let request: ReadTextFileRequest =
            serde_json::from_value(params).map_err(|err| (INVALID_PARAMS, err.to_string()))?;
        let Some(delegate) = &self.inner.delegate else {
            return Err((RESOURCE_NOT_FOUND, "no delegate attached".to_string()));
        };
        match delegate.read_file(&request.path).await {
            Ok(content) => encode_result(&ReadTextFileResponse { content }),
            Err(err) => Err((RESOURCE_NOT_FOUND, err.to_string())),
        }
    }

    async fn on_write_text_file(&self, params: Value) -> Result<Value, (i64, String)> {
        let request: WriteTextFileRequest =
            serde_json::from_value(params).map_err(|err| (INVALID_PARAMS, err.to_string()))?;
        let Some(delegate) = &self.inner.delegate else {
            return Err((INTERNAL_ERROR, "no delegate attached".to_string()));
        };
        match delegate.write_file(&request.path, &request.content).await {
            Ok(()) => encode_result(&WriteTextFileResponse::ok()),
            Err(err) => Err((INTERNAL_ERROR, err.to_string())),
        }
    }

    async fn on_list_tools(&self) -> Result<Value, (i64, String)> {
        let Some(delegate) = &self.inner.delegate else {
            return encode_result(&ListToolsResponse::default());
        };
        match delegate.list_tools().await {
            Ok(tools) => encode_result(&ListToolsResponse { tools }),
            Err(err) => Err((INTERNAL_ERROR, err.to_string())),
        }
    }

    async fn on_call_tool(&self, params: Value) -> Result<Value, (i64, String)> {
        let request: CallToolRequest =
            serde_json::from_value(params).map_err(|err| (INVALID_PARAMS, err.to_string()))?;
        let Some(delegate) = &self.inner.delegate else {
            return Err((
                METHOD_NOT_FOUND,
                "Method not found: tools/call".to_string(),
            ));
        };
        match delegate.call_tool(&request.name, request.arguments).await {
            Ok(response) => encode_result(&response),
            Err(err) => Err((INTERNAL_ERROR, err.to_string())),
        }
    }
}

fn encode_result<T: serde::Serialize>(value: &T) -> Result<Value, (i64, String)> {
    serde_json::to_value(value).map_err(|err| (INTERNAL_ERROR, err.to_string()))
}

async fn flush_timer(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        // Guarded out by the `if` on the select arm; never completes.
        None => std::future::pending().await,
    }
}

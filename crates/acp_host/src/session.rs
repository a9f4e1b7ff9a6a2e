use std::collections::HashMap;
use std::mem;
use std::time::Instant;

use acp_schema::{
    SessionId, SessionModeState, SessionModelState, SessionUpdate, StopReason, ToolCallSnapshot,
};

/// Everything the engine caches per connection: which session is current and
/// the per-session mode/model snapshots and turn statistics.
#[derive(Default)]
pub(crate) struct SessionTable {
    current: Option<SessionId>,
    sessions: HashMap<SessionId, SessionState>,
}

impl SessionTable {
    /// Registers a session and makes it current.
    pub(crate) fn activate(
        &mut self,
        id: SessionId,
        modes: Option<SessionModeState>,
        models: Option<SessionModelState>,
    ) {
        self.sessions.insert(
            id.clone(),
            SessionState {
                modes,
                models,
                stats: TurnStats::default(),
            },
        );
        self.current = Some(id);
    }

    pub(crate) fn current_id(&self) -> Option<SessionId> {
        self.current.clone()
    }

    pub(crate) fn state_mut(&mut self, id: &SessionId) -> Option<&mut SessionState> {
        self.sessions.get_mut(id)
    }

    pub(crate) fn modes(&self, id: &SessionId) -> Option<SessionModeState> {
        self.sessions.get(id).and_then(|s| s.modes.clone())
    }

    pub(crate) fn models(&self, id: &SessionId) -> Option<SessionModelState> {
        self.sessions.get(id).and_then(|s| s.models.clone())
    }

    pub(crate) fn clear(&mut self) {
        self.current = None;
        self.sessions.clear();
    }
}

pub(crate) struct SessionState {
    pub(crate) modes: Option<SessionModeState>,
    pub(crate) models: Option<SessionModelState>,
    pub(crate) stats: TurnStats,
}

impl SessionState {
    pub(crate) fn set_current_mode(&mut self, mode_id: &str) {
        match &mut self.modes {
            Some(modes) => modes.current_mode_id = mode_id.to_string(),
            None => {
                self.modes = Some(SessionModeState {
                    current_mode_id: mode_id.to_string(),
                    available_modes: Vec::new(),
                })
            }
        }
    }

    pub(crate) fn set_current_model(&mut self, model_id: &str) {
        match &mut self.models {
            Some(models) => models.current_model_id = model_id.to_string(),
            None => {
                self.models = Some(SessionModelState {
                    current_model_id: model_id.to_string(),
                    available_models: Vec::new(),
                })
            }
        }
    }
}

/// Prompt-turn instrumentation, populated only when timing is enabled.
/// Latencies are emitted as structured tracing events as they become known;
/// tool-call spans are keyed by the agent's tool-call id.
#[derive(Debug, Default)]
pub(crate) struct TurnStats {
    turn_seq: u64,
    started: Option<Instant>,
    first_chunk: Option<Instant>,
    first_tool_call: Option<Instant>,
    chunks: u64,
    bytes: u64,
    tool_call_started: HashMap<String, Instant>,
}

impl TurnStats {
    pub(crate) fn begin_turn(&mut self) {
        self.turn_seq += 1;
        self.started = Some(Instant::now());
        self.first_chunk = None;
        self.first_tool_call = None;
        self.chunks = 0;
        self.bytes = 0;
        self.tool_call_started.clear();
    }

    pub(crate) fn note_update(&mut self, update: &SessionUpdate, payload_bytes: usize) {
        self.bytes += payload_bytes as u64;
        if !update.message_chunks.is_empty() {
            self.chunks += update.message_chunks.len() as u64;
            if self.first_chunk.is_none() {
                let now = Instant::now();
                self.first_chunk = Some(now);
                if let Some(started) = self.started {
                    tracing::info!(
                        target: "acp_host::timing",
                        turn = self.turn_seq,
                        first_chunk_ms = (now - started).as_millis() as u64,
                        "first message chunk"
                    );
                }
            }
        }
        for call in &update.tool_calls {
            self.note_tool_call(call);
        }
    }

    fn note_tool_call(&mut self, call: &ToolCallSnapshot) {
        let now = Instant::now();
        if self.first_tool_call.is_none() {
            self.first_tool_call = Some(now);
            if let Some(started) = self.started {
                tracing::info!(
                    target: "acp_host::timing",
                    turn = self.turn_seq,
                    first_tool_call_ms = (now - started).as_millis() as u64,
                    "first tool call"
                );
            }
        }
        if call.status.is_terminal() {
            if let Some(started) = self.tool_call_started.remove(&call.id) {
                tracing::info!(
                    target: "acp_host::timing",
                    tool_call = %call.id,
                    status = ?call.status,
                    span_ms = (now - started).as_millis() as u64,
                    "tool call finished"
                );
            }
        } else {
            self.tool_call_started.entry(call.id.clone()).or_insert(now);
        }
    }

    pub(crate) fn finish_turn(&mut self, stop_reason: StopReason) {
        let Some(started) = self.started.take() else {
            return;
        };
        tracing::info!(
            target: "acp_host::timing",
            turn = self.turn_seq,
            stop_reason = ?stop_reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            chunks = self.chunks,
            bytes = self.bytes,
            "prompt turn finished"
        );
    }
}

/// One session's coalescing buffer. Chunk and tool-call lists append in
/// arrival order, snapshot fields keep the latest value, and `deadline` is
/// armed when the first update lands after a flush.
#[derive(Default)]
pub(crate) struct UpdateBuffer {
    update: SessionUpdate,
    pub(crate) deadline: Option<tokio::time::Instant>,
}

impl UpdateBuffer {
    pub(crate) fn absorb(&mut self, update: SessionUpdate) {
        self.update.merge(update);
    }

    /// Atomically takes the buffered update and disarms the flush, returning
    /// `None` when nothing accumulated.
    pub(crate) fn take(&mut self) -> Option<SessionUpdate> {
        self.deadline = None;
        if self.update.is_empty() {
            return None;
        }
        Some(mem::take(&mut self.update))
    }
}

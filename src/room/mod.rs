//! Per-session room: authoritative state, message routing, and fan-out.
//!
//! A room owns its clients, its relay, and the coaching admission policy.
//! All state mutations happen under one lock and never across an await, so
//! message handling is serialized per room while rooms progress in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio;
use crate::audio::level::LevelMeter;
use crate::config::AppConfig;
use crate::relay::protocol::COACHING_CONFIDENCE_FLOOR;
use crate::relay::{RelayConfig, RelayEvent, SpeechRelay};
use crate::services::recall::RecallClient;
use crate::types::Clock;
use crate::types::entities::{
    CoachingEvent, ObserverComment, Role, SessionStatus, Speaker, TalkTimeRatio, TopicStatus,
    TopicUpdate, Utterance,
};
use crate::types::events::{ClientMessage, CoachingResponse, ErrorCode, ServerMessage};

pub const MAX_COACHING_PER_SESSION: u32 = 3;
pub const COACHING_COOLDOWN_SECS: i64 = 120;
/// A coaching evaluation is requested every this many finalized utterances.
const COACHING_CADENCE: u64 = 5;
/// Bound on frames queued toward one client socket. Overflow marks the
/// client saturated; the next heartbeat cycle drops it.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Frames queued toward one client socket. Text frames are encoded once per
/// broadcast and shared.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Arc<str>),
    Ping,
    Close,
}

struct ClientHandle {
    role: Role,
    user_name: Option<String>,
    sender: mpsc::Sender<Outbound>,
    #[allow(dead_code)]
    joined_at: DateTime<Utc>,
    last_pong: StdMutex<DateTime<Utc>>,
    alive: AtomicBool,
    saturated: AtomicBool,
}

impl ClientHandle {
    fn display_name(&self) -> String {
        self.user_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Observer".into())
    }

    /// Best-effort enqueue. A full queue flags the client for eviction on
    /// the next heartbeat cycle instead of buffering without bound.
    fn push(&self, out: Outbound) {
        match self.sender.try_send(out) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.saturated.store(true, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

struct RoomState {
    status: SessionStatus,
    started_at: Option<DateTime<Utc>>,
    utterance_count: u64,
    coaching_event_count: u32,
    last_coaching_at: Option<DateTime<Utc>>,
    talk_interviewer_ms: i64,
    talk_participant_ms: i64,
    current_speaker: Speaker,
    relay: Option<SpeechRelay>,
    relay_pump: Option<tokio::task::JoinHandle<()>>,
    bot_id: Option<String>,
    topics: HashMap<String, TopicStatus>,
    level: LevelMeter,
}

impl RoomState {
    fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            started_at: None,
            utterance_count: 0,
            coaching_event_count: 0,
            last_coaching_at: None,
            talk_interviewer_ms: 0,
            talk_participant_ms: 0,
            current_speaker: Speaker::Interviewer,
            relay: None,
            relay_pump: None,
            bot_id: None,
            topics: HashMap::new(),
            level: LevelMeter::default(),
        }
    }
}

/// Serializable room summary for the health route and webhook handlers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub clients: usize,
    pub utterance_count: u64,
}

pub struct SessionRoom {
    session_id: String,
    clients: DashMap<String, ClientHandle>,
    state: StdMutex<RoomState>,
    clock: Arc<dyn Clock>,
    config: Arc<AppConfig>,
    recall: Option<Arc<RecallClient>>,
}

impl SessionRoom {
    pub fn new(
        session_id: String,
        config: Arc<AppConfig>,
        recall: Option<Arc<RecallClient>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session_id,
            clients: DashMap::new(),
            state: StdMutex::new(RoomState::new()),
            clock,
            config,
            recall,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.lock().unwrap().status
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn bot_id(&self) -> Option<String> {
        self.state.lock().unwrap().bot_id.clone()
    }

    pub fn summary(&self) -> RoomSummary {
        let state = self.state.lock().unwrap();
        RoomSummary {
            session_id: self.session_id.clone(),
            status: state.status,
            clients: self.clients.len(),
            utterance_count: state.utterance_count,
        }
    }

    // ── Client membership ─────────────────────────────────

    /// Register a client. At most one interviewer is admitted per room.
    pub fn add_client(
        &self,
        client_id: &str,
        role: Role,
        user_name: Option<String>,
        sender: mpsc::Sender<Outbound>,
    ) -> Result<(), ErrorCode> {
        if role == Role::Interviewer
            && self.clients.iter().any(|c| c.role == Role::Interviewer)
        {
            return Err(ErrorCode::Unauthorized);
        }

        let now = self.clock.now();
        self.clients.insert(
            client_id.to_string(),
            ClientHandle {
                role,
                user_name,
                sender,
                joined_at: now,
                last_pong: StdMutex::new(now),
                alive: AtomicBool::new(true),
                saturated: AtomicBool::new(false),
            },
        );

        let status = self.status();
        self.send_to_client(
            client_id,
            &ServerMessage::SessionStatus {
                status,
                session_id: self.session_id.clone(),
            },
        );
        self.broadcast_observer_count();
        tracing::info!(
            session_id = %self.session_id,
            client_id = %client_id,
            role = ?role,
            "Client joined room"
        );
        Ok(())
    }

    /// Remove a client. The interviewer leaving mid-session pauses the room
    /// so they can reconnect; it does not end it.
    pub fn remove_client(&self, client_id: &str) -> bool {
        if let Some((_, handle)) = self.clients.remove(client_id) {
            handle.push(Outbound::Close);
            if handle.role == Role::Interviewer {
                let paused = {
                    let mut state = self.state.lock().unwrap();
                    if state.status == SessionStatus::Running {
                        state.status = SessionStatus::Paused;
                        true
                    } else {
                        false
                    }
                };
                if paused {
                    tracing::info!(
                        session_id = %self.session_id,
                        "Interviewer disconnected; session paused"
                    );
                    self.broadcast_status(SessionStatus::Paused);
                }
            }
            self.broadcast_observer_count();
        }
        self.clients.is_empty()
    }

    pub fn mark_pong(&self, client_id: &str) {
        if let Some(client) = self.clients.get(client_id) {
            *client.last_pong.lock().unwrap() = self.clock.now();
            client.alive.store(true, Ordering::Relaxed);
        }
    }

    /// One heartbeat cycle: evict clients whose last pong is older than the
    /// timeout or whose outbound queue overflowed, then ping the rest.
    /// Returns whether the room is now empty.
    pub fn heartbeat_sweep(&self, client_timeout: chrono::Duration) -> bool {
        let now = self.clock.now();
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter(|c| {
                c.saturated.load(Ordering::Relaxed)
                    || now.signed_duration_since(*c.last_pong.lock().unwrap()) > client_timeout
            })
            .map(|c| c.key().clone())
            .collect();
        for client_id in &stale {
            let (alive, saturated) = self
                .clients
                .get(client_id)
                .map(|c| {
                    (
                        c.alive.load(Ordering::Relaxed),
                        c.saturated.load(Ordering::Relaxed),
                    )
                })
                .unwrap_or((false, false));
            tracing::info!(
                session_id = %self.session_id,
                client_id = %client_id,
                alive,
                saturated,
                "Evicting client"
            );
            self.remove_client(client_id);
        }
        for client in self.clients.iter() {
            client.alive.store(false, Ordering::Relaxed);
            client.push(Outbound::Ping);
        }
        self.clients.is_empty()
    }

    // ── Message routing ───────────────────────────────────

    pub async fn handle_message(self: &Arc<Self>, client_id: &str, message: ClientMessage) {
        match message {
            ClientMessage::SessionStart { meeting_url, .. } => {
                self.start_session(client_id, meeting_url).await;
            }
            ClientMessage::SessionPause => {
                let changed = {
                    let mut state = self.state.lock().unwrap();
                    if state.status == SessionStatus::Running {
                        state.status = SessionStatus::Paused;
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    self.broadcast_status(SessionStatus::Paused);
                } else {
                    self.send_to_client(
                        client_id,
                        &ServerMessage::session_error(
                            ErrorCode::InvalidState,
                            "session is not running",
                        ),
                    );
                }
            }
            ClientMessage::SessionResume => {
                let changed = {
                    let mut state = self.state.lock().unwrap();
                    if state.status == SessionStatus::Paused {
                        state.status = SessionStatus::Running;
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    self.broadcast_status(SessionStatus::Running);
                } else {
                    self.send_to_client(
                        client_id,
                        &ServerMessage::session_error(
                            ErrorCode::InvalidState,
                            "session is not paused",
                        ),
                    );
                }
            }
            ClientMessage::SessionStop => {
                self.stop_session().await;
            }
            ClientMessage::AudioChunk { data } => {
                self.handle_audio_chunk(client_id, &data);
            }
            ClientMessage::InsightFlag { timestamp, note } => {
                // Persistence is an external collaborator; record for the logs.
                tracing::info!(
                    session_id = %self.session_id,
                    client_id = %client_id,
                    timestamp,
                    note = note.as_deref().unwrap_or(""),
                    "Insight flagged"
                );
            }
            ClientMessage::CoachingRespond { event_id, response } => {
                if response == CoachingResponse::Dismissed {
                    self.broadcast_to_role(
                        Role::Interviewer,
                        &ServerMessage::CoachingDismiss { event_id },
                    );
                }
            }
            ClientMessage::CoachingPull => {
                let state = self.state.lock().unwrap();
                if let Some(relay) = &state.relay {
                    relay.request_coaching();
                }
            }
            ClientMessage::TopicUpdate { topic_name, status } => {
                {
                    let mut state = self.state.lock().unwrap();
                    state.topics.insert(topic_name.clone(), status);
                }
                self.broadcast(&ServerMessage::AnalysisTopic {
                    topic: TopicUpdate { topic_name, status },
                });
            }
            ClientMessage::SpeakerToggle => {
                let mut state = self.state.lock().unwrap();
                state.current_speaker = state.current_speaker.toggled();
                tracing::debug!(
                    session_id = %self.session_id,
                    speaker = ?state.current_speaker,
                    "Speaker hint toggled"
                );
            }
            ClientMessage::ObserverJoin => {}
            ClientMessage::ObserverComment { text, timestamp } => {
                let Some(author_name) = self.observer_name(client_id) else {
                    self.send_to_client(
                        client_id,
                        &ServerMessage::error(
                            ErrorCode::Unauthorized,
                            "only observers can comment",
                        ),
                    );
                    return;
                };
                let comment = ObserverComment {
                    id: format!("comment_{}", Uuid::now_v7()),
                    author_id: client_id.to_string(),
                    author_name,
                    text,
                    timestamp,
                    created_at: self.clock.now(),
                };
                self.broadcast(&ServerMessage::ObserverComment { comment });
            }
            ClientMessage::ObserverQuestion { text } => {
                let Some(from) = self.observer_name(client_id) else {
                    self.send_to_client(
                        client_id,
                        &ServerMessage::error(
                            ErrorCode::Unauthorized,
                            "only observers can ask questions",
                        ),
                    );
                    return;
                };
                self.broadcast_to_role(
                    Role::Interviewer,
                    &ServerMessage::ObserverQuestion {
                        question: text,
                        from,
                    },
                );
            }
            ClientMessage::Ping => {
                self.mark_pong(client_id);
                self.send_to_client(client_id, &ServerMessage::Pong);
            }
        }
    }

    fn observer_name(&self, client_id: &str) -> Option<String> {
        let client = self.clients.get(client_id)?;
        (client.role == Role::Observer).then(|| client.display_name())
    }

    // ── Lifecycle ─────────────────────────────────────────

    async fn start_session(self: &Arc<Self>, client_id: &str, meeting_url: Option<String>) {
        match self.clients.get(client_id) {
            Some(client) if client.role == Role::Interviewer => {}
            Some(_) => {
                self.send_to_client(
                    client_id,
                    &ServerMessage::session_error(
                        ErrorCode::Unauthorized,
                        "only the interviewer can start the session",
                    ),
                );
                return;
            }
            None => return,
        }

        let topics: Vec<String> = {
            let mut state = self.state.lock().unwrap();
            if !matches!(state.status, SessionStatus::Idle | SessionStatus::Ready) {
                drop(state);
                self.send_to_client(
                    client_id,
                    &ServerMessage::session_error(
                        ErrorCode::InvalidState,
                        "session has already started",
                    ),
                );
                return;
            }
            // Claim the start; a relay failure reverts to ready below.
            state.status = SessionStatus::Ready;
            state.topics.keys().cloned().collect()
        };

        // Dispatch the meeting bot first so its audio starts flowing while
        // the relay connects. Failures are surfaced but do not block start.
        let mut bot_id = None;
        if let (Some(url), Some(recall)) = (meeting_url.as_deref(), self.recall.as_ref()) {
            match recall.create_bot(url, &self.session_id).await {
                Ok(id) => bot_id = Some(id),
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "Bot dispatch failed");
                    self.broadcast(&ServerMessage::session_error(
                        ErrorCode::RecallError,
                        "failed to dispatch meeting bot",
                    ));
                }
            }
        }

        let Some(openai) = self.config.openai.clone() else {
            {
                let mut state = self.state.lock().unwrap();
                state.bot_id = bot_id;
                state.status = SessionStatus::Running;
                if state.started_at.is_none() {
                    state.started_at = Some(self.clock.now());
                }
            }
            self.broadcast(&ServerMessage::session_error(
                ErrorCode::OpenaiError,
                "speech service not configured; transcription disabled",
            ));
            self.broadcast_status(SessionStatus::Running);
            return;
        };

        let mut relay_config =
            RelayConfig::new(self.session_id.clone(), openai.api_key, openai.model);
        relay_config.topics = topics;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        match SpeechRelay::connect(relay_config, self.clock.clone(), event_tx).await {
            Ok(relay) => {
                let room = Arc::clone(self);
                let pump = tokio::spawn(async move {
                    while let Some(event) = event_rx.recv().await {
                        room.handle_relay_event(event);
                    }
                });
                {
                    let mut state = self.state.lock().unwrap();
                    state.relay = Some(relay);
                    state.relay_pump = Some(pump);
                    state.bot_id = bot_id;
                    state.status = SessionStatus::Running;
                    if state.started_at.is_none() {
                        state.started_at = Some(self.clock.now());
                    }
                }
                self.broadcast_status(SessionStatus::Running);
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "Relay connect failed");
                {
                    let mut state = self.state.lock().unwrap();
                    state.status = SessionStatus::Ready;
                    state.bot_id = bot_id;
                }
                self.broadcast(&ServerMessage::session_error(
                    e.code(),
                    "could not reach the speech service",
                ));
            }
        }
    }

    /// Stop the session. Idempotent: stopping a room that is not running or
    /// paused is a no-op.
    pub async fn stop_session(&self) {
        let (relay, bot_id) = {
            let mut state = self.state.lock().unwrap();
            if !matches!(
                state.status,
                SessionStatus::Running | SessionStatus::Paused
            ) {
                return;
            }
            state.status = SessionStatus::Ending;
            state.relay_pump.take();
            (state.relay.take(), state.bot_id.take())
        };
        self.broadcast_status(SessionStatus::Ending);

        if let (Some(bot), Some(recall)) = (bot_id, self.recall.as_ref()) {
            if let Err(e) = recall.stop_bot(&bot).await {
                tracing::warn!(session_id = %self.session_id, error = %e, "Bot stop failed");
            }
        }
        if let Some(relay) = relay {
            relay.shutdown().await;
        }

        {
            let mut state = self.state.lock().unwrap();
            state.status = SessionStatus::Ended;
        }
        self.broadcast_status(SessionStatus::Ended);
        tracing::info!(session_id = %self.session_id, "Session ended");
    }

    /// Tear down the room: stop the session, close every socket, clear the
    /// client map.
    pub async fn destroy(&self) {
        self.stop_session().await;
        for client in self.clients.iter() {
            client.push(Outbound::Close);
        }
        self.clients.clear();
    }

    // ── Audio ─────────────────────────────────────────────

    fn handle_audio_chunk(&self, client_id: &str, data_b64: &str) {
        if self.status() != SessionStatus::Running {
            return;
        }
        let bytes = match audio::from_base64(data_b64) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.send_to_client(
                    client_id,
                    &ServerMessage::error(
                        ErrorCode::InvalidMessage,
                        "audio.chunk data is not valid base64",
                    ),
                );
                return;
            }
        };
        self.forward_audio(bytes);
    }

    /// Forward PCM to the relay. Audio in any status but running is dropped.
    pub fn forward_audio(&self, bytes: Vec<u8>) {
        let samples = audio::bytes_to_samples(&bytes);
        let measured = audio::measure(&samples);
        let mut state = self.state.lock().unwrap();
        if state.status != SessionStatus::Running {
            return;
        }
        let reading = state.level.update(measured.rms, measured.peak);
        tracing::trace!(
            session_id = %self.session_id,
            level = reading.smoothed_level,
            peak = reading.peak_level,
            quality = ?measured.quality,
            "Audio level"
        );
        if let Some(relay) = &state.relay {
            relay.send_audio(bytes);
        }
    }

    // ── Relay events ──────────────────────────────────────

    pub fn handle_relay_event(self: &Arc<Self>, event: RelayEvent) {
        match event {
            RelayEvent::State(state) => {
                tracing::info!(session_id = %self.session_id, relay_state = ?state, "Relay state change");
            }
            RelayEvent::UtteranceUpdate { id, text } => {
                self.broadcast(&ServerMessage::TranscriptUpdate {
                    utterance_id: id,
                    text,
                });
            }
            RelayEvent::Utterance(mut utterance) => {
                // The relay hears one mixed stream; the interviewer's manual
                // hint decides attribution.
                utterance.speaker = self.state.lock().unwrap().current_speaker;
                self.finalize_utterance(utterance, true);
            }
            RelayEvent::Coaching(candidate) => {
                self.admit_coaching(candidate);
            }
            RelayEvent::Error { code, message } => {
                self.broadcast(&ServerMessage::session_error(code, message));
            }
        }
    }

    /// Account a finalized utterance and run the coaching cadence. Relay
    /// utterances broadcast as `transcript.finalized`; forged bot utterances
    /// as `transcript.utterance`.
    pub(crate) fn finalize_utterance(&self, utterance: Utterance, from_relay: bool) {
        let duration = utterance.duration_ms();
        let ratio = {
            let mut state = self.state.lock().unwrap();
            state.utterance_count += 1;
            match utterance.speaker {
                Speaker::Interviewer => state.talk_interviewer_ms += duration,
                Speaker::Participant => state.talk_participant_ms += duration,
            }
            let ratio =
                TalkTimeRatio::from_talk_time(state.talk_interviewer_ms, state.talk_participant_ms);
            if state.utterance_count % COACHING_CADENCE == 0 && self.cooldown_elapsed(&state) {
                if let Some(relay) = &state.relay {
                    tracing::debug!(
                        session_id = %self.session_id,
                        utterances = state.utterance_count,
                        "Cadence coaching request"
                    );
                    relay.request_coaching();
                }
            }
            ratio
        };

        if from_relay {
            self.broadcast(&ServerMessage::TranscriptFinalized {
                utterance_id: utterance.id.clone(),
                utterance,
            });
        } else {
            self.broadcast(&ServerMessage::TranscriptUtterance { utterance });
        }
        self.broadcast(&ServerMessage::AnalysisTalkTime { ratio });
    }

    fn cooldown_elapsed(&self, state: &RoomState) -> bool {
        match state.last_coaching_at {
            None => true,
            Some(at) => {
                self.clock.now().signed_duration_since(at).num_seconds() >= COACHING_COOLDOWN_SECS
            }
        }
    }

    /// Silence-first admission: a candidate must clear the confidence floor,
    /// the per-session cap, and the cooldown. Rejected candidates are
    /// dropped silently.
    fn admit_coaching(&self, event: CoachingEvent) {
        let admitted = {
            let mut state = self.state.lock().unwrap();
            if event.confidence < COACHING_CONFIDENCE_FLOOR {
                tracing::debug!(
                    session_id = %self.session_id,
                    confidence = event.confidence,
                    "Coaching rejected: below confidence floor"
                );
                false
            } else if state.coaching_event_count >= MAX_COACHING_PER_SESSION {
                tracing::debug!(session_id = %self.session_id, "Coaching rejected: session cap reached");
                false
            } else if !self.cooldown_elapsed(&state) {
                tracing::debug!(session_id = %self.session_id, "Coaching rejected: within cooldown");
                false
            } else {
                state.coaching_event_count += 1;
                state.last_coaching_at = Some(self.clock.now());
                true
            }
        };

        if admitted {
            tracing::info!(
                session_id = %self.session_id,
                prompt_type = ?event.prompt_type,
                "Coaching prompt admitted"
            );
            self.broadcast_to_role(Role::Interviewer, &ServerMessage::CoachingPrompt { event });
        }
    }

    // ── Webhook-driven operations ─────────────────────────

    /// The bot has joined its call; tell clients the session is live.
    pub fn handle_bot_joined(&self) {
        self.broadcast(&ServerMessage::SessionStatus {
            status: SessionStatus::Running,
            session_id: self.session_id.clone(),
        });
    }

    /// The bot left the call: wind the session down to ending.
    pub async fn handle_bot_left(&self) {
        let relay = {
            let mut state = self.state.lock().unwrap();
            if !matches!(
                state.status,
                SessionStatus::Running | SessionStatus::Paused
            ) {
                return;
            }
            state.status = SessionStatus::Ending;
            state.relay_pump.take();
            state.relay.take()
        };
        self.broadcast_status(SessionStatus::Ending);
        if let Some(relay) = relay {
            relay.shutdown().await;
        }
    }

    /// Recording is finalized; the session is over.
    pub fn handle_bot_done(&self) {
        let changed = {
            let mut state = self.state.lock().unwrap();
            if state.status == SessionStatus::Ending {
                state.status = SessionStatus::Ended;
                true
            } else {
                false
            }
        };
        if changed {
            self.broadcast_status(SessionStatus::Ended);
        }
    }

    pub fn handle_bot_fatal(&self, message: String) {
        self.broadcast(&ServerMessage::session_error(
            ErrorCode::RecallBotFatal,
            message,
        ));
    }

    /// Bot-supplied transcript segment: forge an utterance with the same
    /// shape as relay output. Feeds talk-time accounting; the relay's id
    /// counter is untouched.
    pub fn handle_bot_transcript(
        &self,
        speaker: &str,
        text: String,
        start_time_secs: f64,
        end_time_secs: f64,
    ) {
        let base = {
            let state = self.state.lock().unwrap();
            state.started_at.unwrap_or_else(|| self.clock.now())
        };
        let base_ms = base.timestamp_millis();
        let speaker = if speaker.eq_ignore_ascii_case("interviewer") {
            Speaker::Interviewer
        } else {
            Speaker::Participant
        };
        let utterance = Utterance {
            id: format!("utt_bot_{}", Uuid::now_v7()),
            session_id: self.session_id.clone(),
            speaker,
            text,
            start_time: base_ms + (start_time_secs * 1000.0) as i64,
            end_time: base_ms + (end_time_secs * 1000.0) as i64,
            confidence: 0.9,
        };
        self.finalize_utterance(utterance, false);
    }

    /// Raw PCM from the bot, already decoded. Same admission as client audio.
    pub fn handle_recall_audio(&self, bytes: Vec<u8>) {
        self.forward_audio(bytes);
    }

    // ── Fan-out ───────────────────────────────────────────

    fn encode(message: &ServerMessage) -> Option<Arc<str>> {
        match serde_json::to_string(message) {
            Ok(text) => Some(Arc::from(text)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode server message");
                None
            }
        }
    }

    pub fn broadcast(&self, message: &ServerMessage) {
        let Some(text) = Self::encode(message) else {
            return;
        };
        for client in self.clients.iter() {
            client.push(Outbound::Frame(text.clone()));
        }
    }

    pub fn broadcast_to_role(&self, role: Role, message: &ServerMessage) {
        let Some(text) = Self::encode(message) else {
            return;
        };
        for client in self.clients.iter().filter(|c| c.role == role) {
            client.push(Outbound::Frame(text.clone()));
        }
    }

    pub fn send_to_client(&self, client_id: &str, message: &ServerMessage) {
        let Some(text) = Self::encode(message) else {
            return;
        };
        if let Some(client) = self.clients.get(client_id) {
            client.push(Outbound::Frame(text));
        }
    }

    fn broadcast_status(&self, status: SessionStatus) {
        self.broadcast(&ServerMessage::SessionStatus {
            status,
            session_id: self.session_id.clone(),
        });
    }

    fn broadcast_observer_count(&self) {
        let count = self
            .clients
            .iter()
            .filter(|c| c.role == Role::Observer)
            .count();
        self.broadcast(&ServerMessage::ObserverCount { count });
    }
}

//! Streaming client of the cloud speech/LLM service.
//!
//! One relay is owned by exactly one session room. Audio frames are gated by
//! local VAD before they reach the wire; inbound events are parsed into typed
//! [`RelayEvent`]s and delivered over an unbounded channel into the room.

pub mod prompt;
pub mod protocol;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio;
use crate::audio::vad::{VadConfig, VadState, VoiceActivityDetector};
use crate::types::Clock;
use crate::types::events::ErrorCode;

pub use protocol::{EventParser, RelayEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_RECONNECT: u32 = 3;
const RECONNECT_BASE_MS: u64 = 1_000;
const RECONNECT_CAP_MS: u64 = 16_000;
/// Silent frames still appended after the VAD releases, so turn endings are
/// not clipped.
const GRACE_TAIL_FRAMES: u32 = 25;

const DEFAULT_VAD_THRESHOLD: f32 = 0.008;
const DEFAULT_MAX_SILENT_FRAMES: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Disconnected,
    Connecting,
    Connected,
    Configured,
    Reconnecting,
    Error,
    Closed,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_key: String,
    pub model: String,
    pub session_id: String,
    pub topics: Vec<String>,
    pub cultural_context: Option<String>,
    pub vad_threshold: f32,
    pub max_silent_frames: u32,
}

impl RelayConfig {
    pub fn new(session_id: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            session_id: session_id.into(),
            topics: Vec::new(),
            cultural_context: None,
            vad_threshold: DEFAULT_VAD_THRESHOLD,
            max_silent_frames: DEFAULT_MAX_SILENT_FRAMES,
        }
    }

    fn url(&self) -> String {
        format!("wss://api.openai.com/v1/realtime?model={}", self.model)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("speech service connect deadline elapsed")]
    ConnectTimeout,
    #[error("speech service connection failed: {0}")]
    Network(String),
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::ConnectTimeout => ErrorCode::ConnectTimeout,
            RelayError::Network(_) => ErrorCode::OpenaiError,
        }
    }
}

/// Exponential backoff, capped.
fn reconnect_delay(attempt: u32) -> Duration {
    let ms = RECONNECT_BASE_MS.saturating_mul(1u64 << attempt.min(31));
    Duration::from_millis(ms.min(RECONNECT_CAP_MS))
}

// ── Audio admission gate ───────────────────────────────

struct GateDecision {
    frames: Vec<Vec<u8>>,
    commit: bool,
}

/// Decides which PCM frames reach the wire. Silence that never contained
/// speech is dropped before it costs anything; onset frames are buffered
/// during the VAD attack and flushed once speech is confirmed; after release
/// a short grace tail is appended and the turn committed.
struct AudioGate {
    vad: VoiceActivityDetector,
    pending: Vec<Vec<u8>>,
    sending: bool,
    grace: u32,
}

impl AudioGate {
    fn new(vad_threshold: f32, max_silent_frames: u32) -> Self {
        Self {
            vad: VoiceActivityDetector::new(VadConfig {
                energy_threshold: vad_threshold,
                silence_frames: max_silent_frames,
                ..VadConfig::default()
            }),
            pending: Vec::new(),
            sending: false,
            grace: 0,
        }
    }

    fn process(&mut self, frame: Vec<u8>) -> GateDecision {
        let samples = audio::bytes_to_samples(&frame);
        let result = self.vad.process(&samples);
        match result.state {
            VadState::Speech => {
                let mut frames = std::mem::take(&mut self.pending);
                frames.push(frame);
                self.sending = true;
                self.grace = 0;
                GateDecision {
                    frames,
                    commit: false,
                }
            }
            VadState::Uncertain => {
                // Attack ramp: hold the frame until the VAD confirms speech.
                self.pending.push(frame);
                GateDecision {
                    frames: Vec::new(),
                    commit: false,
                }
            }
            VadState::Silence => {
                self.pending.clear();
                if !self.sending {
                    return GateDecision {
                        frames: Vec::new(),
                        commit: false,
                    };
                }
                self.grace += 1;
                if self.grace >= GRACE_TAIL_FRAMES {
                    self.sending = false;
                    self.grace = 0;
                    GateDecision {
                        frames: vec![frame],
                        commit: true,
                    }
                } else {
                    GateDecision {
                        frames: vec![frame],
                        commit: false,
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.vad.reset();
        self.pending.clear();
        self.sending = false;
        self.grace = 0;
    }
}

// ── Relay handle ───────────────────────────────────────

enum RelayCommand {
    Audio(Vec<u8>),
    RequestCoaching,
    Shutdown,
}

pub struct SpeechRelay {
    cmd_tx: mpsc::UnboundedSender<RelayCommand>,
    state: Arc<StdMutex<RelayState>>,
    task: tokio::task::JoinHandle<()>,
}

impl SpeechRelay {
    /// Open the connection and configure the session. Fails within the 15 s
    /// deadline; on success a driver task owns the socket until shutdown.
    pub async fn connect(
        config: RelayConfig,
        clock: Arc<dyn Clock>,
        event_tx: mpsc::UnboundedSender<RelayEvent>,
    ) -> Result<SpeechRelay, RelayError> {
        let state = Arc::new(StdMutex::new(RelayState::Connecting));
        let _ = event_tx.send(RelayEvent::State(RelayState::Connecting));

        let ws = open_connection(&config).await?;
        set_state(&state, &event_tx, RelayState::Connected);
        tracing::info!(session_id = %config.session_id, model = %config.model, "Relay connected");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(drive(ws, config, clock, cmd_rx, event_tx, state.clone()));

        Ok(SpeechRelay {
            cmd_tx,
            state,
            task,
        })
    }

    /// Queue one PCM16 frame for VAD-gated admission.
    pub fn send_audio(&self, pcm: Vec<u8>) {
        let _ = self.cmd_tx.send(RelayCommand::Audio(pcm));
    }

    /// Ask the model for an immediate coaching evaluation.
    pub fn request_coaching(&self) {
        let _ = self.cmd_tx.send(RelayCommand::RequestCoaching);
    }

    pub fn state(&self) -> RelayState {
        *self.state.lock().unwrap()
    }

    /// Close the connection with a normal close frame and wait for the driver
    /// to wind down. Pending reconnect timers are cancelled on this path.
    pub async fn shutdown(self) {
        tracing::debug!(state = ?self.state(), "Relay shutdown requested");
        let _ = self.cmd_tx.send(RelayCommand::Shutdown);
        let _ = timeout(Duration::from_secs(5), self.task).await;
    }
}

// ── Driver ─────────────────────────────────────────────

fn set_state(
    state: &Arc<StdMutex<RelayState>>,
    event_tx: &mpsc::UnboundedSender<RelayEvent>,
    next: RelayState,
) {
    let mut current = state.lock().unwrap();
    if *current == RelayState::Closed || *current == next {
        return;
    }
    *current = next;
    let _ = event_tx.send(RelayEvent::State(next));
}

async fn open_connection(config: &RelayConfig) -> Result<WsStream, RelayError> {
    let mut request = config
        .url()
        .into_client_request()
        .map_err(|e| RelayError::Network(e.to_string()))?;
    let auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
        .map_err(|e| RelayError::Network(e.to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, auth);
    request
        .headers_mut()
        .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (mut ws, _response) = timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| RelayError::ConnectTimeout)?
        .map_err(|e| RelayError::Network(e.to_string()))?;

    let instructions =
        prompt::coaching_instructions(&config.topics, config.cultural_context.as_deref());
    send_json(&mut ws, &protocol::session_update(instructions))
        .await
        .map_err(|_| RelayError::Network("failed to send session configuration".into()))?;

    Ok(ws)
}

async fn send_json<T: Serialize>(ws: &mut WsStream, value: &T) -> Result<(), ()> {
    let text = serde_json::to_string(value).map_err(|_| ())?;
    ws.send(Message::Text(text.into())).await.map_err(|_| ())
}

enum SessionEnd {
    Shutdown,
    Lost,
}

enum Reconnected {
    Ok(Box<WsStream>),
    Shutdown,
    GaveUp,
}

async fn drive(
    mut ws: WsStream,
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    mut cmd_rx: mpsc::UnboundedReceiver<RelayCommand>,
    event_tx: mpsc::UnboundedSender<RelayEvent>,
    state: Arc<StdMutex<RelayState>>,
) {
    let mut parser = EventParser::new(config.session_id.clone(), clock);
    let mut gate = AudioGate::new(config.vad_threshold, config.max_silent_frames);

    loop {
        match session_loop(&mut ws, &mut cmd_rx, &mut parser, &mut gate, &event_tx, &state).await {
            SessionEnd::Shutdown => {
                gate.reset();
                set_state(&state, &event_tx, RelayState::Closed);
                tracing::info!(session_id = %config.session_id, "Relay closed");
                return;
            }
            SessionEnd::Lost => {
                set_state(&state, &event_tx, RelayState::Disconnected);
                match try_reconnect(&config, &mut cmd_rx, &event_tx, &state).await {
                    Reconnected::Ok(new_ws) => {
                        ws = *new_ws;
                        gate.reset();
                        set_state(&state, &event_tx, RelayState::Connected);
                        tracing::info!(session_id = %config.session_id, "Relay reconnected");
                    }
                    Reconnected::Shutdown => {
                        set_state(&state, &event_tx, RelayState::Closed);
                        return;
                    }
                    Reconnected::GaveUp => {
                        set_state(&state, &event_tx, RelayState::Error);
                        let _ = event_tx.send(RelayEvent::Error {
                            code: ErrorCode::NetworkError,
                            message: "speech service connection lost".into(),
                        });
                        // Keep draining so late audio is dropped instead of
                        // piling up in the channel.
                        while let Some(cmd) = cmd_rx.recv().await {
                            if matches!(cmd, RelayCommand::Shutdown) {
                                break;
                            }
                        }
                        set_state(&state, &event_tx, RelayState::Closed);
                        return;
                    }
                }
            }
        }
    }
}

async fn session_loop(
    ws: &mut WsStream,
    cmd_rx: &mut mpsc::UnboundedReceiver<RelayCommand>,
    parser: &mut EventParser,
    gate: &mut AudioGate,
    event_tx: &mpsc::UnboundedSender<RelayEvent>,
    state: &Arc<StdMutex<RelayState>>,
) -> SessionEnd {
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(RelayCommand::Audio(frame)) => {
                    let decision = gate.process(frame);
                    for frame in decision.frames {
                        let append = protocol::audio_append(audio::to_base64(&frame));
                        if send_json(ws, &append).await.is_err() {
                            return SessionEnd::Lost;
                        }
                    }
                    if decision.commit {
                        tracing::debug!("Committing audio turn");
                        if send_json(ws, &protocol::audio_commit()).await.is_err() {
                            return SessionEnd::Lost;
                        }
                    }
                }
                Some(RelayCommand::RequestCoaching) => {
                    if send_json(ws, &protocol::coaching_request()).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                Some(RelayCommand::Shutdown) | None => {
                    let _ = ws
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        })))
                        .await;
                    return SessionEnd::Shutdown;
                }
            },
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    for event in parser.parse(&text) {
                        if let RelayEvent::State(next) = event {
                            set_state(state, event_tx, next);
                        } else {
                            let _ = event_tx.send(event);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Lost,
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary is not
                    // part of the service protocol.
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Relay socket error");
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

async fn try_reconnect(
    config: &RelayConfig,
    cmd_rx: &mut mpsc::UnboundedReceiver<RelayCommand>,
    event_tx: &mpsc::UnboundedSender<RelayEvent>,
    state: &Arc<StdMutex<RelayState>>,
) -> Reconnected {
    for attempt in 0..MAX_RECONNECT {
        set_state(state, event_tx, RelayState::Reconnecting);
        let delay = reconnect_delay(attempt);
        tracing::info!(
            session_id = %config.session_id,
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Relay reconnecting"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(RelayCommand::Shutdown) | None => return Reconnected::Shutdown,
                    // Audio sent while disconnected is dropped.
                    Some(_) => {}
                }
            }
        }

        set_state(state, event_tx, RelayState::Connecting);
        match open_connection(config).await {
            Ok(ws) => return Reconnected::Ok(Box::new(ws)),
            Err(e) => {
                tracing::warn!(
                    session_id = %config.session_id,
                    attempt = attempt + 1,
                    error = %e,
                    "Relay reconnect attempt failed"
                );
            }
        }
    }
    Reconnected::GaveUp
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_frame() -> Vec<u8> {
        audio::samples_to_bytes(&vec![1638i16; 480]) // rms ≈ 0.05
    }

    fn silent_frame() -> Vec<u8> {
        audio::samples_to_bytes(&vec![0i16; 480])
    }

    fn count(gate: &mut AudioGate, frame: Vec<u8>) -> (usize, bool) {
        let decision = gate.process(frame);
        (decision.frames.len(), decision.commit)
    }

    #[test]
    fn speech_frames_all_reach_the_wire() {
        let mut gate = AudioGate::new(DEFAULT_VAD_THRESHOLD, DEFAULT_MAX_SILENT_FRAMES);
        let mut appended = 0;
        for _ in 0..10 {
            let (frames, commit) = count(&mut gate, speech_frame());
            appended += frames;
            assert!(!commit);
        }
        // Onset frames are buffered through the attack and flushed, so all
        // ten arrive.
        assert_eq!(appended, 10);
    }

    #[test]
    fn sustained_silence_commits_exactly_once() {
        let mut gate = AudioGate::new(DEFAULT_VAD_THRESHOLD, DEFAULT_MAX_SILENT_FRAMES);
        for _ in 0..10 {
            gate.process(speech_frame());
        }
        let mut commits = 0;
        for _ in 0..200 {
            let decision = gate.process(silent_frame());
            if decision.commit {
                commits += 1;
            }
        }
        assert_eq!(commits, 1);
        // After the commit the gate goes quiet.
        let decision = gate.process(silent_frame());
        assert!(decision.frames.is_empty());
        assert!(!decision.commit);
    }

    #[test]
    fn silence_without_speech_is_dropped() {
        let mut gate = AudioGate::new(DEFAULT_VAD_THRESHOLD, DEFAULT_MAX_SILENT_FRAMES);
        for _ in 0..50 {
            let (frames, commit) = count(&mut gate, silent_frame());
            assert_eq!(frames, 0);
            assert!(!commit);
        }
    }

    #[test]
    fn grace_tail_appends_before_commit() {
        // Tight release so the test stays small: release after 5 silent
        // frames, then 25 grace frames, then commit.
        let mut gate = AudioGate::new(DEFAULT_VAD_THRESHOLD, 5);
        for _ in 0..10 {
            gate.process(speech_frame());
        }
        let mut appended = 0;
        let mut commit_at = None;
        for i in 0.. {
            let decision = gate.process(silent_frame());
            appended += decision.frames.len();
            if decision.commit {
                commit_at = Some(i);
                break;
            }
            if i > 100 {
                break;
            }
        }
        let commit_at = commit_at.expect("gate never committed");
        // Everything up to the commit frame was appended (release tail plus
        // the 25-frame grace window).
        assert_eq!(appended, commit_at + 1);
        assert!(commit_at >= (GRACE_TAIL_FRAMES as usize) + 4);
    }

    #[test]
    fn gate_reset_requires_fresh_attack() {
        let mut gate = AudioGate::new(DEFAULT_VAD_THRESHOLD, DEFAULT_MAX_SILENT_FRAMES);
        for _ in 0..10 {
            gate.process(speech_frame());
        }
        gate.reset();
        let (frames, _) = count(&mut gate, speech_frame());
        // First frame after reset is back in the attack ramp.
        assert_eq!(frames, 0);
    }

    #[test]
    fn reconnect_delay_doubles_and_caps() {
        assert_eq!(reconnect_delay(0), Duration::from_millis(1_000));
        assert_eq!(reconnect_delay(1), Duration::from_millis(2_000));
        assert_eq!(reconnect_delay(2), Duration::from_millis(4_000));
        assert_eq!(reconnect_delay(4), Duration::from_millis(16_000));
        assert_eq!(reconnect_delay(30), Duration::from_millis(16_000));
    }

    #[test]
    fn relay_config_defaults() {
        let config = RelayConfig::new("s1", "sk-test", "gpt-4o-realtime-preview");
        assert!((config.vad_threshold - 0.008).abs() < f32::EPSILON);
        assert_eq!(config.max_silent_frames, 150);
        assert!(config.url().contains("model=gpt-4o-realtime-preview"));
    }
}

use serde::{Deserialize, Serialize};

use super::entities::{
    CoachingEvent, ObserverComment, SessionStatus, TalkTimeRatio, TopicStatus, TopicUpdate,
    Utterance,
};

// ── Wire error codes ───────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidMessage,
    UnknownMessage,
    Unauthorized,
    InvalidState,
    RecallError,
    OpenaiError,
    RecallBotFatal,
    ConnectTimeout,
    NetworkError,
    RateLimit,
}

// ── Client → Server messages ───────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "session.start", rename_all = "camelCase")]
    SessionStart {
        #[serde(default)]
        meeting_url: Option<String>,
        #[serde(default)]
        use_local_mic: Option<bool>,
    },
    #[serde(rename = "session.pause")]
    SessionPause,
    #[serde(rename = "session.resume")]
    SessionResume,
    #[serde(rename = "session.stop")]
    SessionStop,
    #[serde(rename = "audio.chunk")]
    AudioChunk { data: String },
    #[serde(rename = "insight.flag")]
    InsightFlag {
        timestamp: f64,
        #[serde(default)]
        note: Option<String>,
    },
    #[serde(rename = "coaching.respond", rename_all = "camelCase")]
    CoachingRespond {
        event_id: String,
        response: CoachingResponse,
    },
    #[serde(rename = "coaching.pull")]
    CoachingPull,
    #[serde(rename = "topic.update", rename_all = "camelCase")]
    TopicUpdate {
        topic_name: String,
        status: TopicStatus,
    },
    #[serde(rename = "speaker.toggle")]
    SpeakerToggle,
    #[serde(rename = "observer.join")]
    ObserverJoin,
    #[serde(rename = "observer.comment")]
    ObserverComment { text: String, timestamp: f64 },
    #[serde(rename = "observer.question")]
    ObserverQuestion { text: String },
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoachingResponse {
    Accepted,
    Dismissed,
    Snoozed,
}

const KNOWN_TYPES: &[&str] = &[
    "session.start",
    "session.pause",
    "session.resume",
    "session.stop",
    "audio.chunk",
    "insight.flag",
    "coaching.respond",
    "coaching.pull",
    "topic.update",
    "speaker.toggle",
    "observer.join",
    "observer.comment",
    "observer.question",
    "ping",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Malformed JSON, missing `type`, or a known type with a bad payload.
    Invalid,
    /// Well-formed frame whose `type` is outside the vocabulary.
    Unknown(String),
}

impl DecodeError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DecodeError::Invalid => ErrorCode::InvalidMessage,
            DecodeError::Unknown(_) => ErrorCode::UnknownMessage,
        }
    }
}

/// Strict ingress decode: unknown `type` values and malformed payloads are
/// distinguished so the caller can answer with the right error code.
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| DecodeError::Invalid)?;
    let msg_type = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or(DecodeError::Invalid)?;
    if !KNOWN_TYPES.contains(&msg_type) {
        return Err(DecodeError::Unknown(msg_type.to_string()));
    }
    serde_json::from_value(value).map_err(|_| DecodeError::Invalid)
}

// ── Server → Client messages ───────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "session.status", rename_all = "camelCase")]
    SessionStatus {
        status: SessionStatus,
        session_id: String,
    },
    #[serde(rename = "session.error")]
    SessionError { code: ErrorCode, message: String },
    #[serde(rename = "transcript.utterance")]
    TranscriptUtterance { utterance: Utterance },
    #[serde(rename = "transcript.update", rename_all = "camelCase")]
    TranscriptUpdate { utterance_id: String, text: String },
    #[serde(rename = "transcript.finalized", rename_all = "camelCase")]
    TranscriptFinalized {
        utterance_id: String,
        utterance: Utterance,
    },
    #[serde(rename = "coaching.prompt")]
    CoachingPrompt { event: CoachingEvent },
    #[serde(rename = "coaching.dismiss", rename_all = "camelCase")]
    CoachingDismiss { event_id: String },
    #[serde(rename = "analysis.topic")]
    AnalysisTopic { topic: TopicUpdate },
    #[serde(rename = "analysis.talktime")]
    AnalysisTalkTime { ratio: TalkTimeRatio },
    #[serde(rename = "observer.count")]
    ObserverCount { count: usize },
    #[serde(rename = "observer.comment")]
    ObserverComment { comment: ObserverComment },
    #[serde(rename = "observer.question")]
    ObserverQuestion { question: String, from: String },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> ServerMessage {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    pub fn session_error(code: ErrorCode, message: impl Into<String>) -> ServerMessage {
        ServerMessage::SessionError {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_session_start_with_options() {
        let msg = decode_client_message(
            r#"{"type":"session.start","meetingUrl":"https://meet.example/x","useLocalMic":false}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::SessionStart {
                meeting_url,
                use_local_mic,
            } => {
                assert_eq!(meeting_url.as_deref(), Some("https://meet.example/x"));
                assert_eq!(use_local_mic, Some(false));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn decode_bare_control_messages() {
        assert!(matches!(
            decode_client_message(r#"{"type":"session.pause"}"#),
            Ok(ClientMessage::SessionPause)
        ));
        assert!(matches!(
            decode_client_message(r#"{"type":"ping"}"#),
            Ok(ClientMessage::Ping)
        ));
    }

    #[test]
    fn decode_unknown_type() {
        match decode_client_message(r#"{"type":"session.restart"}"#) {
            Err(DecodeError::Unknown(t)) => assert_eq!(t, "session.restart"),
            other => panic!("expected unknown-type error, got {other:?}"),
        }
    }

    #[test]
    fn decode_malformed_json_is_invalid() {
        assert_eq!(
            decode_client_message("not json").unwrap_err(),
            DecodeError::Invalid
        );
        assert_eq!(
            decode_client_message(r#"{"no_type":1}"#).unwrap_err(),
            DecodeError::Invalid
        );
    }

    #[test]
    fn decode_known_type_bad_payload_is_invalid() {
        // audio.chunk without its data field is malformed, not unknown.
        assert_eq!(
            decode_client_message(r#"{"type":"audio.chunk"}"#).unwrap_err(),
            DecodeError::Invalid
        );
    }

    #[test]
    fn decode_coaching_respond() {
        let msg = decode_client_message(
            r#"{"type":"coaching.respond","eventId":"c1","response":"dismissed"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::CoachingRespond { event_id, response } => {
                assert_eq!(event_id, "c1");
                assert_eq!(response, CoachingResponse::Dismissed);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn encode_session_status() {
        let frame = serde_json::to_value(ServerMessage::SessionStatus {
            status: SessionStatus::Running,
            session_id: "s1".into(),
        })
        .unwrap();
        assert_eq!(frame["type"], "session.status");
        assert_eq!(frame["status"], "running");
        assert_eq!(frame["sessionId"], "s1");
    }

    #[test]
    fn encode_error_codes_screaming_snake() {
        let frame = serde_json::to_value(ServerMessage::error(
            ErrorCode::UnknownMessage,
            "unknown message type",
        ))
        .unwrap();
        assert_eq!(frame["code"], "UNKNOWN_MESSAGE");
        let frame = serde_json::to_value(ServerMessage::session_error(
            ErrorCode::RecallBotFatal,
            "bot died",
        ))
        .unwrap();
        assert_eq!(frame["code"], "RECALL_BOT_FATAL");
        assert_eq!(frame["type"], "session.error");
    }
}

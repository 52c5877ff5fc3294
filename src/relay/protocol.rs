//! Wire types and event parsing for the streaming speech service.
//!
//! Outbound messages are typed structs; inbound events arrive as loosely
//! structured JSON and are parsed defensively into [`RelayEvent`]s.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::types::Clock;
use crate::types::entities::{CoachingEvent, PromptType, Speaker, Utterance};
use crate::types::events::ErrorCode;

use super::RelayState;

/// Confidence floor below which parsed coaching candidates are not surfaced.
pub const COACHING_CONFIDENCE_FLOOR: f64 = 0.85;
/// Confidence assigned to free-text fallback candidates.
const FALLBACK_CONFIDENCE: f64 = 0.7;
/// Confidence assigned to completed transcriptions.
const TRANSCRIPT_CONFIDENCE: f64 = 0.9;

// ── Outbound messages ──────────────────────────────────

#[derive(Serialize)]
pub struct SessionUpdate {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub session: SessionConfig,
}

#[derive(Serialize)]
pub struct SessionConfig {
    pub modalities: &'static [&'static str],
    pub instructions: String,
    pub input_audio_format: &'static str,
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetection,
    pub temperature: f64,
    pub max_response_output_tokens: u32,
}

#[derive(Serialize)]
pub struct TranscriptionConfig {
    pub model: &'static str,
}

#[derive(Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: &'static str,
    pub threshold: f64,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

#[derive(Serialize)]
pub struct AudioBufferAppend {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub audio: String,
}

#[derive(Serialize)]
pub struct AudioBufferCommit {
    #[serde(rename = "type")]
    msg_type: &'static str,
}

#[derive(Serialize)]
pub struct ResponseCreate {
    #[serde(rename = "type")]
    msg_type: &'static str,
    pub response: ResponseDirective,
}

#[derive(Serialize)]
pub struct ResponseDirective {
    pub modalities: &'static [&'static str],
    pub instructions: &'static str,
}

pub fn session_update(instructions: String) -> SessionUpdate {
    SessionUpdate {
        msg_type: "session.update",
        session: SessionConfig {
            modalities: &["text"],
            instructions,
            input_audio_format: "pcm16",
            input_audio_transcription: TranscriptionConfig {
                model: "gpt-4o-mini-transcribe",
            },
            turn_detection: TurnDetection {
                detection_type: "server_vad",
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
            },
            temperature: 0.6,
            max_response_output_tokens: 300,
        },
    }
}

pub fn audio_append(audio_b64: String) -> AudioBufferAppend {
    AudioBufferAppend {
        msg_type: "input_audio_buffer.append",
        audio: audio_b64,
    }
}

pub fn audio_commit() -> AudioBufferCommit {
    AudioBufferCommit {
        msg_type: "input_audio_buffer.commit",
    }
}

pub fn coaching_request() -> ResponseCreate {
    ResponseCreate {
        msg_type: "response.create",
        response: ResponseDirective {
            modalities: &["text"],
            instructions: "Analyze the most recent exchange of the interview. If a coaching \
                           suggestion is clearly warranted, respond with the coaching JSON \
                           object; otherwise respond with a SILENCE_OK placeholder.",
        },
    }
}

// ── Inbound events ─────────────────────────────────────

#[derive(Debug, Clone)]
pub enum RelayEvent {
    State(RelayState),
    UtteranceUpdate { id: String, text: String },
    Utterance(Utterance),
    Coaching(CoachingEvent),
    Error { code: ErrorCode, message: String },
}

struct PendingUtterance {
    id: String,
    start_time: i64,
    partial: String,
}

/// Stateful parser for service events. Tracks the in-flight utterance and
/// assigns monotonic per-session utterance ids.
pub struct EventParser {
    session_id: String,
    clock: Arc<dyn Clock>,
    utterance_seq: u64,
    pending: Option<PendingUtterance>,
}

impl EventParser {
    pub fn new(session_id: String, clock: Arc<dyn Clock>) -> Self {
        Self {
            session_id,
            clock,
            utterance_seq: 0,
            pending: None,
        }
    }

    /// Parse one inbound text frame into zero or more relay events.
    pub fn parse(&mut self, text: &str) -> Vec<RelayEvent> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(session_id = %self.session_id, error = %e, "Unparseable service frame");
                return Vec::new();
            }
        };
        let event_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

        match event_type {
            "session.created" => {
                tracing::info!(session_id = %self.session_id, "Speech service session created");
                Vec::new()
            }
            "session.updated" => {
                tracing::info!(session_id = %self.session_id, "Speech service session configured");
                vec![RelayEvent::State(RelayState::Configured)]
            }
            "input_audio_buffer.speech_started" => {
                let id = format!("utt_{}_{}", self.session_id, self.utterance_seq);
                self.utterance_seq += 1;
                self.pending = Some(PendingUtterance {
                    id,
                    start_time: self.clock.now().timestamp_millis(),
                    partial: String::new(),
                });
                Vec::new()
            }
            "conversation.item.input_audio_transcription.delta" => {
                let delta = value.get("delta").and_then(|d| d.as_str()).unwrap_or("");
                match self.pending.as_mut() {
                    Some(pending) if !delta.is_empty() => {
                        pending.partial.push_str(delta);
                        vec![RelayEvent::UtteranceUpdate {
                            id: pending.id.clone(),
                            text: pending.partial.clone(),
                        }]
                    }
                    _ => Vec::new(),
                }
            }
            "conversation.item.input_audio_transcription.completed" => {
                let transcript = value
                    .get("transcript")
                    .and_then(|t| t.as_str())
                    .unwrap_or("")
                    .to_string();
                let now = self.clock.now().timestamp_millis();
                let pending = self.pending.take();
                let (id, start_time) = match pending {
                    Some(p) => (p.id, p.start_time),
                    None => {
                        // Completed without a preceding speech start; assign
                        // a fresh id so downstream accounting still works.
                        let id = format!("utt_{}_{}", self.session_id, self.utterance_seq);
                        self.utterance_seq += 1;
                        (id, now)
                    }
                };
                vec![RelayEvent::Utterance(Utterance {
                    id,
                    session_id: self.session_id.clone(),
                    speaker: Speaker::Participant,
                    text: transcript,
                    start_time,
                    end_time: now,
                    confidence: TRANSCRIPT_CONFIDENCE,
                })]
            }
            "response.text.done" => {
                let text = value.get("text").and_then(|t| t.as_str()).unwrap_or("");
                self.parse_coaching_text(text)
                    .map(RelayEvent::Coaching)
                    .into_iter()
                    .collect()
            }
            "response.done" => {
                // The aggregate form carries the text nested in the output
                // items; take the first text content if present.
                let text = value
                    .pointer("/response/output/0/content/0/text")
                    .and_then(|t| t.as_str())
                    .unwrap_or("");
                self.parse_coaching_text(text)
                    .map(RelayEvent::Coaching)
                    .into_iter()
                    .collect()
            }
            "error" => {
                let message = value
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown service error")
                    .to_string();
                let code = match value.pointer("/error/code").and_then(|c| c.as_str()) {
                    Some("rate_limit_exceeded") => ErrorCode::RateLimit,
                    _ => ErrorCode::OpenaiError,
                };
                vec![RelayEvent::Error { code, message }]
            }
            _ => {
                tracing::trace!(
                    session_id = %self.session_id,
                    event_type = event_type,
                    "Ignoring service event"
                );
                Vec::new()
            }
        }
    }

    /// Model output → coaching candidate. JSON first; a length-bounded
    /// free-text fallback otherwise.
    fn parse_coaching_text(&self, text: &str) -> Option<CoachingEvent> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            if parsed.get("type").and_then(|t| t.as_str()) != Some("coaching") {
                return None;
            }
            let confidence = parsed
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(0.0);
            if confidence < COACHING_CONFIDENCE_FLOOR {
                tracing::debug!(
                    session_id = %self.session_id,
                    confidence,
                    "Coaching candidate below confidence floor"
                );
                return None;
            }
            let prompt_type = parsed
                .get("promptType")
                .and_then(|p| serde_json::from_value::<PromptType>(p.clone()).ok())
                .unwrap_or(PromptType::FollowUp);
            let prompt_text = parsed
                .get("promptText")
                .and_then(|p| p.as_str())
                .unwrap_or("")
                .to_string();
            if prompt_text.is_empty() {
                return None;
            }
            let explanation = parsed
                .get("explanation")
                .and_then(|e| e.as_str())
                .map(str::to_string);
            return Some(self.coaching_event(prompt_type, prompt_text, confidence, explanation));
        }

        // Not JSON; plausible short advice becomes a low-confidence follow-up.
        if (5..=200).contains(&trimmed.chars().count()) {
            return Some(self.coaching_event(
                PromptType::FollowUp,
                trimmed.to_string(),
                FALLBACK_CONFIDENCE,
                None,
            ));
        }
        None
    }

    fn coaching_event(
        &self,
        prompt_type: PromptType,
        prompt_text: String,
        confidence: f64,
        explanation: Option<String>,
    ) -> CoachingEvent {
        CoachingEvent {
            id: format!("coach_{}", Uuid::now_v7()),
            session_id: self.session_id.clone(),
            prompt_type,
            prompt_text,
            confidence,
            explanation,
            displayed_at: self.clock.now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SystemClock;

    fn parser() -> EventParser {
        EventParser::new("s1".into(), Arc::new(SystemClock))
    }

    #[test]
    fn session_update_shape() {
        let json = serde_json::to_value(session_update("be quiet".into())).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["modalities"], serde_json::json!(["text"]));
        assert_eq!(json["session"]["input_audio_format"], "pcm16");
        assert_eq!(json["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(json["session"]["turn_detection"]["threshold"], 0.5);
        assert_eq!(json["session"]["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(json["session"]["turn_detection"]["silence_duration_ms"], 500);
        assert_eq!(json["session"]["temperature"], 0.6);
        assert_eq!(json["session"]["max_response_output_tokens"], 300);
    }

    #[test]
    fn parse_session_updated_configures() {
        let events = parser().parse(r#"{"type":"session.updated","session":{}}"#);
        assert!(matches!(
            events.as_slice(),
            [RelayEvent::State(RelayState::Configured)]
        ));
    }

    #[test]
    fn utterance_ids_are_monotonic_per_session() {
        let mut p = parser();
        p.parse(r#"{"type":"input_audio_buffer.speech_started"}"#);
        let first = p.parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hi"}"#,
        );
        p.parse(r#"{"type":"input_audio_buffer.speech_started"}"#);
        let second = p.parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"there"}"#,
        );
        let (RelayEvent::Utterance(a), RelayEvent::Utterance(b)) = (&first[0], &second[0]) else {
            panic!("expected utterances");
        };
        assert_eq!(a.id, "utt_s1_0");
        assert_eq!(b.id, "utt_s1_1");
        assert_eq!(a.speaker, Speaker::Participant);
        assert!((a.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn deltas_accumulate_into_partials() {
        let mut p = parser();
        p.parse(r#"{"type":"input_audio_buffer.speech_started"}"#);
        let first = p.parse(
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"tell "}"#,
        );
        let second = p.parse(
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"me more"}"#,
        );
        assert!(matches!(
            &first[0],
            RelayEvent::UtteranceUpdate { id, text } if id == "utt_s1_0" && text == "tell "
        ));
        assert!(matches!(
            &second[0],
            RelayEvent::UtteranceUpdate { id, text } if id == "utt_s1_0" && text == "tell me more"
        ));

        let done = p.parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"tell me more"}"#,
        );
        assert!(matches!(
            &done[0],
            RelayEvent::Utterance(u) if u.id == "utt_s1_0" && u.text == "tell me more"
        ));
    }

    #[test]
    fn delta_without_speech_start_is_ignored() {
        let mut p = parser();
        let events = p.parse(
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"stray"}"#,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn coaching_json_above_floor_is_surfaced() {
        let mut p = parser();
        let payload = r#"{"type":"coaching","promptType":"FOLLOW_UP","promptText":"Why so?","confidence":0.9}"#;
        let frame = serde_json::json!({"type": "response.text.done", "text": payload});
        let events = p.parse(&frame.to_string());
        let [RelayEvent::Coaching(event)] = events.as_slice() else {
            panic!("expected a coaching event");
        };
        assert_eq!(event.prompt_type, PromptType::FollowUp);
        assert_eq!(event.prompt_text, "Why so?");
        assert!((event.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn coaching_json_below_floor_is_dropped() {
        let mut p = parser();
        let payload = r#"{"type":"coaching","promptType":"PROBE_DEEPER","promptText":"Go on","confidence":0.84}"#;
        let frame = serde_json::json!({"type": "response.text.done", "text": payload});
        assert!(p.parse(&frame.to_string()).is_empty());
    }

    #[test]
    fn non_coaching_json_is_ignored() {
        let mut p = parser();
        let frame = serde_json::json!({
            "type": "response.text.done",
            "text": r#"{"type":"summary","promptText":"irrelevant","confidence":0.99}"#
        });
        assert!(p.parse(&frame.to_string()).is_empty());
    }

    #[test]
    fn free_text_fallback_is_low_confidence_follow_up() {
        let mut p = parser();
        let frame = serde_json::json!({
            "type": "response.text.done",
            "text": "Ask what changed after the migration."
        });
        let events = p.parse(&frame.to_string());
        let [RelayEvent::Coaching(event)] = events.as_slice() else {
            panic!("expected a coaching event");
        };
        assert_eq!(event.prompt_type, PromptType::FollowUp);
        assert!((event.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn free_text_outside_length_bounds_is_dropped() {
        let mut p = parser();
        let short = serde_json::json!({"type": "response.text.done", "text": "ok"});
        assert!(p.parse(&short.to_string()).is_empty());
        let long = serde_json::json!({"type": "response.text.done", "text": "x".repeat(201)});
        assert!(p.parse(&long.to_string()).is_empty());
    }

    #[test]
    fn response_done_digs_out_nested_text() {
        let mut p = parser();
        let payload = r#"{"type":"coaching","promptType":"TOPIC_GAP","promptText":"Cover scaling","confidence":0.88}"#;
        let frame = serde_json::json!({
            "type": "response.done",
            "response": {"output": [{"content": [{"type": "text", "text": payload}]}]}
        });
        let events = p.parse(&frame.to_string());
        assert!(matches!(
            events.as_slice(),
            [RelayEvent::Coaching(e)] if e.prompt_type == PromptType::TopicGap
        ));
    }

    #[test]
    fn service_errors_map_to_codes() {
        let mut p = parser();
        let events =
            p.parse(r#"{"type":"error","error":{"message":"boom","code":"server_error"}}"#);
        assert!(matches!(
            events.as_slice(),
            [RelayEvent::Error { code: ErrorCode::OpenaiError, .. }]
        ));
        let events = p.parse(
            r#"{"type":"error","error":{"message":"slow down","code":"rate_limit_exceeded"}}"#,
        );
        assert!(matches!(
            events.as_slice(),
            [RelayEvent::Error { code: ErrorCode::RateLimit, .. }]
        ));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let mut p = parser();
        assert!(p.parse(r#"{"type":"response.created"}"#).is_empty());
        assert!(p.parse("not json at all").is_empty());
    }
}

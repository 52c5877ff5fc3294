use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Roles & session lifecycle ──────────────────────────

/// Connection role. A room holds at most one interviewer; observers are
/// unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Interviewer,
    Observer,
}

impl Role {
    pub fn parse(s: &str) -> Role {
        match s {
            "interviewer" => Role::Interviewer,
            _ => Role::Observer,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Ready,
    Running,
    Paused,
    Ending,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Interviewer,
    Participant,
}

impl Speaker {
    pub fn toggled(self) -> Speaker {
        match self {
            Speaker::Interviewer => Speaker::Participant,
            Speaker::Participant => Speaker::Interviewer,
        }
    }
}

// ── Transcript ─────────────────────────────────────────

/// One finalized transcript segment. Ids are assigned by the relay with a
/// per-session monotonic counter (`utt_<session>_<n>`); forged utterances
/// from bot transcripts reuse the same shape with uuid ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    pub id: String,
    pub session_id: String,
    pub speaker: Speaker,
    pub text: String,
    /// Epoch milliseconds.
    pub start_time: i64,
    /// Epoch milliseconds.
    pub end_time: i64,
    pub confidence: f64,
}

impl Utterance {
    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).max(0)
    }
}

// ── Coaching ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromptType {
    FollowUp,
    ProbeDeeper,
    TopicGap,
    LeadingAlert,
    SilenceOk,
    Rapport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoachingEvent {
    pub id: String,
    pub session_id: String,
    pub prompt_type: PromptType,
    pub prompt_text: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub displayed_at: DateTime<Utc>,
}

// ── Analytics ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    NotCovered,
    Partial,
    Covered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicUpdate {
    pub topic_name: String,
    pub status: TopicStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TalkTimeStatus {
    Good,
    Warning,
    OverTalking,
}

/// Integer percentages (nearest), derived after every finalized utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkTimeRatio {
    pub interviewer: u32,
    pub participant: u32,
    pub status: TalkTimeStatus,
}

impl TalkTimeRatio {
    /// Derive from accumulated per-speaker milliseconds. Interviewer share
    /// up to 40% is good, up to 55% a warning, above that over-talking.
    pub fn from_talk_time(interviewer_ms: i64, participant_ms: i64) -> TalkTimeRatio {
        let total = interviewer_ms + participant_ms;
        if total <= 0 {
            return TalkTimeRatio {
                interviewer: 0,
                participant: 0,
                status: TalkTimeStatus::Good,
            };
        }
        let interviewer = ((interviewer_ms as f64 / total as f64) * 100.0).round() as u32;
        let participant = 100u32.saturating_sub(interviewer);
        let status = if interviewer <= 40 {
            TalkTimeStatus::Good
        } else if interviewer <= 55 {
            TalkTimeStatus::Warning
        } else {
            TalkTimeStatus::OverTalking
        };
        TalkTimeRatio {
            interviewer,
            participant,
            status,
        }
    }
}

// ── Observer side channel ──────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverComment {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    /// Seconds into the session, as supplied by the client.
    pub timestamp: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talk_time_ratio_integer_percent() {
        // 30s interviewer, 90s participant → 25 / 75, good.
        let ratio = TalkTimeRatio::from_talk_time(30_000, 90_000);
        assert_eq!(ratio.interviewer, 25);
        assert_eq!(ratio.participant, 75);
        assert_eq!(ratio.status, TalkTimeStatus::Good);
    }

    #[test]
    fn talk_time_status_thresholds() {
        assert_eq!(
            TalkTimeRatio::from_talk_time(40_000, 60_000).status,
            TalkTimeStatus::Good
        );
        assert_eq!(
            TalkTimeRatio::from_talk_time(55_000, 45_000).status,
            TalkTimeStatus::Warning
        );
        assert_eq!(
            TalkTimeRatio::from_talk_time(56_000, 44_000).status,
            TalkTimeStatus::OverTalking
        );
    }

    #[test]
    fn talk_time_empty_is_good() {
        let ratio = TalkTimeRatio::from_talk_time(0, 0);
        assert_eq!(ratio.interviewer, 0);
        assert_eq!(ratio.status, TalkTimeStatus::Good);
    }

    #[test]
    fn prompt_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&PromptType::FollowUp).unwrap(),
            "\"FOLLOW_UP\""
        );
        assert_eq!(
            serde_json::to_string(&PromptType::SilenceOk).unwrap(),
            "\"SILENCE_OK\""
        );
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&TalkTimeStatus::OverTalking).unwrap(),
            "\"over_talking\""
        );
        assert_eq!(
            serde_json::to_string(&TopicStatus::NotCovered).unwrap(),
            "\"not_covered\""
        );
    }

    #[test]
    fn speaker_toggle_flips() {
        assert_eq!(Speaker::Interviewer.toggled(), Speaker::Participant);
        assert_eq!(Speaker::Participant.toggled(), Speaker::Interviewer);
    }
}

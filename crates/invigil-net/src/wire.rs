//! JSON wire frames for the exam sync channel.
//!
//! Frames are text messages tagged by `event` with the payload under
//! `data`. Outbound payload fields use the server's camelCase `attemptId`;
//! inbound payloads arrive snake_cased. Both shapes follow the exam
//! server's socket protocol verbatim.

use serde::{Deserialize, Serialize};

use invigil_core::model::{AnswerSet, ViolationKind};
use invigil_core::traits::{OutboundMessage, SyncEvent};

/// Default reason attached to a `force_submit` that carries none.
const DEFAULT_FORCE_REASON: &str = "submission forced by the exam server";

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Sent once on every (re)connect to join the attempt room.
    JoinAttempt {
        #[serde(rename = "attemptId")]
        attempt_id: String,
    },
    Heartbeat {
        #[serde(rename = "attemptId")]
        attempt_id: String,
    },
    SaveAnswers {
        #[serde(rename = "attemptId")]
        attempt_id: String,
        answers: AnswerSet,
    },
    ReportViolation {
        #[serde(rename = "attemptId")]
        attempt_id: String,
        #[serde(rename = "type")]
        kind: ViolationKind,
        message: String,
    },
}

impl From<OutboundMessage> for OutboundFrame {
    fn from(message: OutboundMessage) -> Self {
        match message {
            OutboundMessage::Heartbeat { attempt_id } => OutboundFrame::Heartbeat { attempt_id },
            OutboundMessage::SaveAnswers {
                attempt_id,
                answers,
            } => OutboundFrame::SaveAnswers {
                attempt_id,
                answers,
            },
            OutboundMessage::ReportViolation {
                attempt_id,
                kind,
                message,
            } => OutboundFrame::ReportViolation {
                attempt_id,
                kind,
                message,
            },
        }
    }
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundFrame {
    TimeSync { remaining_seconds: i64 },
    TimeUp,
    ForceSubmit {
        #[serde(default)]
        reason: String,
    },
}

impl InboundFrame {
    /// Translate a wire frame into the engine-facing event.
    pub fn into_event(self) -> SyncEvent {
        match self {
            InboundFrame::TimeSync { remaining_seconds } => SyncEvent::TimeSync {
                remaining_seconds: remaining_seconds.max(0) as u64,
            },
            InboundFrame::TimeUp => SyncEvent::TimeUp,
            InboundFrame::ForceSubmit { reason } => {
                let reason = if reason.is_empty() {
                    DEFAULT_FORCE_REASON.to_string()
                } else {
                    reason
                };
                SyncEvent::ForceSubmit { reason }
            }
        }
    }
}

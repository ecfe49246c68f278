//! Collaborator trait definitions for the session engine.
//!
//! These traits are implemented by the `invigil-net` crate (HTTP backend,
//! WebSocket sync channel) and by hosts embedding the engine (presentation
//! lock). The session state machine only ever talks to collaborators
//! through these seams, so tests can substitute fakes without touching any
//! process-wide state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, ChannelError, LockError};
use crate::model::{AnswerSet, ViolationKind};

// ---------------------------------------------------------------------------
// Exam backend trait
// ---------------------------------------------------------------------------

/// The persistence side of an attempt: start/resume, terminal submit, and
/// the fire-and-forget security-event fallback used while the sync channel
/// is down.
#[async_trait]
pub trait ExamBackend: Send + Sync {
    /// Create or resume an attempt. Called exactly once per session entry.
    async fn start_attempt(
        &self,
        request: &StartAttemptRequest,
    ) -> Result<StartedAttempt, BackendError>;

    /// Terminal submit. Called at most once per attempt by the submission
    /// controller.
    async fn submit_attempt(&self, request: &SubmitRequest) -> Result<SubmitAck, BackendError>;

    /// Record a security event over REST. Used only when the sync channel
    /// is disconnected, so violations are never silently dropped.
    async fn log_security_event(
        &self,
        attempt_id: &str,
        kind: ViolationKind,
        detail: &str,
    ) -> Result<(), BackendError>;
}

/// Request to start or resume an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptRequest {
    pub exam_id: String,
    pub class_id: String,
    pub student_id: String,
}

/// Response to a start/resume request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedAttempt {
    /// Server-issued attempt identifier.
    pub attempt_id: String,
    /// True when this re-enters an interrupted attempt.
    #[serde(default)]
    pub resumed: bool,
    /// Answer snapshot saved by a previous session, present on resume.
    #[serde(default)]
    pub answers: Option<AnswerSet>,
    /// Violations already recorded server-side for this attempt.
    #[serde(default)]
    pub violation_count: u32,
}

/// Terminal submission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub attempt_id: String,
    pub student_id: String,
    pub answers: AnswerSet,
}

/// Acknowledgement of a recorded submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitAck {
    /// Achieved score, when the server grades synchronously.
    #[serde(default)]
    pub score: Option<f64>,
    /// Maximum achievable score.
    #[serde(default)]
    pub max_score: Option<f64>,
}

// ---------------------------------------------------------------------------
// Sync channel trait
// ---------------------------------------------------------------------------

/// Inbound events delivered by the sync channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connection (re-)established and the attempt joined.
    Connected,
    /// Connection lost; the channel keeps retrying on its own.
    Disconnected,
    /// Authoritative remaining time from the server clock.
    TimeSync { remaining_seconds: u64 },
    /// The server declared the attempt over.
    TimeUp,
    /// An invigilator or the server forced submission.
    ForceSubmit { reason: String },
}

/// Outbound messages pushed through the sync channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Periodic liveness signal.
    Heartbeat { attempt_id: String },
    /// Autosave of the current answer snapshot.
    SaveAnswers {
        attempt_id: String,
        answers: AnswerSet,
    },
    /// A breach observed by the violation monitor.
    ReportViolation {
        attempt_id: String,
        kind: ViolationKind,
        message: String,
    },
}

/// A reconnecting duplex event connection scoped to one attempt.
///
/// Implementations deliver inbound [`SyncEvent`]s through the event sender
/// injected at construction time; outbound sends are best-effort and
/// dropped while disconnected.
#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Connect and join the given attempt. Idempotent: connecting to the
    /// attempt already joined is a no-op; connecting to a different attempt
    /// tears the old connection down first.
    async fn connect(&self, attempt_id: &str, student_id: &str) -> Result<(), ChannelError>;

    /// Queue a message for delivery. Returns `false` (and drops the
    /// message) when disconnected.
    fn try_send(&self, message: OutboundMessage) -> bool;

    fn is_connected(&self) -> bool;

    /// Tear the connection down and cancel any reconnect loop.
    async fn disconnect(&self);
}

// ---------------------------------------------------------------------------
// Exclusive presentation mode
// ---------------------------------------------------------------------------

/// The fullscreen-lock resource. Process-wide single owner: only the
/// active attempt may hold it, and it must be released on every terminal
/// transition.
pub trait PresentationLock: Send + Sync {
    fn acquire(&self) -> Result<(), LockError>;
    fn release(&self);
    fn is_held(&self) -> bool;
}

/// In-process implementation of [`PresentationLock`].
///
/// Clones share one ownership flag, so every session constructed from the
/// same instance competes for the same single-owner resource. Hosts with a
/// real windowing environment supply their own implementation instead.
#[derive(Debug, Clone, Default)]
pub struct SharedPresentationLock {
    held: Arc<AtomicBool>,
}

impl SharedPresentationLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresentationLock for SharedPresentationLock {
    fn acquire(&self) -> Result<(), LockError> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| LockError("presentation mode already held".into()))
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_lock_single_owner() {
        let lock = SharedPresentationLock::new();
        let other = lock.clone();

        lock.acquire().unwrap();
        assert!(other.acquire().is_err());
        assert!(other.is_held());

        lock.release();
        assert!(!other.is_held());
        other.acquire().unwrap();
    }

    #[test]
    fn started_attempt_deserializes_with_defaults() {
        let json = r#"{"attempt_id": "att-9"}"#;
        let started: StartedAttempt = serde_json::from_str(json).unwrap();
        assert!(!started.resumed);
        assert!(started.answers.is_none());
        assert_eq!(started.violation_count, 0);
    }
}

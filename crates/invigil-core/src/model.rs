//! Core data model types for invigil.
//!
//! These are the fundamental types the whole engine works with: the exam
//! definition handed over at session start, attempt lifecycle state, and
//! the integrity-violation record.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Question identifiers as issued by the exam-definition service.
pub type QuestionId = String;

/// Mapping from question id to the selected option label.
pub type AnswerSet = HashMap<QuestionId, String>;

/// A single exam question. Immutable for the duration of an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Unique identifier for this question.
    pub id: QuestionId,
    /// The question prompt shown to the student.
    pub prompt: String,
    /// Ordered option texts. The selected answer is stored as the option
    /// letter ("A", "B", ...) derived from this ordering.
    pub options: Vec<String>,
    /// Score weight of this question.
    #[serde(default = "default_score")]
    pub score: f64,
    /// Optional illustration reference (image URL or asset id).
    #[serde(default)]
    pub illustration: Option<String>,
}

fn default_score() -> f64 {
    1.0
}

/// An exam definition, supplied wholesale by the exam service at session
/// start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    /// Unique identifier for this exam.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// Description shown before the attempt starts.
    #[serde(default)]
    pub description: String,
    /// Class this exam belongs to.
    pub class_id: String,
    /// Total working time in minutes.
    pub duration_minutes: u32,
    /// Maximum score across all questions.
    #[serde(default)]
    pub total_score: f64,
    /// Integrity breaches tolerated before forced termination.
    #[serde(default = "default_max_violations")]
    pub max_violations: u32,
    /// The questions, in presentation order.
    #[serde(default)]
    pub questions: Vec<Question>,
}

fn default_max_violations() -> u32 {
    5
}

impl Exam {
    /// Working time in seconds.
    pub fn duration_secs(&self) -> u64 {
        u64::from(self.duration_minutes) * 60
    }
}

/// Lifecycle state of an attempt.
///
/// `Submitted` and `Aborted` are terminal; once reached, all further
/// inbound events are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotStarted,
    Starting,
    InProgress,
    Submitting,
    Submitted,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Submitted | SessionState::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::NotStarted => "not_started",
            SessionState::Starting => "starting",
            SessionState::InProgress => "in_progress",
            SessionState::Submitting => "submitting",
            SessionState::Submitted => "submitted",
            SessionState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// What caused a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitTrigger {
    /// The student confirmed submission in the UI.
    UserRequest,
    /// The local countdown reached zero.
    TimeExpired,
    /// The server sent `time_up`.
    ServerTimeUp,
    /// The server sent `force_submit` with a reason.
    Forced(String),
    /// The violation budget was exceeded.
    ViolationLimit,
}

impl SubmitTrigger {
    /// Voluntary submissions go through a host-side confirmation step;
    /// robotic ones skip it and disable input immediately.
    pub fn mode(&self) -> SubmitMode {
        match self {
            SubmitTrigger::UserRequest => SubmitMode::Voluntary,
            _ => SubmitMode::Robotic,
        }
    }

    /// Reason string surfaced to the student.
    pub fn reason(&self) -> &str {
        match self {
            SubmitTrigger::UserRequest => "submitted by student",
            SubmitTrigger::TimeExpired => "time is up",
            SubmitTrigger::ServerTimeUp => "time is up (server confirmed)",
            SubmitTrigger::Forced(reason) => reason,
            SubmitTrigger::ViolationLimit => "violation limit exceeded",
        }
    }
}

/// Submission flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Voluntary,
    Robotic,
}

/// Kind of integrity breach.
///
/// `Disconnect` exists in the wire taxonomy because the server records
/// connection drops on its side; the client monitor never emits it and it
/// does not count toward the local budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabHidden,
    FullscreenExit,
    Devtools,
    Disconnect,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::TabHidden => "tab_hidden",
            ViolationKind::FullscreenExit => "fullscreen_exit",
            ViolationKind::Devtools => "devtools",
            ViolationKind::Disconnect => "disconnect",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ViolationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tab_hidden" => Ok(ViolationKind::TabHidden),
            "fullscreen_exit" => Ok(ViolationKind::FullscreenExit),
            "devtools" => Ok(ViolationKind::Devtools),
            "disconnect" => Ok(ViolationKind::Disconnect),
            other => Err(format!("unknown violation kind: {other}")),
        }
    }
}

/// A single detected integrity breach.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// What kind of breach was observed.
    pub kind: ViolationKind,
    /// When it was observed.
    pub at: DateTime<Utc>,
    /// Free-text detail for the audit log.
    pub detail: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            at: Utc::now(),
            detail: detail.into(),
        }
    }
}

/// Tunable behavior of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cadence of heartbeat and autosave pushes while in progress.
    pub heartbeat_interval: Duration,
    /// Maximum |local - server| clock difference (seconds) tolerated
    /// before snapping to the server value.
    pub drift_tolerance_secs: u64,
    /// Master switch for integrity monitoring.
    pub anti_cheat_enabled: bool,
    /// The inspector heuristic has false positives on some platforms;
    /// products can disable it independently of the rest of anti-cheat.
    pub inspector_heuristic_enabled: bool,
    /// Viewport outer-vs-inner delta (px) that flags an open inspector.
    pub inspector_threshold_px: u32,
    /// Cadence of the inspector heuristic poll.
    pub inspector_poll_interval: Duration,
    /// Fallback violation budget when the exam does not carry one.
    pub default_max_violations: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            drift_tolerance_secs: 2,
            anti_cheat_enabled: true,
            inspector_heuristic_enabled: true,
            inspector_threshold_px: 160,
            inspector_poll_interval: Duration::from_secs(1),
            default_max_violations: default_max_violations(),
        }
    }
}

impl SessionConfig {
    /// Effective violation budget for an exam.
    pub fn max_violations(&self, exam: &Exam) -> u32 {
        if exam.max_violations > 0 {
            exam.max_violations
        } else {
            self.default_max_violations
        }
    }
}

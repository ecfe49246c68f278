//! Error types shared across the engine.
//!
//! Defined in `invigil-core` so the session state machine can classify
//! collaborator failures for its retry/abort decisions without string
//! matching. The network crate maps transport failures into these.

use thiserror::Error;

/// Errors from the exam backend (start / submit / security-log REST calls).
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    Network(String),

    /// The API answered with a body we could not decode.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Returns `true` if retrying the same request cannot succeed
    /// (validation failures, closed exams, exhausted attempt limits).
    pub fn is_permanent(&self) -> bool {
        matches!(self, BackendError::Api { status, .. } if (400..500).contains(status))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BackendError::Timeout(_))
    }
}

/// Errors from the duplex sync channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The initial connection could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Connection establishment timed out.
    #[error("connect timed out after {0}s")]
    Timeout(u64),

    /// Reconnection gave up after the configured number of attempts.
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Failure to acquire or hold exclusive presentation mode.
#[derive(Debug, Clone, Error)]
#[error("presentation mode unavailable: {0}")]
pub struct LockError(pub String);

/// A session could not be started or resumed. Fatal to session entry;
/// the student must leave and re-enter.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("attempt already started")]
    AlreadyStarted,

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("could not start attempt: {0}")]
    Backend(#[from] BackendError),
}

/// The terminal submit failed.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("submit failed: {0}")]
    Backend(#[from] BackendError),

    /// Retry budget exhausted; the attempt is lost client-side and needs
    /// manual intervention.
    #[error("submit failed after {attempts} attempts, attempt aborted")]
    Aborted { attempts: u32 },
}

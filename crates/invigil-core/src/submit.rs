//! The terminal, idempotent submit operation.
//!
//! The session state machine guarantees the controller is invoked by at
//! most one trigger, but the controller is defensively idempotent on top:
//! a submit after a recorded success returns the cached ack instead of
//! re-posting, so retried network calls arriving out of order cannot turn
//! a graded attempt into an error.
//!
//! Failures are never retried silently. The first failure is surfaced and
//! leaves the attempt recoverable for one manual retry; the second moves
//! it to `Aborted`.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::SubmitError;
use crate::model::{AnswerSet, SubmitMode};
use crate::traits::{ExamBackend, SubmitAck, SubmitRequest};

/// Total submit calls allowed per attempt: the initial one plus one manual
/// retry.
pub const MAX_SUBMIT_ATTEMPTS: u32 = 2;

/// Performs the terminal submit for one attempt.
pub struct SubmissionController {
    backend: Arc<dyn ExamBackend>,
    ack: Option<SubmitAck>,
    failures: u32,
}

impl SubmissionController {
    pub fn new(backend: Arc<dyn ExamBackend>) -> Self {
        Self {
            backend,
            ack: None,
            failures: 0,
        }
    }

    /// Whether a submission has already been recorded.
    pub fn has_succeeded(&self) -> bool {
        self.ack.is_some()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether another submit call is still permitted.
    pub fn can_retry(&self) -> bool {
        self.ack.is_none() && self.failures < MAX_SUBMIT_ATTEMPTS
    }

    /// Submit the final answers.
    pub async fn submit(
        &mut self,
        attempt_id: &str,
        student_id: &str,
        answers: AnswerSet,
        mode: SubmitMode,
    ) -> Result<SubmitAck, SubmitError> {
        if let Some(ack) = &self.ack {
            info!(attempt_id, "duplicate submit treated as success");
            return Ok(ack.clone());
        }
        if self.failures >= MAX_SUBMIT_ATTEMPTS {
            return Err(SubmitError::Aborted {
                attempts: self.failures,
            });
        }

        info!(
            attempt_id,
            ?mode,
            answered = answers.len(),
            "submitting attempt"
        );

        let request = SubmitRequest {
            attempt_id: attempt_id.to_string(),
            student_id: student_id.to_string(),
            answers,
        };
        match self.backend.submit_attempt(&request).await {
            Ok(ack) => {
                self.ack = Some(ack.clone());
                Ok(ack)
            }
            Err(err) => {
                self.failures += 1;
                warn!(attempt_id, failures = self.failures, error = %err, "submit failed");
                if self.failures >= MAX_SUBMIT_ATTEMPTS {
                    Err(SubmitError::Aborted {
                        attempts: self.failures,
                    })
                } else {
                    Err(SubmitError::Backend(err))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::error::BackendError;
    use crate::model::ViolationKind;
    use crate::traits::{StartAttemptRequest, StartedAttempt};

    /// Backend stub that fails the first `fail_first` submit calls.
    struct FlakyBackend {
        submit_calls: AtomicU32,
        fail_first: u32,
    }

    impl FlakyBackend {
        fn new(fail_first: u32) -> Self {
            Self {
                submit_calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl ExamBackend for FlakyBackend {
        async fn start_attempt(
            &self,
            _request: &StartAttemptRequest,
        ) -> Result<StartedAttempt, BackendError> {
            unimplemented!("not used by these tests")
        }

        async fn submit_attempt(
            &self,
            _request: &SubmitRequest,
        ) -> Result<SubmitAck, BackendError> {
            let call = self.submit_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(BackendError::Network("connection reset".into()))
            } else {
                Ok(SubmitAck {
                    score: Some(8.0),
                    max_score: Some(10.0),
                })
            }
        }

        async fn log_security_event(
            &self,
            _attempt_id: &str,
            _kind: ViolationKind,
            _detail: &str,
        ) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn duplicate_submit_returns_cached_ack() {
        let backend = Arc::new(FlakyBackend::new(0));
        let mut controller = SubmissionController::new(backend.clone());

        let ack = controller
            .submit("att-1", "stu-1", AnswerSet::new(), SubmitMode::Voluntary)
            .await
            .unwrap();
        assert_eq!(ack.score, Some(8.0));

        let again = controller
            .submit("att-1", "stu-1", AnswerSet::new(), SubmitMode::Robotic)
            .await
            .unwrap();
        assert_eq!(again.score, Some(8.0));
        assert_eq!(backend.submit_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_failure_is_retryable() {
        let backend = Arc::new(FlakyBackend::new(1));
        let mut controller = SubmissionController::new(backend);

        let err = controller
            .submit("att-1", "stu-1", AnswerSet::new(), SubmitMode::Voluntary)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::Backend(_)));
        assert!(controller.can_retry());

        controller
            .submit("att-1", "stu-1", AnswerSet::new(), SubmitMode::Voluntary)
            .await
            .unwrap();
        assert!(controller.has_succeeded());
    }

    #[tokio::test]
    async fn second_failure_aborts() {
        let backend = Arc::new(FlakyBackend::new(10));
        let mut controller = SubmissionController::new(backend.clone());

        let first = controller
            .submit("att-1", "stu-1", AnswerSet::new(), SubmitMode::Robotic)
            .await
            .unwrap_err();
        assert!(matches!(first, SubmitError::Backend(_)));

        let second = controller
            .submit("att-1", "stu-1", AnswerSet::new(), SubmitMode::Robotic)
            .await
            .unwrap_err();
        assert!(matches!(second, SubmitError::Aborted { attempts: 2 }));
        assert!(!controller.can_retry());

        // Exhausted: no further network calls.
        let third = controller
            .submit("att-1", "stu-1", AnswerSet::new(), SubmitMode::Robotic)
            .await
            .unwrap_err();
        assert!(matches!(third, SubmitError::Aborted { .. }));
        assert_eq!(backend.submit_calls.load(Ordering::SeqCst), 2);
    }
}

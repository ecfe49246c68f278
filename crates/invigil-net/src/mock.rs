//! Mock collaborators for testing and the simulated CLI run.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use invigil_core::error::{BackendError, ChannelError};
use invigil_core::model::{AnswerSet, ViolationKind};
use invigil_core::traits::{
    ExamBackend, OutboundMessage, StartAttemptRequest, StartedAttempt, SubmitAck, SubmitRequest,
    SyncChannel, SyncEvent,
};

/// An in-memory exam backend that records every call.
pub struct MockBackend {
    attempt_id: String,
    resumed_answers: Mutex<Option<AnswerSet>>,
    prior_violations: AtomicU32,
    /// Fail this many submit calls before succeeding.
    fail_submits: AtomicU32,
    start_calls: AtomicU32,
    submit_calls: AtomicU32,
    last_submit: Mutex<Option<SubmitRequest>>,
    security_events: Mutex<Vec<(String, ViolationKind, String)>>,
}

impl MockBackend {
    pub fn new(attempt_id: &str) -> Self {
        Self {
            attempt_id: attempt_id.to_string(),
            resumed_answers: Mutex::new(None),
            prior_violations: AtomicU32::new(0),
            fail_submits: AtomicU32::new(0),
            start_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            last_submit: Mutex::new(None),
            security_events: Mutex::new(Vec::new()),
        }
    }

    /// Make the next start calls resume with the given saved answers.
    pub fn resume_with(&self, answers: AnswerSet, prior_violations: u32) {
        *self.resumed_answers.lock().unwrap() = Some(answers);
        self.prior_violations
            .store(prior_violations, Ordering::SeqCst);
    }

    /// Fail the next `n` submit calls with a network error.
    pub fn fail_next_submits(&self, n: u32) {
        self.fail_submits.store(n, Ordering::SeqCst);
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn last_submit(&self) -> Option<SubmitRequest> {
        self.last_submit.lock().unwrap().clone()
    }

    pub fn security_events(&self) -> Vec<(String, ViolationKind, String)> {
        self.security_events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExamBackend for MockBackend {
    async fn start_attempt(
        &self,
        _request: &StartAttemptRequest,
    ) -> Result<StartedAttempt, BackendError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let answers = self.resumed_answers.lock().unwrap().clone();
        Ok(StartedAttempt {
            attempt_id: self.attempt_id.clone(),
            resumed: answers.is_some(),
            answers,
            violation_count: self.prior_violations.load(Ordering::SeqCst),
        })
    }

    async fn submit_attempt(&self, request: &SubmitRequest) -> Result<SubmitAck, BackendError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_submit.lock().unwrap() = Some(request.clone());

        let remaining = self.fail_submits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_submits.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Network("connection reset".into()));
        }
        Ok(SubmitAck {
            score: Some(request.answers.len() as f64),
            max_score: Some(request.answers.len() as f64),
        })
    }

    async fn log_security_event(
        &self,
        attempt_id: &str,
        kind: ViolationKind,
        detail: &str,
    ) -> Result<(), BackendError> {
        self.security_events.lock().unwrap().push((
            attempt_id.to_string(),
            kind,
            detail.to_string(),
        ));
        Ok(())
    }
}

/// An in-memory sync channel with scriptable connectivity.
///
/// Records every message sent while "connected" and drops the rest, the
/// same contract the real channel has.
pub struct MockChannel {
    events: mpsc::UnboundedSender<SyncEvent>,
    connected: AtomicBool,
    connect_calls: AtomicU32,
    sent: Mutex<Vec<OutboundMessage>>,
}

impl MockChannel {
    pub fn new(events: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self {
            events,
            connected: AtomicBool::new(false),
            connect_calls: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Flip connectivity, emitting the matching event.
    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            let event = if connected {
                SyncEvent::Connected
            } else {
                SyncEvent::Disconnected
            };
            let _ = self.events.send(event);
        }
    }

    /// Push an inbound server event to the session.
    pub fn push_event(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncChannel for MockChannel {
    async fn connect(&self, _attempt_id: &str, _student_id: &str) -> Result<(), ChannelError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.set_connected(true);
        Ok(())
    }

    fn try_send(&self, message: OutboundMessage) -> bool {
        if self.connected.load(Ordering::SeqCst) {
            self.sent.lock().unwrap().push(message);
            true
        } else {
            false
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.set_connected(false);
    }
}

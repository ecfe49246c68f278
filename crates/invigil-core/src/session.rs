//! The session state machine.
//!
//! Owns the lifecycle of one attempt: merges the server clock with the
//! local countdown, decides when heartbeats and autosaves fire, counts
//! integrity breaches against the budget, and arbitrates between the
//! concurrent triggers that can end the session.
//!
//! Everything runs on one cooperative event loop: the channel and monitor
//! deliver their events back onto the same queue, so no two handlers ever
//! run concurrently. The only suspension points are collaborator calls;
//! all local state mutation is synchronous.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::answers::AnswerStore;
use crate::clock::ExamClock;
use crate::error::{StartError, SubmitError};
use crate::model::{
    Exam, SessionConfig, SessionState, SubmitTrigger, Violation, ViolationKind,
};
use crate::monitor::{IntegritySignal, MonitorEvent, ViewportProbe, ViolationMonitor};
use crate::submit::SubmissionController;
use crate::traits::{
    ExamBackend, OutboundMessage, PresentationLock, StartAttemptRequest, SyncChannel, SyncEvent,
};

/// Host/UI commands into the session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    /// Select (or with `None`, deselect) an option for a question.
    SelectAnswer {
        question_id: String,
        option: Option<String>,
    },
    /// Toggle the review flag for a question.
    ToggleFlag { question_id: String },
    /// Submit, already confirmed by the student host-side.
    RequestSubmit,
    /// A host-observed integrity signal.
    Integrity(IntegritySignal),
    /// Leave the session view.
    Teardown,
}

/// Observable session state published after every handled event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub remaining_secs: u64,
    pub connected: bool,
    pub violation_count: u32,
    pub answered_count: usize,
    /// The inspector heuristic tripped; all interaction is blocked until
    /// it clears. Independent of the violation budget.
    pub environment_blocked: bool,
    pub resumed: bool,
    /// Most recent surfaced failure, if any.
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    fn initial(exam: &Exam) -> Self {
        Self {
            state: SessionState::NotStarted,
            remaining_secs: exam.duration_secs(),
            connected: false,
            violation_count: 0,
            answered_count: 0,
            environment_blocked: false,
            resumed: false,
            last_error: None,
        }
    }
}

/// Cheap cloneable handle for the host: commands in, snapshots out.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn select_answer(&self, question_id: &str, option: Option<&str>) {
        self.send(SessionCommand::SelectAnswer {
            question_id: question_id.to_string(),
            option: option.map(str::to_string),
        });
    }

    pub fn toggle_flag(&self, question_id: &str) {
        self.send(SessionCommand::ToggleFlag {
            question_id: question_id.to_string(),
        });
    }

    pub fn request_submit(&self) {
        self.send(SessionCommand::RequestSubmit);
    }

    pub fn observe(&self, signal: IntegritySignal) {
        self.send(SessionCommand::Integrity(signal));
    }

    pub fn teardown(&self) {
        self.send(SessionCommand::Teardown);
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch receiver for awaiting state changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    fn send(&self, command: SessionCommand) {
        // A closed channel means the session already tore down; commands
        // after terminal state are ignored by contract.
        let _ = self.commands.send(command);
    }
}

/// One student's run at one exam.
pub struct ExamSession {
    exam: Exam,
    student_id: String,
    config: SessionConfig,

    backend: Arc<dyn ExamBackend>,
    channel: Arc<dyn SyncChannel>,
    lock: Arc<dyn PresentationLock>,
    probe: Option<Arc<dyn ViewportProbe>>,

    state: SessionState,
    attempt_id: Option<String>,
    resumed: bool,
    answers: AnswerStore,
    clock: ExamClock,
    violations: Vec<Violation>,
    violation_count: u32,
    monitor: ViolationMonitor,
    submission: SubmissionController,
    submission_in_flight: bool,
    environment_blocked: bool,
    connected: bool,
    last_error: Option<String>,
    stop_requested: bool,

    commands_rx: Option<mpsc::UnboundedReceiver<SessionCommand>>,
    channel_events_rx: Option<mpsc::UnboundedReceiver<SyncEvent>>,
    monitor_rx: Option<mpsc::UnboundedReceiver<MonitorEvent>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl ExamSession {
    /// Build a session around its collaborators. `channel_events` is the
    /// receiving end of the sender handed to the sync channel at
    /// construction.
    pub fn new(
        exam: Exam,
        student_id: impl Into<String>,
        config: SessionConfig,
        backend: Arc<dyn ExamBackend>,
        channel: Arc<dyn SyncChannel>,
        lock: Arc<dyn PresentationLock>,
        channel_events: mpsc::UnboundedReceiver<SyncEvent>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::initial(&exam));

        let monitor = ViolationMonitor::new(monitor_tx, config.anti_cheat_enabled);
        let submission = SubmissionController::new(Arc::clone(&backend));
        let clock = ExamClock::new(exam.duration_secs(), config.drift_tolerance_secs);

        let session = Self {
            exam,
            student_id: student_id.into(),
            config,
            backend,
            channel,
            lock,
            probe: None,
            state: SessionState::NotStarted,
            attempt_id: None,
            resumed: false,
            answers: AnswerStore::new(),
            clock,
            violations: Vec::new(),
            violation_count: 0,
            monitor,
            submission,
            submission_in_flight: false,
            environment_blocked: false,
            connected: false,
            last_error: None,
            stop_requested: false,
            commands_rx: Some(commands_rx),
            channel_events_rx: Some(channel_events),
            monitor_rx: Some(monitor_rx),
            snapshot_tx,
        };
        let handle = SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        };
        (session, handle)
    }

    /// Supply a viewport probe for the inspector heuristic. Must be called
    /// before [`ExamSession::start_or_resume`].
    pub fn set_viewport_probe(&mut self, probe: Arc<dyn ViewportProbe>) {
        self.probe = Some(probe);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Acquire exclusive presentation mode and start (or resume) the
    /// attempt. Called exactly once per session entry; failure is fatal to
    /// entry and leaves the session in `NotStarted`.
    pub async fn start_or_resume(&mut self) -> Result<(), StartError> {
        if self.state != SessionState::NotStarted {
            return Err(StartError::AlreadyStarted);
        }
        self.state = SessionState::Starting;
        self.publish();

        if let Err(err) = self.lock.acquire() {
            self.state = SessionState::NotStarted;
            self.publish();
            return Err(err.into());
        }

        let request = StartAttemptRequest {
            exam_id: self.exam.id.clone(),
            class_id: self.exam.class_id.clone(),
            student_id: self.student_id.clone(),
        };
        let started = match self.backend.start_attempt(&request).await {
            Ok(started) => started,
            Err(err) => {
                self.lock.release();
                self.state = SessionState::NotStarted;
                self.last_error = Some(err.to_string());
                self.publish();
                return Err(err.into());
            }
        };

        info!(
            attempt_id = %started.attempt_id,
            resumed = started.resumed,
            prior_violations = started.violation_count,
            "attempt started"
        );

        self.attempt_id = Some(started.attempt_id.clone());
        self.resumed = started.resumed;
        self.violation_count = started.violation_count;
        if started.resumed {
            if let Some(saved) = started.answers {
                self.answers.resume(saved, &self.exam.questions);
            }
        }
        self.clock = ExamClock::new(self.exam.duration_secs(), self.config.drift_tolerance_secs);
        self.state = SessionState::InProgress;

        if let (Some(probe), true) = (self.probe.clone(), self.config.inspector_heuristic_enabled)
        {
            self.monitor.start_inspector_poll(
                probe,
                self.config.inspector_threshold_px,
                self.config.inspector_poll_interval,
            );
        }

        // The channel manages its own reconnection; a failure here only
        // degrades autosave/heartbeat, it never blocks the attempt.
        if let Err(err) = self
            .channel
            .connect(&started.attempt_id, &self.student_id)
            .await
        {
            warn!(error = %err, "sync channel unavailable, continuing offline");
        }

        self.publish();
        Ok(())
    }

    /// Drive the session until a terminal state or teardown, then release
    /// every held resource.
    pub async fn run(mut self) {
        // The receivers move out of the struct so the select arms do not
        // alias the `&mut self` the handlers need.
        let mut commands_rx = self.commands_rx.take().expect("run called once");
        let mut channel_events_rx = self.channel_events_rx.take().expect("run called once");
        let mut monitor_rx = self.monitor_rx.take().expect("run called once");

        let period = Duration::from_secs(1);
        let start = tokio::time::Instant::now();
        let mut tick = tokio::time::interval_at(start + period, period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut beat = tokio::time::interval_at(
            start + self.config.heartbeat_interval,
            self.config.heartbeat_interval,
        );
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        while !self.state.is_terminal() && !self.stop_requested {
            tokio::select! {
                _ = tick.tick() => self.handle_tick().await,
                _ = beat.tick() => self.push_heartbeat_and_autosave(),
                Some(event) = channel_events_rx.recv() => {
                    self.handle_sync_event(event).await;
                }
                Some(event) = monitor_rx.recv() => {
                    self.handle_monitor_event(event).await;
                }
                command = commands_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.stop_requested = true,
                },
            }
            self.publish();
        }

        self.teardown().await;
    }

    async fn handle_tick(&mut self) {
        if self.state != SessionState::InProgress {
            return;
        }
        self.clock.tick();
        if self.clock.is_expired() {
            self.trigger_submission(SubmitTrigger::TimeExpired).await;
        }
    }

    /// Periodic heartbeat plus autosave of the latest answer snapshot.
    /// Both are best-effort: while disconnected they degrade to local-only.
    fn push_heartbeat_and_autosave(&mut self) {
        if self.state != SessionState::InProgress {
            return;
        }
        let Some(attempt_id) = self.attempt_id.clone() else {
            return;
        };
        let sent = self.channel.try_send(OutboundMessage::Heartbeat {
            attempt_id: attempt_id.clone(),
        });
        if sent {
            self.channel.try_send(OutboundMessage::SaveAnswers {
                attempt_id,
                answers: self.answers.snapshot(),
            });
        } else {
            debug!("channel down, autosave degraded to local-only");
        }
    }

    async fn handle_sync_event(&mut self, event: SyncEvent) {
        if self.state.is_terminal() {
            return;
        }
        match event {
            SyncEvent::Connected => {
                info!("sync channel connected");
                self.connected = true;
            }
            SyncEvent::Disconnected => {
                // Never a submit trigger by itself; the channel retries
                // and the server records the drop on its side.
                warn!("sync channel disconnected");
                self.connected = false;
            }
            SyncEvent::TimeSync { remaining_seconds } => {
                if self.state == SessionState::InProgress && self.clock.sync(remaining_seconds) {
                    debug!(remaining_seconds, "clock snapped to server value");
                }
            }
            SyncEvent::TimeUp => {
                self.trigger_submission(SubmitTrigger::ServerTimeUp).await;
            }
            SyncEvent::ForceSubmit { reason } => {
                self.trigger_submission(SubmitTrigger::Forced(reason)).await;
            }
        }
    }

    async fn handle_monitor_event(&mut self, event: MonitorEvent) {
        match event {
            MonitorEvent::Breach { kind, detail } => {
                self.record_violation(kind, detail).await;
            }
            MonitorEvent::InspectorBlocked(blocked) => {
                if blocked == self.environment_blocked {
                    return;
                }
                self.environment_blocked = blocked;
                if blocked {
                    warn!("inspector heuristic tripped, blocking interaction");
                    // Advisory: logged for the invigilator, never counted
                    // against the budget.
                    self.report_breach(ViolationKind::Devtools, "developer inspector detected")
                        .await;
                } else {
                    info!("inspector heuristic cleared");
                }
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SelectAnswer {
                question_id,
                option,
            } => {
                if !self.accepting_input() {
                    debug!(%question_id, "answer selection ignored");
                    return;
                }
                self.answers.select(&question_id, option.as_deref());
                // Push the fresh snapshot right away, best-effort.
                if let Some(attempt_id) = self.attempt_id.clone() {
                    self.channel.try_send(OutboundMessage::SaveAnswers {
                        attempt_id,
                        answers: self.answers.snapshot(),
                    });
                }
            }
            SessionCommand::ToggleFlag { question_id } => {
                if !self.accepting_input() {
                    return;
                }
                self.answers.toggle_flag(&question_id);
            }
            SessionCommand::RequestSubmit => {
                if self.environment_blocked {
                    debug!("submit request ignored while environment blocked");
                    return;
                }
                if self.state == SessionState::Submitting {
                    // One manual retry after a surfaced submit failure.
                    if self.submission.can_retry() && !self.submission.has_succeeded() {
                        self.do_submit(SubmitTrigger::UserRequest).await;
                    }
                    return;
                }
                self.trigger_submission(SubmitTrigger::UserRequest).await;
            }
            SessionCommand::Integrity(signal) => {
                // Routed through the monitor so detection config applies;
                // the resulting breach comes back on the monitor queue.
                self.monitor.observe(signal);
            }
            SessionCommand::Teardown => {
                self.stop_requested = true;
            }
        }
    }

    fn accepting_input(&self) -> bool {
        self.state == SessionState::InProgress && !self.environment_blocked
    }

    /// Append one breach, push it to the server, attempt fullscreen
    /// re-acquisition when that is what was lost, and check the budget.
    async fn record_violation(&mut self, kind: ViolationKind, detail: String) {
        if self.state != SessionState::InProgress {
            debug!(%kind, "breach ignored outside InProgress");
            return;
        }

        self.violations.push(Violation::new(kind, detail.clone()));
        self.violation_count += 1;
        warn!(%kind, %detail, total = self.violation_count, "integrity violation recorded");
        self.report_breach(kind, &detail).await;

        if kind == ViolationKind::FullscreenExit {
            // The environment dropped presentation mode out from under us;
            // try to take it back. A failed re-acquisition is itself a
            // breach.
            self.lock.release();
            if let Err(err) = self.lock.acquire() {
                let detail = format!("presentation mode re-acquisition failed: {err}");
                self.violations
                    .push(Violation::new(ViolationKind::FullscreenExit, detail.clone()));
                self.violation_count += 1;
                warn!(total = self.violation_count, "re-acquisition failed");
                self.report_breach(ViolationKind::FullscreenExit, &detail).await;
            }
        }

        let budget = self.config.max_violations(&self.exam);
        if self.violation_count > budget {
            self.trigger_submission(SubmitTrigger::ViolationLimit).await;
        }
    }

    /// Deliver a breach report: through the channel when connected, or the
    /// REST fallback when not, so it is never silently dropped.
    async fn report_breach(&mut self, kind: ViolationKind, detail: &str) {
        let Some(attempt_id) = self.attempt_id.clone() else {
            return;
        };
        let delivered = self.connected
            && self.channel.try_send(OutboundMessage::ReportViolation {
                attempt_id: attempt_id.clone(),
                kind,
                message: detail.to_string(),
            });
        if !delivered {
            if let Err(err) = self
                .backend
                .log_security_event(&attempt_id, kind, detail)
                .await
            {
                warn!(error = %err, "security event fallback failed");
            }
        }
    }

    /// First trigger wins. The in-flight guard is checked and set in the
    /// same synchronous turn, before any suspension point, so every other
    /// trigger observed afterwards is discarded.
    async fn trigger_submission(&mut self, trigger: SubmitTrigger) {
        if self.state != SessionState::InProgress || self.submission_in_flight {
            debug!(reason = trigger.reason(), "submission trigger discarded");
            return;
        }
        self.submission_in_flight = true;
        self.state = SessionState::Submitting;
        // Input is disabled from this point on (state guard), before the
        // network call resolves.
        self.publish();
        self.do_submit(trigger).await;
    }

    async fn do_submit(&mut self, trigger: SubmitTrigger) {
        let Some(attempt_id) = self.attempt_id.clone() else {
            error!("submit triggered without an attempt id");
            self.state = SessionState::Aborted;
            return;
        };
        let answers = self.answers.sanitized_snapshot(&self.exam.questions);
        match self
            .submission
            .submit(&attempt_id, &self.student_id, answers, trigger.mode())
            .await
        {
            Ok(_ack) => {
                info!(reason = trigger.reason(), "attempt submitted");
                self.last_error = None;
                self.state = SessionState::Submitted;
            }
            Err(err @ SubmitError::Aborted { .. }) => {
                error!(error = %err, "attempt lost, manual intervention required");
                self.last_error = Some(err.to_string());
                self.state = SessionState::Aborted;
            }
            Err(err) => {
                // Recoverable: stay in Submitting and wait for one manual
                // retry. No silent re-post of a graded action.
                warn!(error = %err, "submit failed, awaiting manual retry");
                self.last_error = Some(err.to_string());
            }
        }
        self.publish();
    }

    async fn teardown(&mut self) {
        self.monitor.stop();
        self.channel.disconnect().await;
        self.lock.release();
        self.answers.clear();
        self.connected = false;
        debug!(state = %self.state, "session torn down");
        self.publish();
    }

    fn publish(&self) {
        let _ = self.snapshot_tx.send(SessionSnapshot {
            state: self.state,
            remaining_secs: self.clock.remaining_secs(),
            connected: self.connected,
            violation_count: self.violation_count,
            answered_count: self.answers.answered_count(),
            environment_blocked: self.environment_blocked,
            resumed: self.resumed,
            last_error: self.last_error.clone(),
        });
    }
}

//! Integrity-signal observation.
//!
//! The monitor watches for breaches (tab hidden, focus loss, fullscreen
//! exit) and runs the open-inspector heuristic on a periodic poll. It only
//! reports: each breach is forwarded to the session state machine, which
//! owns counting and consequence. Keeping detection separate from
//! consequence lets the per-exam policy (submit vs. warn vs. ignore) change
//! without touching detection code.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::model::ViolationKind;

/// Host-pushed integrity signals, abstracted from any particular windowing
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegritySignal {
    /// The exam tab/window became hidden.
    TabHidden,
    /// The window lost input focus.
    FocusLost,
    /// Exclusive presentation mode was dropped.
    FullscreenExited,
}

/// What the monitor reports back to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// One observed breach.
    Breach {
        kind: ViolationKind,
        detail: String,
    },
    /// The inspector heuristic flipped. `true` blocks the environment
    /// until it clears; this is advisory and independent of the violation
    /// budget.
    InspectorBlocked(bool),
}

/// Window measurements used by the inspector heuristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewportMetrics {
    pub outer_width: u32,
    pub outer_height: u32,
    pub inner_width: u32,
    pub inner_height: u32,
}

impl ViewportMetrics {
    /// Largest outer-vs-inner delta on either axis.
    pub fn inspector_delta(&self) -> u32 {
        let dw = self.outer_width.saturating_sub(self.inner_width);
        let dh = self.outer_height.saturating_sub(self.inner_height);
        dw.max(dh)
    }
}

/// Source of viewport measurements, supplied by the host.
pub trait ViewportProbe: Send + Sync {
    fn metrics(&self) -> ViewportMetrics;
}

/// Observes integrity signals and emits [`MonitorEvent`]s.
///
/// The inspector poll is an owned, cancellable task: started explicitly,
/// stopped on [`ViolationMonitor::stop`] and on drop, never left running
/// past the monitor's lifetime.
pub struct ViolationMonitor {
    events: mpsc::UnboundedSender<MonitorEvent>,
    enabled: bool,
    poll: Option<JoinHandle<()>>,
}

impl ViolationMonitor {
    pub fn new(events: mpsc::UnboundedSender<MonitorEvent>, enabled: bool) -> Self {
        Self {
            events,
            enabled,
            poll: None,
        }
    }

    /// Feed one host-observed signal through the monitor.
    pub fn observe(&self, signal: IntegritySignal) {
        if !self.enabled {
            return;
        }
        let (kind, detail) = match signal {
            IntegritySignal::TabHidden => {
                (ViolationKind::TabHidden, "exam tab became hidden")
            }
            IntegritySignal::FocusLost => {
                (ViolationKind::TabHidden, "window lost input focus")
            }
            IntegritySignal::FullscreenExited => {
                (ViolationKind::FullscreenExit, "left exclusive presentation mode")
            }
        };
        debug!(%kind, detail, "integrity breach observed");
        let _ = self.events.send(MonitorEvent::Breach {
            kind,
            detail: detail.to_string(),
        });
    }

    /// Start the periodic inspector heuristic against the given probe.
    /// Replaces any poll already running.
    pub fn start_inspector_poll(
        &mut self,
        probe: Arc<dyn ViewportProbe>,
        threshold_px: u32,
        interval: Duration,
    ) {
        if !self.enabled {
            return;
        }
        self.stop();

        let events = self.events.clone();
        self.poll = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut was_blocked = false;
            loop {
                ticker.tick().await;
                let blocked = probe.metrics().inspector_delta() > threshold_px;
                if blocked != was_blocked {
                    was_blocked = blocked;
                    debug!(blocked, "inspector heuristic changed");
                    if events.send(MonitorEvent::InspectorBlocked(blocked)).is_err() {
                        break;
                    }
                }
            }
        }));
    }

    /// Cancel the inspector poll. Safe to call on every exit path.
    pub fn stop(&mut self) {
        if let Some(handle) = self.poll.take() {
            handle.abort();
        }
    }
}

impl Drop for ViolationMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeProbe {
        inner_width: AtomicU32,
    }

    impl FakeProbe {
        fn new(inner_width: u32) -> Self {
            Self {
                inner_width: AtomicU32::new(inner_width),
            }
        }
    }

    impl ViewportProbe for FakeProbe {
        fn metrics(&self) -> ViewportMetrics {
            ViewportMetrics {
                outer_width: 1920,
                outer_height: 1080,
                inner_width: self.inner_width.load(Ordering::Relaxed),
                inner_height: 1080,
            }
        }
    }

    #[test]
    fn inspector_delta_takes_larger_axis() {
        let m = ViewportMetrics {
            outer_width: 1920,
            outer_height: 1080,
            inner_width: 1900,
            inner_height: 800,
        };
        assert_eq!(m.inspector_delta(), 280);
    }

    #[tokio::test]
    async fn observe_maps_signals_to_breaches() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = ViolationMonitor::new(tx, true);

        monitor.observe(IntegritySignal::TabHidden);
        monitor.observe(IntegritySignal::FullscreenExited);

        match rx.recv().await.unwrap() {
            MonitorEvent::Breach { kind, .. } => assert_eq!(kind, ViolationKind::TabHidden),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            MonitorEvent::Breach { kind, .. } => {
                assert_eq!(kind, ViolationKind::FullscreenExit)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_monitor_reports_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = ViolationMonitor::new(tx, false);
        monitor.observe(IntegritySignal::TabHidden);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn inspector_poll_is_edge_triggered() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = Arc::new(FakeProbe::new(1920));
        let mut monitor = ViolationMonitor::new(tx, true);
        monitor.start_inspector_poll(probe.clone(), 160, Duration::from_secs(1));

        // Not blocked: several polls, no events.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());

        // Shrink the viewport past the threshold: one rising edge.
        probe.inner_width.store(1920 - 200, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(rx.recv().await.unwrap(), MonitorEvent::InspectorBlocked(true));
        assert!(rx.try_recv().is_err());

        // Restore: one falling edge.
        probe.inner_width.store(1920, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(
            rx.recv().await.unwrap(),
            MonitorEvent::InspectorBlocked(false)
        );

        // After stop, the poll is gone.
        monitor.stop();
        probe.inner_width.store(1920 - 400, Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(rx.try_recv().is_err());
    }
}

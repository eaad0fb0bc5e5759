//! Simulated training playback
//!
//! A [`Timeline`] is computed up front from a plan; the
//! [`SimulationScheduler`] plays it back on a single task, calling a
//! [`SimulationObserver`] at each checkpoint until the run completes or is
//! cancelled through its [`SimulationHandle`].

mod scheduler;
pub mod timeline;

pub use scheduler::{SimulationHandle, SimulationScheduler};
pub use timeline::{Action, Timeline, TimelineStep};

use crate::plan::{ExperimentUpdate, LogEntry};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RunId(u64);

impl RunId {
    /// Allocate a process-unique run id
    pub fn next() -> Self {
        RunId(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Receives checkpoint callbacks for one run
///
/// Callbacks are made from the run's task, one at a time and in timeline
/// order. None are made once the run has been cancelled.
pub trait SimulationObserver: Send + 'static {
    fn on_update(&mut self, experiment_id: &str, update: &ExperimentUpdate);

    fn on_log(&mut self, entry: &LogEntry);

    fn on_complete(&mut self);
}

/// Immutable event emitted by a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationEvent {
    pub run_id: RunId,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    Update {
        experiment_id: String,
        update: ExperimentUpdate,
    },
    Log(LogEntry),
    Complete,
}

/// Observer that forwards every callback as a [`SimulationEvent`] on a channel,
/// so a single consumer can own and mutate the plan
pub struct ChannelObserver {
    run_id: RunId,
    tx: mpsc::UnboundedSender<SimulationEvent>,
}

impl ChannelObserver {
    pub fn new(run_id: RunId, tx: mpsc::UnboundedSender<SimulationEvent>) -> Self {
        Self { run_id, tx }
    }

    fn send(&self, kind: EventKind) {
        // Receiver may have been dropped
        let _ = self.tx.send(SimulationEvent {
            run_id: self.run_id,
            kind,
        });
    }
}

impl SimulationObserver for ChannelObserver {
    fn on_update(&mut self, experiment_id: &str, update: &ExperimentUpdate) {
        self.send(EventKind::Update {
            experiment_id: experiment_id.to_string(),
            update: *update,
        });
    }

    fn on_log(&mut self, entry: &LogEntry) {
        self.send(EventKind::Log(entry.clone()));
    }

    fn on_complete(&mut self) {
        self.send(EventKind::Complete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ExperimentStatus, LogLevel, Metrics};

    #[test]
    fn test_run_ids_are_unique() {
        let a = RunId::next();
        let b = RunId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(a.to_string(), format!("run-{}", a.as_u64()));
    }

    #[test]
    fn test_channel_observer_tags_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run_id = RunId::next();
        let mut observer = ChannelObserver::new(run_id, tx);

        let update = ExperimentUpdate {
            checkpoint: 1,
            status: ExperimentStatus::Running,
            progress: 0,
            live_metrics: Metrics::ZERO,
        };
        observer.on_update("exp-1", &update);
        observer.on_log(&LogEntry::new("x", LogLevel::Info, "hello"));
        observer.on_complete();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.run_id, run_id);
        assert_eq!(
            first.kind,
            EventKind::Update {
                experiment_id: "exp-1".to_string(),
                update
            }
        );
        assert!(matches!(rx.try_recv().unwrap().kind, EventKind::Log(_)));
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Complete);
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut observer = ChannelObserver::new(RunId::next(), tx);
        observer.on_complete();
    }
}

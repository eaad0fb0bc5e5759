//! Plan, experiment and log data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Metric triple shared by final (simulated) and in-flight (live) readings
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    /// Fraction in [0, 1]
    pub accuracy: f64,
    pub latency_ms: f64,
    pub model_size_mb: f64,
}

impl Metrics {
    pub const ZERO: Metrics = Metrics {
        accuracy: 0.0,
        latency_ms: 0.0,
        model_size_mb: 0.0,
    };
}

/// Lifecycle of an experiment: `pending -> running -> completed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    #[default]
    Pending,
    Running,
    Completed,
}

impl ExperimentStatus {
    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Staying put is allowed; skipping a state or moving backwards is not.
    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Running)
                | (Running, Running)
                | (Running, Completed)
                | (Completed, Completed)
        )
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExperimentStatus::Pending => write!(f, "pending"),
            ExperimentStatus::Running => write!(f, "running"),
            ExperimentStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Rejected state change for an experiment
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("Illegal status transition {from} -> {to}")]
    Status {
        from: ExperimentStatus,
        to: ExperimentStatus,
    },

    #[error("Progress may not decrease ({from} -> {to})")]
    ProgressRegression { from: u8, to: u8 },

    #[error("Progress {0} is out of range 0..=100")]
    ProgressOutOfRange(u8),
}

/// Snapshot of an experiment's mutable state at one checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentUpdate {
    /// Checkpoint number, 1..=8
    pub checkpoint: u8,
    pub status: ExperimentStatus,
    pub progress: u8,
    pub live_metrics: Metrics,
}

/// One candidate model/approach within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Final target values; never changed after creation
    pub simulated_metrics: Metrics,
    #[serde(default)]
    pub status: ExperimentStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub live_metrics: Metrics,
}

impl Experiment {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        simulated_metrics: Metrics,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            simulated_metrics,
            status: ExperimentStatus::Pending,
            progress: 0,
            live_metrics: Metrics::ZERO,
        }
    }

    /// Apply a checkpoint update. Nothing is changed if the update is rejected.
    pub fn apply(&mut self, update: &ExperimentUpdate) -> Result<(), TransitionError> {
        if update.progress > 100 {
            return Err(TransitionError::ProgressOutOfRange(update.progress));
        }
        if !self.status.can_transition_to(update.status) {
            return Err(TransitionError::Status {
                from: self.status,
                to: update.status,
            });
        }
        if update.progress < self.progress {
            return Err(TransitionError::ProgressRegression {
                from: self.progress,
                to: update.progress,
            });
        }

        self.status = update.status;
        self.progress = update.progress;
        self.live_metrics = update.live_metrics;
        Ok(())
    }

    /// Return to the freshly-generated state
    pub fn reset(&mut self) {
        self.status = ExperimentStatus::Pending;
        self.progress = 0;
        self.live_metrics = Metrics::ZERO;
    }
}

/// Validated experiment plan for one goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub title: String,
    pub goal_analysis: String,
    /// Presentation and simulation order
    pub experiments: Vec<Experiment>,
    pub recommended_winner_id: String,
    pub summary: String,
}

impl Plan {
    /// The recommended experiment, falling back to the first one when the
    /// recommended id does not match any experiment.
    pub fn winner(&self) -> Option<&Experiment> {
        self.experiment(&self.recommended_winner_id)
            .or_else(|| self.experiments.first())
    }

    pub fn experiment(&self, id: &str) -> Option<&Experiment> {
        self.experiments.iter().find(|e| e.id == id)
    }

    pub fn experiment_mut(&mut self, id: &str) -> Option<&mut Experiment> {
        self.experiments.iter_mut().find(|e| e.id == id)
    }

    /// Whether every experiment has completed
    pub fn is_complete(&self) -> bool {
        self.experiments
            .iter()
            .all(|e| e.status == ExperimentStatus::Completed)
    }
}

/// Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
}

/// One line of the run log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
}

impl LogEntry {
    pub fn new(id: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            message: message.into(),
            level,
        }
    }
}

/// Append-only run log
#[derive(Debug, Clone, Default)]
pub struct LogBook {
    entries: Vec<LogEntry>,
}

impl LogBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }
}

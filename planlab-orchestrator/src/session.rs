//! Single-consumer state for one planning run
//!
//! A [`PlanSession`] owns the plan and the run log. Simulation events arrive
//! as messages and are applied here, so nothing else mutates the plan.

use crate::plan::{GenerationError, LogBook, LogEntry, LogLevel, Plan};
use crate::simulation::{EventKind, RunId, SimulationEvent};
use serde::Serialize;
use tracing::{debug, warn};

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Generating,
    Running,
    Completed,
    Failed,
}

/// Plan, log and progress for one goal
#[derive(Debug, Default)]
pub struct PlanSession {
    phase: SessionPhase,
    goal: Option<String>,
    plan: Option<Plan>,
    logs: LogBook,
    active_run: Option<RunId>,
    current_experiment: Option<String>,
    log_seq: u64,
}

impl PlanSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over for a new goal
    pub fn begin_generation(&mut self, goal: &str) {
        self.reset();
        self.goal = Some(goal.trim().to_string());
        self.phase = SessionPhase::Generating;
        self.log(LogLevel::Info, format!("Analyzing goal: {}", goal.trim()));
    }

    /// Record a failed generation
    pub fn fail(&mut self, err: &GenerationError) {
        self.phase = SessionPhase::Failed;
        self.log(LogLevel::Warning, format!("Plan generation failed: {}", err));
    }

    /// Take ownership of a freshly generated plan and bind it to `run_id`
    ///
    /// Experiments are put back into their initial state. Events from any
    /// other run are ignored from now on.
    pub fn begin(&mut self, mut plan: Plan, run_id: RunId) {
        for exp in &mut plan.experiments {
            exp.reset();
        }
        self.log(
            LogLevel::Success,
            format!(
                "Plan generated: {} ({} experiments)",
                plan.title,
                plan.experiments.len()
            ),
        );
        self.plan = Some(plan);
        self.active_run = Some(run_id);
        self.current_experiment = None;
        self.phase = SessionPhase::Running;
    }

    /// Apply one event. Returns false if the event was ignored.
    pub fn apply(&mut self, event: &SimulationEvent) -> bool {
        if self.active_run != Some(event.run_id) || self.phase != SessionPhase::Running {
            debug!(run = %event.run_id, "Ignoring event from inactive run");
            return false;
        }

        match &event.kind {
            EventKind::Update {
                experiment_id,
                update,
            } => {
                let Some(exp) = self
                    .plan
                    .as_mut()
                    .and_then(|plan| plan.experiment_mut(experiment_id))
                else {
                    warn!(experiment = %experiment_id, "Update for unknown experiment");
                    return false;
                };
                if let Err(e) = exp.apply(update) {
                    warn!(experiment = %experiment_id, error = %e, "Dropping invalid update");
                    return false;
                }
                if update.checkpoint == 1 {
                    self.current_experiment = Some(experiment_id.clone());
                }
            }
            EventKind::Log(entry) => self.logs.push(entry.clone()),
            EventKind::Complete => {
                self.phase = SessionPhase::Completed;
                self.current_experiment = None;
            }
        }
        true
    }

    /// Append a session-side log line
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.log_seq += 1;
        self.logs
            .push(LogEntry::new(format!("session-{}", self.log_seq), level, message));
    }

    /// Discard the plan and log and detach from any run
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn logs(&self) -> &LogBook {
        &self.logs
    }

    pub fn active_run(&self) -> Option<RunId> {
        self.active_run
    }

    /// Experiment that most recently started
    pub fn current_experiment(&self) -> Option<&str> {
        self.current_experiment.as_deref()
    }

    pub fn into_plan(self) -> Option<Plan> {
        self.plan
    }
}

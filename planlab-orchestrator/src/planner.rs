//! Planner: goal -> plan -> simulated run, with one active timeline at a time

use crate::plan::{GenerationError, Plan, PlanRequester};
use crate::provider::ProviderError;
use crate::session::{PlanSession, SessionPhase};
use crate::simulation::{
    RunId, SimulationEvent, SimulationHandle, SimulationObserver, SimulationScheduler,
};
use crate::PlanlabConfig;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Top-level entry point tying the requester to the scheduler
pub struct ExperimentPlanner {
    requester: PlanRequester,
    scheduler: SimulationScheduler,
    active: Mutex<Option<SimulationHandle>>,
}

impl ExperimentPlanner {
    pub fn new(requester: PlanRequester, scheduler: SimulationScheduler) -> Self {
        Self {
            requester,
            scheduler,
            active: Mutex::new(None),
        }
    }

    /// Build the provider, retry policy and scheduler from configuration
    pub fn from_config(config: &PlanlabConfig) -> Result<Self, ProviderError> {
        Ok(Self::new(
            PlanRequester::from_config(config)?,
            SimulationScheduler::new(&config.simulation),
        ))
    }

    pub fn requester(&self) -> &PlanRequester {
        &self.requester
    }

    fn slot(&self) -> MutexGuard<'_, Option<SimulationHandle>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub async fn generate_plan(&self, goal: &str) -> Result<Plan, GenerationError> {
        self.requester.generate_plan(goal).await
    }

    fn install(&self, handle: SimulationHandle) -> RunId {
        let run_id = handle.run_id();
        let displaced = self.slot().replace(handle);
        if let Some(old) = displaced {
            old.cancel();
        }
        run_id
    }

    /// Start simulating `plan`, cancelling whatever run was active
    pub fn start_simulation(&self, plan: &Plan, observer: impl SimulationObserver) -> RunId {
        self.cancel();
        self.install(self.scheduler.start(plan, observer))
    }

    /// Like [`start_simulation`](Self::start_simulation), delivering events on a channel
    pub fn start_channel(&self, plan: &Plan) -> (RunId, mpsc::UnboundedReceiver<SimulationEvent>) {
        self.cancel();
        let (handle, rx) = self.scheduler.start_channel(plan);
        (self.install(handle), rx)
    }

    /// Cancel the active run, if any. Returns whether one was active.
    pub fn cancel(&self) -> bool {
        let taken = self.slot().take();
        match taken {
            Some(handle) => {
                let was_live = !handle.is_finished();
                handle.cancel();
                was_live
            }
            None => false,
        }
    }

    /// Whether a run is still delivering events
    pub fn is_running(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|h| !h.is_cancelled() && !h.is_finished())
    }

    fn release(&self, run_id: RunId) {
        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|h| h.run_id() == run_id) {
            slot.take();
        }
    }

    /// Generate a plan for `goal` and simulate it to completion
    ///
    /// If the run is cancelled or superseded midway, the session is returned
    /// as it stood, still in the running phase.
    pub async fn run(&self, goal: &str) -> Result<PlanSession, GenerationError> {
        let mut session = PlanSession::new();
        session.begin_generation(goal);

        let plan = match self.generate_plan(goal).await {
            Ok(plan) => plan,
            Err(e) => {
                session.fail(&e);
                return Err(e);
            }
        };

        let (run_id, mut rx) = self.start_channel(&plan);
        session.begin(plan, run_id);
        info!(run = %run_id, "Simulating plan");

        while let Some(event) = rx.recv().await {
            session.apply(&event);
            if session.phase() == SessionPhase::Completed {
                break;
            }
        }

        if session.phase() != SessionPhase::Completed {
            debug!(run = %run_id, "Run ended before completion");
        }
        self.release(run_id);
        Ok(session)
    }
}

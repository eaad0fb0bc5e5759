//! Playback of a [`Timeline`] on a tokio task, with group cancellation

use super::timeline::{Action, Timeline};
use super::{ChannelObserver, RunId, SimulationEvent, SimulationObserver};
use crate::plan::{LogEntry, Plan};
use crate::SimulationConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// State shared between a handle and its runner task
struct RunShared {
    /// Callbacks happen with this lock held; `cancel` takes it to wait out
    /// a callback in flight on another thread.
    observer: Mutex<Box<dyn SimulationObserver>>,
    /// Cancelled when the runner task exits for any reason
    done: CancellationToken,
}

/// Handle to one simulation run
///
/// The cancellation token and the runner task are owned together and
/// cancelled as a unit. Dropping the handle cancels the run.
pub struct SimulationHandle {
    run_id: RunId,
    token: CancellationToken,
    shared: Arc<RunShared>,
    task: JoinHandle<()>,
}

impl SimulationHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Stop the run. No observer callback starts after this returns.
    ///
    /// Idempotent; cancelling a finished run is a no-op. May be called from
    /// inside an observer callback.
    pub fn cancel(&self) {
        if self.token.is_cancelled() || self.is_finished() {
            return;
        }
        self.token.cancel();

        // From inside a callback the runner holds the fence and will see the
        // token before its next callback.
        if tokio::task::try_id() != Some(self.task.id()) {
            let _fence = self.shared.observer.lock();
        }
        self.task.abort();
        debug!(run = %self.run_id, "Simulation cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the runner task has exited (completed, cancelled or panicked)
    pub fn is_finished(&self) -> bool {
        self.shared.done.is_cancelled()
    }

    /// Wait for the runner task to exit
    pub async fn wait(&self) {
        self.shared.done.cancelled().await;
    }
}

impl Drop for SimulationHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for SimulationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Starts simulation runs for plans
pub struct SimulationScheduler {
    time_scale: f64,
    rng: Mutex<StdRng>,
}

impl SimulationScheduler {
    pub fn new(config: &SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            time_scale: config.time_scale,
            rng: Mutex::new(rng),
        }
    }

    fn timeline(&self, plan: &Plan) -> Timeline {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Timeline::build(plan, &mut *rng, self.time_scale)
    }

    /// Start playing `plan` back to `observer`. Must be called inside a tokio runtime.
    ///
    /// The run lives as long as the returned handle; keep it to let the run finish.
    pub fn start(&self, plan: &Plan, observer: impl SimulationObserver) -> SimulationHandle {
        self.start_run(RunId::next(), plan, Box::new(observer))
    }

    /// Start a run whose events are delivered on a channel
    pub fn start_channel(
        &self,
        plan: &Plan,
    ) -> (SimulationHandle, mpsc::UnboundedReceiver<SimulationEvent>) {
        let run_id = RunId::next();
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.start_run(run_id, plan, Box::new(ChannelObserver::new(run_id, tx)));
        (handle, rx)
    }

    fn start_run(
        &self,
        run_id: RunId,
        plan: &Plan,
        observer: Box<dyn SimulationObserver>,
    ) -> SimulationHandle {
        let timeline = self.timeline(plan);
        let token = CancellationToken::new();
        let shared = Arc::new(RunShared {
            observer: Mutex::new(observer),
            done: CancellationToken::new(),
        });

        info!(
            run = %run_id,
            experiments = plan.experiments.len(),
            duration_ms = timeline.total_duration().as_millis() as u64,
            "Starting simulation"
        );

        let task = tokio::spawn(play(run_id, timeline, token.clone(), Arc::clone(&shared)));

        SimulationHandle {
            run_id,
            token,
            shared,
            task,
        }
    }
}

async fn play(
    run_id: RunId,
    timeline: Timeline,
    token: CancellationToken,
    shared: Arc<RunShared>,
) {
    let _done = shared.done.clone().drop_guard();
    let start = Instant::now();
    let mut log_seq: u64 = 0;

    for step in timeline.into_steps() {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(run = %run_id, "Simulation stopped before next checkpoint");
                return;
            }
            _ = sleep_until(start + step.at) => {}
        }

        if !fire(run_id, step.actions, &token, &shared, &mut log_seq) {
            return;
        }
    }
}

/// Deliver one step's actions; returns false if the run was cancelled midway
fn fire(
    run_id: RunId,
    actions: Vec<Action>,
    token: &CancellationToken,
    shared: &RunShared,
    log_seq: &mut u64,
) -> bool {
    let mut observer = match shared.observer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    for action in actions {
        if token.is_cancelled() {
            return false;
        }
        match action {
            Action::Update {
                experiment_id,
                update,
            } => observer.on_update(&experiment_id, &update),
            Action::Log { level, message } => {
                *log_seq += 1;
                let entry = LogEntry::new(format!("{}-{}", run_id, log_seq), level, message);
                observer.on_log(&entry);
            }
            Action::Complete => {
                observer.on_complete();
                info!(run = %run_id, "Simulation completed");
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::test_support::plan_with;
    use crate::plan::{ExperimentStatus, ExperimentUpdate, LogLevel};
    use crate::simulation::timeline::EXPERIMENT_DURATION_MS;
    use crate::simulation::EventKind;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Update(String, ExperimentUpdate),
        Log(LogLevel, String),
        Complete,
    }

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(Instant, Call)>>>,
    }

    impl Recorder {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
        }

        fn times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|(t, _)| *t).collect()
        }

        fn push(&self, call: Call) {
            self.calls.lock().unwrap().push((Instant::now(), call));
        }
    }

    impl SimulationObserver for Recorder {
        fn on_update(&mut self, experiment_id: &str, update: &ExperimentUpdate) {
            self.push(Call::Update(experiment_id.to_string(), *update));
        }

        fn on_log(&mut self, entry: &LogEntry) {
            self.push(Call::Log(entry.level, entry.message.clone()));
        }

        fn on_complete(&mut self) {
            self.push(Call::Complete);
        }
    }

    fn scheduler() -> SimulationScheduler {
        SimulationScheduler::new(&SimulationConfig {
            time_scale: 1.0,
            seed: Some(42),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_order_and_timing() {
        let plan = plan_with(3);
        let recorder = Recorder::default();
        let begin = Instant::now();
        let handle = scheduler().start(&plan, recorder.clone());
        handle.wait().await;

        let calls = recorder.calls();
        let updates = calls.iter().filter(|c| matches!(c, Call::Update(..))).count();
        assert_eq!(updates, 24);
        assert_eq!(calls.last(), Some(&Call::Complete));
        assert_eq!(calls.iter().filter(|c| **c == Call::Complete).count(), 1);

        let times = recorder.times();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            *times.last().unwrap() - begin,
            Duration::from_millis(3 * EXPERIMENT_DURATION_MS)
        );
        assert!(handle.is_finished());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_experiment_waits_for_first() {
        let plan = plan_with(2);
        let recorder = Recorder::default();
        let handle = scheduler().start(&plan, recorder.clone());
        handle.wait().await;

        let progress: Vec<(String, u8)> = recorder
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(id, u) => Some((id, u.progress)),
                _ => None,
            })
            .collect();

        let first_of_second = progress.iter().position(|(id, _)| id == "exp-1").unwrap();
        assert_eq!(first_of_second, 8);
        let exp0: Vec<u8> = progress[..8].iter().map(|(_, p)| *p).collect();
        assert_eq!(exp0, vec![0, 15, 30, 45, 60, 75, 90, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_live_metrics_match_targets() {
        let plan = plan_with(3);
        let recorder = Recorder::default();
        scheduler().start(&plan, recorder.clone()).wait().await;

        for exp in &plan.experiments {
            let last = recorder
                .calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Update(id, u) if id == exp.id => Some(u),
                    _ => None,
                })
                .last()
                .unwrap();
            assert_eq!(last.status, ExperimentStatus::Completed);
            assert_eq!(last.live_metrics, exp.simulated_metrics);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_third_checkpoint() {
        let plan = plan_with(2);
        let recorder = Recorder::default();
        let handle = scheduler().start(&plan, recorder.clone());

        // Checkpoint 3 of experiment 0 fires at 2000ms
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(recorder.calls().len(), 6);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(recorder.calls().len(), 6);
        assert!(handle.is_cancelled());
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let plan = plan_with(1);
        let recorder = Recorder::default();
        let handle = scheduler().start(&plan, recorder.clone());
        handle.wait().await;

        // Finished run: nothing further is delivered
        let before = recorder.calls().len();
        handle.cancel();
        handle.cancel();
        assert_eq!(recorder.calls().len(), before);
        assert!(!handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_run() {
        let plan = plan_with(2);
        let recorder = Recorder::default();
        let handle = scheduler().start(&plan, recorder.clone());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let seen = recorder.calls().len();
        assert_eq!(seen, 4);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(recorder.calls().len(), seen);
    }

    /// Observer that cancels its own run from inside a callback
    struct SelfCancelling {
        recorder: Recorder,
        handle: Arc<Mutex<Option<SimulationHandle>>>,
    }

    impl SimulationObserver for SelfCancelling {
        fn on_update(&mut self, experiment_id: &str, update: &ExperimentUpdate) {
            self.recorder.on_update(experiment_id, update);
            if update.checkpoint == 2 {
                if let Some(handle) = self.handle.lock().unwrap().as_ref() {
                    handle.cancel();
                }
            }
        }

        fn on_log(&mut self, entry: &LogEntry) {
            self.recorder.on_log(entry);
        }

        fn on_complete(&mut self) {
            self.recorder.on_complete();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_from_inside_callback() {
        let plan = plan_with(1);
        let recorder = Recorder::default();
        let slot = Arc::new(Mutex::new(None));
        let handle = scheduler().start(
            &plan,
            SelfCancelling {
                recorder: recorder.clone(),
                handle: Arc::clone(&slot),
            },
        );
        *slot.lock().unwrap() = Some(handle);

        tokio::time::sleep(Duration::from_secs(30)).await;

        // Update for checkpoint 2 went out; its log line did not
        let calls = recorder.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls.last(), Some(Call::Update(_, u)) if u.checkpoint == 2));
        assert!(slot.lock().unwrap().as_ref().unwrap().is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_run_tags_events() {
        let plan = plan_with(1);
        let (handle, mut rx) = scheduler().start_channel(&plan);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            assert_eq!(event.run_id, handle.run_id());
            let done = event.kind == EventKind::Complete;
            events.push(event);
            if done {
                break;
            }
        }
        // 8 updates + 8 logs + 2 closing logs + complete
        assert_eq!(events.len(), 19);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_ids_unique_within_run() {
        let plan = plan_with(2);
        let (handle, mut rx) = scheduler().start_channel(&plan);
        handle.wait().await;
        drop(handle);

        let mut ids = std::collections::HashSet::new();
        while let Some(event) = rx.recv().await {
            if let EventKind::Log(entry) = event.kind {
                assert!(ids.insert(entry.id));
            }
        }
        assert_eq!(ids.len(), 2 * 8 + 2);
    }
}

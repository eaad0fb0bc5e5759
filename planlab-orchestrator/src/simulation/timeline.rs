//! Checkpoint timeline for a plan
//!
//! Each experiment passes through eight checkpoints. Experiments run strictly
//! one after another; after the last one a terminal step reports completion.
//! The timing and jitter constants are calibration values for playback, not
//! measurements.

use crate::plan::{ExperimentStatus, ExperimentUpdate, LogLevel, Metrics, Plan};
use rand::Rng;
use std::time::Duration;

/// Progress reported at each checkpoint
pub const CHECKPOINT_PROGRESS: [u8; 8] = [0, 15, 30, 45, 60, 75, 90, 100];

/// Delay after each checkpoint; the last entry is the gap before the next experiment
pub const CHECKPOINT_DELAYS_MS: [u64; 8] = [800, 1200, 1000, 1500, 1200, 1200, 1500, 500];

/// Simulated time taken by one experiment, including the trailing gap
pub const EXPERIMENT_DURATION_MS: u64 = 8900;

/// Something the runner does when a step fires
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Update {
        experiment_id: String,
        update: ExperimentUpdate,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Complete,
}

/// Actions due at an offset from the start of the run
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineStep {
    pub at: Duration,
    pub actions: Vec<Action>,
}

/// Ordered playback schedule for one plan
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    steps: Vec<TimelineStep>,
}

fn scaled(ms: u64, time_scale: f64) -> Duration {
    let scale = if time_scale.is_finite() && time_scale >= 0.0 {
        time_scale
    } else {
        1.0
    };
    Duration::from_nanos((ms as f64 * 1_000_000.0 * scale).round() as u64)
}

fn jitter<R: Rng + ?Sized>(rng: &mut R, max: f64) -> f64 {
    rng.gen_range(0.0..max)
}

/// Live reading at a training checkpoint (4..=6)
fn training_metrics<R: Rng + ?Sized>(
    rng: &mut R,
    target: &Metrics,
    accuracy_factor: f64,
    accuracy_jitter: f64,
    latency_factor: f64,
    latency_jitter: f64,
) -> Metrics {
    Metrics {
        accuracy: (target.accuracy * accuracy_factor + jitter(rng, accuracy_jitter)).min(1.0),
        latency_ms: target.latency_ms * (latency_factor + jitter(rng, latency_jitter)),
        model_size_mb: 0.0,
    }
}

fn synthetic_loss<R: Rng + ?Sized>(rng: &mut R, accuracy: f64) -> f64 {
    (1.0 - accuracy).max(0.01) * (0.9 + jitter(rng, 0.3))
}

impl Timeline {
    /// Build the timeline for `plan`, drawing metric jitter from `rng`
    pub fn build<R: Rng + ?Sized>(plan: &Plan, rng: &mut R, time_scale: f64) -> Self {
        let mut steps = Vec::with_capacity(plan.experiments.len() * 8 + 1);
        let mut clock_ms: u64 = 0;

        for exp in &plan.experiments {
            let target = exp.simulated_metrics;
            let name = exp.name.as_str();
            let mut live = Metrics::ZERO;

            for (idx, progress) in CHECKPOINT_PROGRESS.iter().copied().enumerate() {
                let checkpoint = idx as u8 + 1;
                let mut status = ExperimentStatus::Running;

                let (level, message) = match checkpoint {
                    1 => (LogLevel::Info, format!("Starting Experiment: {}", name)),
                    2 => (LogLevel::Info, format!("[{}] Loading dataset...", name)),
                    3 => (LogLevel::Info, format!("[{}] Initializing architecture...", name)),
                    4 => {
                        live = training_metrics(rng, &target, 0.1, 0.05, 1.5, 0.5);
                        (LogLevel::Info, format!("[{}] Training loop start (epoch 1/10)", name))
                    }
                    5 | 6 => {
                        live = if checkpoint == 5 {
                            training_metrics(rng, &target, 0.6, 0.05, 1.2, 0.2)
                        } else {
                            training_metrics(rng, &target, 0.9, 0.02, 1.05, 0.05)
                        };
                        let epoch = if checkpoint == 5 { 4 } else { 8 };
                        let loss = synthetic_loss(rng, live.accuracy);
                        (
                            LogLevel::Info,
                            format!(
                                "[{}] Epoch {}/10 - loss: {:.4} - accuracy: {:.2}%",
                                name,
                                epoch,
                                loss,
                                live.accuracy * 100.0
                            ),
                        )
                    }
                    7 => {
                        live = Metrics {
                            accuracy: (target.accuracy * 0.98).min(1.0),
                            latency_ms: target.latency_ms,
                            model_size_mb: 0.0,
                        };
                        (
                            LogLevel::Warning,
                            format!("[{}] Evaluating on validation set...", name),
                        )
                    }
                    _ => {
                        status = ExperimentStatus::Completed;
                        live = target;
                        (
                            LogLevel::Success,
                            format!(
                                "[{}] Completed. Final accuracy: {:.2}%",
                                name,
                                target.accuracy * 100.0
                            ),
                        )
                    }
                };

                steps.push(TimelineStep {
                    at: scaled(clock_ms, time_scale),
                    actions: vec![
                        Action::Update {
                            experiment_id: exp.id.clone(),
                            update: ExperimentUpdate {
                                checkpoint,
                                status,
                                progress,
                                live_metrics: live,
                            },
                        },
                        Action::Log { level, message },
                    ],
                });

                clock_ms += CHECKPOINT_DELAYS_MS[idx];
            }
        }

        steps.push(TimelineStep {
            at: scaled(clock_ms, time_scale),
            actions: vec![
                Action::Log {
                    level: LogLevel::Success,
                    message: "All experiments completed.".to_string(),
                },
                Action::Log {
                    level: LogLevel::Info,
                    message: "Generating report...".to_string(),
                },
                Action::Complete,
            ],
        });

        Self { steps }
    }

    pub fn steps(&self) -> &[TimelineStep] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<TimelineStep> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Offset of the terminal step
    pub fn total_duration(&self) -> Duration {
        self.steps.last().map(|s| s.at).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::test_support::plan_with;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn updates(timeline: &Timeline) -> Vec<(String, ExperimentUpdate)> {
        timeline
            .steps()
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter_map(|a| match a {
                Action::Update {
                    experiment_id,
                    update,
                } => Some((experiment_id.clone(), *update)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_delays_sum_to_experiment_duration() {
        assert_eq!(CHECKPOINT_DELAYS_MS.iter().sum::<u64>(), EXPERIMENT_DURATION_MS);
    }

    #[test]
    fn test_three_experiment_shape() {
        let plan = plan_with(3);
        let timeline = Timeline::build(&plan, &mut StdRng::seed_from_u64(1), 1.0);

        assert_eq!(timeline.len(), 8 * 3 + 1);
        assert_eq!(
            timeline.total_duration(),
            Duration::from_millis(3 * EXPERIMENT_DURATION_MS)
        );
        for pair in timeline.steps().windows(2) {
            assert!(pair[0].at < pair[1].at, "steps must be strictly ascending");
        }

        let last = timeline.steps().last().unwrap();
        assert_eq!(last.actions.last(), Some(&Action::Complete));
        let complete_count = timeline
            .steps()
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter(|a| **a == Action::Complete)
            .count();
        assert_eq!(complete_count, 1);
    }

    #[test]
    fn test_checkpoint_offsets() {
        let plan = plan_with(2);
        let timeline = Timeline::build(&plan, &mut StdRng::seed_from_u64(2), 1.0);
        let offsets: Vec<u128> = timeline.steps().iter().map(|s| s.at.as_millis()).collect();
        assert_eq!(
            &offsets[..9],
            &[0, 800, 2000, 3000, 4500, 5700, 6900, 8400, 8900]
        );
    }

    #[test]
    fn test_experiments_run_in_order() {
        let plan = plan_with(2);
        let timeline = Timeline::build(&plan, &mut StdRng::seed_from_u64(3), 1.0);
        let updates = updates(&timeline);

        let first: Vec<u8> = updates[..8].iter().map(|(_, u)| u.progress).collect();
        assert!(updates[..8].iter().all(|(id, _)| id == "exp-0"));
        assert_eq!(first, CHECKPOINT_PROGRESS.to_vec());
        assert_eq!(updates[8].0, "exp-1");
        assert_eq!(updates[8].1.progress, 0);
        assert_eq!(updates[7].1.status, ExperimentStatus::Completed);
    }

    #[test]
    fn test_metric_formulas() {
        let plan = plan_with(1);
        let target = plan.experiments[0].simulated_metrics;
        let timeline = Timeline::build(&plan, &mut StdRng::seed_from_u64(4), 1.0);
        let live: Vec<Metrics> = updates(&timeline).iter().map(|(_, u)| u.live_metrics).collect();

        for m in &live[..3] {
            assert_eq!(*m, Metrics::ZERO);
        }

        let within = |value: f64, lo: f64, hi: f64| value >= lo && value < hi;
        assert!(within(live[3].accuracy, target.accuracy * 0.1, target.accuracy * 0.1 + 0.05));
        assert!(within(live[3].latency_ms, target.latency_ms * 1.5, target.latency_ms * 2.0));
        assert!(within(live[4].accuracy, target.accuracy * 0.6, target.accuracy * 0.6 + 0.05));
        assert!(within(live[4].latency_ms, target.latency_ms * 1.2, target.latency_ms * 1.4));
        assert!(live[5].accuracy <= 1.0);
        assert!(within(live[5].latency_ms, target.latency_ms * 1.05, target.latency_ms * 1.1));
        assert_eq!(live[6].accuracy, target.accuracy * 0.98);
        assert_eq!(live[6].latency_ms, target.latency_ms);
        assert_eq!(live[7], target);
        assert!(live[..7].iter().all(|m| m.model_size_mb == 0.0));
    }

    #[test]
    fn test_log_levels() {
        let plan = plan_with(1);
        let timeline = Timeline::build(&plan, &mut StdRng::seed_from_u64(5), 1.0);
        let levels: Vec<LogLevel> = timeline
            .steps()
            .iter()
            .flat_map(|s| s.actions.iter())
            .filter_map(|a| match a {
                Action::Log { level, .. } => Some(*level),
                _ => None,
            })
            .collect();
        assert_eq!(levels.len(), 8 + 2);
        assert_eq!(levels[6], LogLevel::Warning);
        assert_eq!(levels[7], LogLevel::Success);

        let Action::Log { message, .. } = &timeline.steps()[7].actions[1] else {
            panic!("expected log action");
        };
        assert!(message.contains("Final accuracy: 80.00%"));
    }

    #[test]
    fn test_same_seed_same_timeline() {
        let plan = plan_with(3);
        let a = Timeline::build(&plan, &mut StdRng::seed_from_u64(9), 1.0);
        let b = Timeline::build(&plan, &mut StdRng::seed_from_u64(9), 1.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_time_scale() {
        let plan = plan_with(2);
        let timeline = Timeline::build(&plan, &mut StdRng::seed_from_u64(6), 0.1);
        assert_eq!(timeline.total_duration(), Duration::from_millis(1780));
        assert_eq!(timeline.steps()[1].at, Duration::from_millis(80));
    }

    #[test]
    fn test_empty_plan_completes_immediately() {
        let plan = plan_with(0);
        let timeline = Timeline::build(&plan, &mut StdRng::seed_from_u64(7), 1.0);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.total_duration(), Duration::ZERO);
    }
}

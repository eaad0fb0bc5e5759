//! Experiment plans: data model, response schema and the plan requester

pub mod model;
pub mod requester;
pub mod schema;

pub use model::{
    Experiment, ExperimentStatus, ExperimentUpdate, LogBook, LogEntry, LogLevel, Metrics, Plan,
    TransitionError,
};
pub use requester::{GenerationError, PlanRequester, RetryPolicy};

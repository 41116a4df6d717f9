use thiserror::Error;
use uuid::Uuid;

use crate::types::RunStatus;

pub type JourneyResult<T> = Result<T, JourneyError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced synchronously to callers of the journey service.
#[derive(Error, Debug)]
pub enum JourneyError {
    #[error("{0}")]
    Validation(String),

    #[error("Journey {0} not found")]
    JourneyNotFound(Uuid),

    #[error("Journey run {0} not found")]
    RunNotFound(Uuid),

    #[error("Journey run {run_id} is already {status}")]
    RunFinished { run_id: Uuid, status: RunStatus },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by journey and run persistence backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("journey run {0} not found")]
    RunNotFound(Uuid),

    #[error("journey run {0} is finalized")]
    RunFinalized(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Failures inside a run's execution loop. These terminate the run with
/// status `failed` and never reach the triggering caller.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Node {node_id} not found in journey {journey_id}")]
    NodeNotFound { node_id: String, journey_id: Uuid },

    #[error("Journey {0} no longer exists")]
    JourneyMissing(Uuid),

    #[error("Delay node {node_id} has an unusable duration of {seconds}s")]
    InvalidDelay { node_id: String, seconds: f64 },

    #[error("Run exceeded its budget of {0} node executions")]
    StepBudgetExceeded(u64),

    #[error("Message delivery failed: {0}")]
    Delivery(#[source] anyhow::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Run was cancelled")]
    Cancelled,
}

/// An operator name outside the supported set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown condition operator: {0}")]
pub struct InvalidOperator(pub String);

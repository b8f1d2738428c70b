// ABOUTME: Error types for the execution engine.
// ABOUTME: EngineError aborts a whole run; StepError is captured into the failing step.

use std::time::Duration;

use thiserror::Error;

use maestro_agent::CompletionError;

/// Fatal, run-level errors. These propagate out of `Engine::execute_run`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("orchestrator not found: {0}")]
    OrchestratorNotFound(String),

    #[error("agent {0} is not an orchestrator")]
    NotAnOrchestrator(String),

    #[error("orchestrator {0} has no available specialists")]
    NoSpecialists(String),

    #[error("failed to parse execution plan: {0}")]
    PlanParse(String),

    #[error("planning call failed: {0}")]
    Planning(#[from] CompletionError),
}

/// Step-level errors. Never propagated past the step executor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    #[error("{0}")]
    Invocation(String),

    #[error("timed out after {}s", .0.as_secs_f64())]
    TimedOut(Duration),

    #[error("agent not found: {requested}; available ids are: {available}")]
    AgentNotFound { requested: String, available: String },
}

impl StepError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StepError::AgentNotFound { .. })
    }
}

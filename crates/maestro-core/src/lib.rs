// ABOUTME: Core library for maestro, containing the agent, plan, run, and log data model.
// ABOUTME: This crate defines the shared types every other maestro component mutates or reads.

pub mod agent;
pub mod log;
pub mod path;
pub mod plan;
pub mod run;

pub use agent::{
    Agent, AgentKind, ConsolidationStrategy, ExecutionMode, FieldSchema, FieldType,
    OrchestrationConfig, RagConfig,
};
pub use log::{Artifact, ArtifactKind, LogLevel, LogPhase, RunLog};
pub use path::{PathError, SourcePath};
pub use plan::{ExecutionPlan, PlanStep, PlanStrategy};
pub use run::{Run, RunPatch, RunStatus, Step, StepStatus};

/// Generic ordered key/value container used for resolved inputs and step outputs.
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ABOUTME: Execution engine for maestro orchestrations.
// ABOUTME: Turns a goal plus agents into a plan, runs its steps, and consolidates the results.

pub mod config;
pub mod consolidator;
pub mod engine;
pub mod error;
pub mod planner;
pub mod recorder;
pub mod resolver;
pub mod retry;
pub mod scheduler;

pub use config::{ConfigError, EngineConfig};
pub use consolidator::{Consolidation, Consolidator, NO_RESULTS};
pub use engine::Engine;
pub use error::{EngineError, StepError};
pub use planner::{PlanBuilder, PlannedExecution};
pub use recorder::{NoopObserver, RunObserver, RunRecorder, TracingObserver};
pub use resolver::{AccumulatedContext, resolve_input};
pub use retry::{with_retry, with_timeout};
pub use scheduler::Scheduler;

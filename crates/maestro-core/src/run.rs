// ABOUTME: Defines Run and Step, the observable execution state of one orchestration.
// ABOUTME: RunPatch carries partial run updates handed to observers and merged by apply_patch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::Payload;
use crate::log::RunLog;
use crate::plan::{ExecutionPlan, PlanStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

/// The live execution record paired 1:1 with a PlanStep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub status: StepStatus,
    pub input: Option<Payload>,
    pub output: Option<Payload>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub tokens_used: Option<u64>,
    pub cost: Option<f64>,
    pub error: Option<String>,
    pub description: String,
    pub depends_on: Vec<String>,
}

impl Step {
    /// A pending step mirroring the given plan step.
    pub fn from_plan(plan_step: &PlanStep) -> Self {
        Self {
            id: plan_step.step_id.clone(),
            agent_id: plan_step.agent_id.clone(),
            agent_name: plan_step.agent_name.clone(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            tokens_used: None,
            cost: None,
            error: None,
            description: plan_step.description.clone(),
            depends_on: plan_step.depends_on.clone(),
        }
    }
}

/// One orchestration execution instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub orchestrator_id: String,
    pub orchestrator_name: String,
    pub goal: String,
    #[serde(default)]
    pub context: Option<Payload>,
    pub status: RunStatus,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub logs: Vec<RunLog>,
    #[serde(default)]
    pub plan: Option<ExecutionPlan>,
    pub final_output: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl Run {
    /// Create a pending run for the given orchestrator and goal.
    pub fn new(orchestrator_id: &str, goal: &str) -> Self {
        Self {
            id: Ulid::new().to_string(),
            orchestrator_id: orchestrator_id.to_string(),
            orchestrator_name: String::new(),
            goal: goal.to_string(),
            context: None,
            status: RunStatus::Pending,
            steps: Vec::new(),
            logs: Vec::new(),
            plan: None,
            final_output: None,
            started_at: None,
            completed_at: None,
            total_tokens: 0,
            total_cost: 0.0,
        }
    }

    pub fn with_context(mut self, context: Payload) -> Self {
        self.context = Some(context);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Replace the stored step with the same id, or append it.
    pub fn upsert_step(&mut self, step: Step) {
        match self.steps.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => *existing = step,
            None => self.steps.push(step),
        }
    }

    /// Merge a partial update into this run.
    pub fn apply_patch(&mut self, patch: &RunPatch) {
        if let Some(name) = &patch.orchestrator_name {
            self.orchestrator_name = name.clone();
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(plan) = &patch.plan {
            self.plan = Some(plan.clone());
        }
        if let Some(output) = &patch.final_output {
            self.final_output = Some(output.clone());
        }
        if let Some(at) = patch.started_at {
            self.started_at = Some(at);
        }
        if let Some(at) = patch.completed_at {
            self.completed_at = Some(at);
        }
        if let Some(tokens) = patch.total_tokens {
            self.total_tokens = tokens;
        }
        if let Some(cost) = patch.total_cost {
            self.total_cost = cost;
        }
    }

    /// Mark the run failed after a fatal error escaped the engine.
    pub fn mark_failed(&mut self, reason: &str) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        if self.final_output.is_none() {
            self.final_output = Some(format!("Run failed: {}", reason));
        }
    }
}

/// A partial update to a run. Unset fields are left untouched by `apply_patch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
}

// ABOUTME: Defines ExecutionPlan and PlanStep, the dependency graph executed by one run.
// ABOUTME: Plans are built once per run and are read-only afterwards.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::path::SourcePath;

/// The declared scheduling strategy of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStrategy {
    #[default]
    Sequential,
    Parallel,
    Mixed,
}

impl PlanStrategy {
    /// Parse a strategy name leniently, defaulting to sequential.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "parallel" => PlanStrategy::Parallel,
            "mixed" => PlanStrategy::Mixed,
            _ => PlanStrategy::Sequential,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PlanStrategy::Sequential => "sequential",
            PlanStrategy::Parallel => "parallel",
            PlanStrategy::Mixed => "mixed",
        }
    }
}

/// One planned specialist invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub step_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub description: String,
    /// Target field name to source path.
    #[serde(default)]
    pub input_mapping: BTreeMap<String, SourcePath>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// The DAG to execute for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub goal: String,
    pub reasoning: String,
    pub steps: Vec<PlanStep>,
    pub strategy: PlanStrategy,
}

impl ExecutionPlan {
    /// Enforce the dependency invariants in place: every edge points at a
    /// step of this plan, no step depends on itself, the first step has no
    /// dependencies, and no edge is listed twice.
    pub fn sanitize_dependencies(&mut self) {
        let ids: HashSet<String> = self.steps.iter().map(|s| s.step_id.clone()).collect();
        for (index, step) in self.steps.iter_mut().enumerate() {
            if index == 0 {
                step.depends_on.clear();
                continue;
            }
            let mut seen = HashSet::new();
            let own_id = step.step_id.clone();
            step.depends_on
                .retain(|dep| *dep != own_id && ids.contains(dep) && seen.insert(dep.clone()));
        }
    }

    /// Check the invariants `sanitize_dependencies` establishes.
    pub fn dependencies_are_sound(&self) -> bool {
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        let unique = ids.len() == self.steps.len();
        let first_free = self.steps.first().is_none_or(|s| s.depends_on.is_empty());
        let edges_ok = self.steps.iter().all(|s| {
            s.depends_on
                .iter()
                .all(|d| d != &s.step_id && ids.contains(d.as_str()))
        });
        unique && first_free && edges_ok
    }
}

// ABOUTME: Input resolution for plan steps: turns a parsed input mapping into a concrete payload.
// ABOUTME: AccumulatedContext is the working state threaded through one run's step executions.

use serde_json::{Value, json};

use maestro_core::{Payload, PlanStep, SourcePath, Step, StepStatus};

/// Field carrying the most recent step's output when a step is auto-chained.
pub const PREVIOUS_OUTPUT_FIELD: &str = "previous_output";
/// Field carrying the most recent step's agent name when a step is auto-chained.
pub const PREVIOUS_AGENT_FIELD: &str = "previous_agent";
/// Field guaranteed to hold the run goal in every resolved input.
pub const GOAL_FIELD: &str = "goal";
/// Field carrying the step description in the empty-input fallback.
pub const TASK_FIELD: &str = "task";

/// Live working state of one run: the original input, the shared context,
/// and every completed step in completion order.
///
/// Only the scheduler writes to it, and only between waves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedContext {
    goal: String,
    user_input: Payload,
    shared: Payload,
    completed: Vec<Step>,
}

impl AccumulatedContext {
    /// The user input is the goal plus the run context entries; context
    /// entries never override the goal.
    pub fn new(goal: &str, context: Option<&Payload>) -> Self {
        let shared = context.cloned().unwrap_or_default();
        let mut user_input = Payload::new();
        user_input.insert(GOAL_FIELD.to_string(), json!(goal));
        for (key, value) in &shared {
            user_input
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        Self {
            goal: goal.to_string(),
            user_input,
            shared,
            completed: Vec::new(),
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn user_input(&self) -> &Payload {
        &self.user_input
    }

    pub fn shared(&self) -> &Payload {
        &self.shared
    }

    /// Record a completed step. Steps in any other state are ignored and
    /// `false` is returned.
    pub fn record_completed(&mut self, step: Step) -> bool {
        if step.status != StepStatus::Completed || self.is_completed(&step.id) {
            return false;
        }
        self.completed.push(step);
        true
    }

    pub fn completed(&self) -> &[Step] {
        &self.completed
    }

    pub fn completed_step(&self, step_id: &str) -> Option<&Step> {
        self.completed.iter().find(|s| s.id == step_id)
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_step(step_id).is_some()
    }

    pub fn last_completed(&self) -> Option<&Step> {
        self.completed.last()
    }

    fn output_of(step: &Step) -> Value {
        Value::Object(step.output.clone().unwrap_or_default())
    }

    /// Resolve one source path. `None` means the path points at nothing.
    pub fn lookup(&self, source: &SourcePath) -> Option<Value> {
        match source {
            SourcePath::UserInput { field } => {
                navigate(Value::Object(self.user_input.clone()), field)
            }
            SourcePath::Context { field } => navigate(Value::Object(self.shared.clone()), field),
            SourcePath::StepOutput { step_id, field } => self
                .completed_step(step_id)
                .and_then(|step| navigate(Self::output_of(step), field)),
            SourcePath::LastOutput { field } => self
                .last_completed()
                .and_then(|step| navigate(Self::output_of(step), field)),
            SourcePath::AllOutputs => Some(Value::Array(
                self.completed
                    .iter()
                    .map(|step| {
                        json!({
                            "stepId": step.id,
                            "agentName": step.agent_name,
                            "output": Self::output_of(step),
                        })
                    })
                    .collect(),
            )),
            SourcePath::Literal(raw) => Some(Value::String(raw.clone())),
        }
    }
}

/// Walk object keys (and numeric array indices) down from `value`.
fn navigate(value: Value, field: &[String]) -> Option<Value> {
    let mut current = value;
    for segment in field {
        current = match current {
            Value::Object(mut map) => map.remove(segment)?,
            Value::Array(mut items) => {
                let index: usize = segment.parse().ok()?;
                if index >= items.len() {
                    return None;
                }
                items.swap_remove(index)
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Build the concrete input for one step.
///
/// Mapped fields that resolve to nothing are left out. When the mapping has
/// no step reference and earlier steps completed, the latest output is
/// chained in under `previous_output`/`previous_agent`. An input left empty
/// falls back to `{task, goal}`, and `goal` is always present.
pub fn resolve_input(step: &PlanStep, ctx: &AccumulatedContext) -> Payload {
    let mut input = Payload::new();
    for (target, source) in &step.input_mapping {
        match ctx.lookup(source) {
            Some(value) => {
                input.insert(target.clone(), value);
            }
            None => {
                tracing::debug!(step_id = %step.step_id, field = %target, source = %source, "mapping resolved to nothing");
            }
        }
    }

    let references_steps = step.input_mapping.values().any(SourcePath::is_step_ref);
    if !references_steps && let Some(previous) = ctx.last_completed() {
        input
            .entry(PREVIOUS_OUTPUT_FIELD.to_string())
            .or_insert_with(|| AccumulatedContext::output_of(previous));
        input
            .entry(PREVIOUS_AGENT_FIELD.to_string())
            .or_insert_with(|| json!(previous.agent_name));
    }

    if input.is_empty() {
        input.insert(TASK_FIELD.to_string(), json!(step.description));
    }
    // The run goal wins over anything mapped onto the same field.
    input.insert(GOAL_FIELD.to_string(), json!(ctx.goal()));
    input
}

// ABOUTME: PlanBuilder produces the ExecutionPlan for a run, either from the orchestrator's LLM or from rules.
// ABOUTME: LLM plans go through a structured attempt, a free-form fallback, and one shared normalization step.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde_json::{Value, json};

use maestro_agent::{ChatMessage, ChatRequest, CompletionClient, CompletionError, Usage, prompts};
use maestro_core::{
    Agent, ExecutionMode, ExecutionPlan, Payload, PlanStep, PlanStrategy, SourcePath,
};

use crate::error::EngineError;
use crate::resolver::GOAL_FIELD;

/// Temperature used for planning calls.
const PLANNING_TEMPERATURE: f32 = 0.2;

/// Formatting rules appended to the orchestrator's own system prompt.
const PLANNING_RULES: &str = "You plan work for a team of specialist agents. \
    Break the goal into steps, each delegated to exactly one specialist.\n\n\
    Respond with a single JSON object with these fields:\n\
    - reasoning: a short explanation of the plan\n\
    - strategy: \"sequential\", \"parallel\" or \"mixed\"\n\
    - steps: an array of steps, each with stepId, agentId, description, inputMapping and dependsOn\n\n\
    inputMapping lists, for each input field of the step, where its value comes from:\n\
    - user_input or user_input.<field>: the original request\n\
    - steps.<stepId>.output or steps.<stepId>.output.<field>: the output of an earlier step\n\
    - context or context.<field>: the shared context\n\
    - last_output or last_output.<field>: the most recently completed step\n\
    - all_outputs: every completed step so far\n\
    - any other text is passed through as a literal value\n\n\
    dependsOn lists the stepIds that must complete before the step runs. \
    The first step has no dependencies. Only use the agent ids listed by the user.";

/// A plan plus the usage spent producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedExecution {
    pub plan: ExecutionPlan,
    pub usage: Option<Usage>,
    /// Non-fatal problems found while normalizing the plan.
    pub warnings: Vec<String>,
}

/// Builds plans for one orchestrator over its available specialists.
pub struct PlanBuilder {
    client: Arc<dyn CompletionClient>,
}

impl PlanBuilder {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self { client }
    }

    /// Produce a plan in the mode the orchestrator is configured for.
    pub async fn build(
        &self,
        orchestrator: &Agent,
        specialists: &[&Agent],
        goal: &str,
        context: Option<&Payload>,
    ) -> Result<PlannedExecution, EngineError> {
        if specialists.is_empty() {
            return Err(EngineError::NoSpecialists(orchestrator.id.clone()));
        }
        match orchestrator.orchestration().execution_mode {
            ExecutionMode::Sequential => {
                Ok(rule_derived(specialists, goal, PlanStrategy::Sequential))
            }
            ExecutionMode::Parallel => Ok(rule_derived(specialists, goal, PlanStrategy::Parallel)),
            ExecutionMode::LlmPlanned => {
                self.llm_plan(orchestrator, specialists, goal, context).await
            }
        }
    }

    async fn llm_plan(
        &self,
        orchestrator: &Agent,
        specialists: &[&Agent],
        goal: &str,
        context: Option<&Payload>,
    ) -> Result<PlannedExecution, EngineError> {
        let request = planning_request(orchestrator, specialists, goal, context);
        let schema = plan_schema(specialists);

        let (raw, usage, mut warnings) = match self.try_structured_plan(&request, &schema).await {
            Ok((raw, usage)) => (raw, usage, Vec::new()),
            Err(e) => {
                tracing::warn!(orchestrator = %orchestrator.id, error = %e, "structured planning rejected, falling back to free-form");
                let (raw, usage) = self.try_freeform_plan(&request).await?;
                let note = format!("Structured planning unavailable ({}); used free-form plan", e);
                (raw, usage, vec![note])
            }
        };

        let max_steps = orchestrator.orchestration().max_steps;
        let (plan, normalize_warnings) = normalize_plan(&raw, goal, specialists, max_steps)?;
        warnings.extend(normalize_warnings);
        tracing::info!(
            orchestrator = %orchestrator.id,
            steps = plan.steps.len(),
            strategy = plan.strategy.label(),
            "plan built"
        );
        Ok(PlannedExecution {
            plan,
            usage: Some(usage),
            warnings,
        })
    }

    async fn try_structured_plan(
        &self,
        request: &ChatRequest,
        schema: &Value,
    ) -> Result<(Value, Usage), CompletionError> {
        let response = self
            .client
            .chat_structured(request, "execution_plan", schema)
            .await?;
        Ok((response.data, response.usage))
    }

    async fn try_freeform_plan(
        &self,
        request: &ChatRequest,
    ) -> Result<(Value, Usage), EngineError> {
        let response = self.client.chat(request).await?;
        let text = response.content();
        let json_text = extract_json_object(text).ok_or_else(|| {
            EngineError::PlanParse("no JSON object found in planning response".to_string())
        })?;
        let raw = serde_json::from_str(json_text)
            .map_err(|e| EngineError::PlanParse(format!("malformed plan JSON: {}", e)))?;
        Ok((raw, response.usage))
    }
}

/// One step per specialist in configured order. Sequential plans chain each
/// step to its predecessor; parallel plans have no edges.
pub fn rule_derived(
    specialists: &[&Agent],
    goal: &str,
    strategy: PlanStrategy,
) -> PlannedExecution {
    let steps: Vec<PlanStep> = specialists
        .iter()
        .enumerate()
        .map(|(index, agent)| {
            let depends_on = match (strategy, index) {
                (PlanStrategy::Sequential, i) if i > 0 => vec![format!("step{}", i)],
                _ => Vec::new(),
            };
            PlanStep {
                step_id: format!("step{}", index + 1),
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                description: step_description(agent, goal),
                input_mapping: BTreeMap::new(),
                depends_on,
            }
        })
        .collect();

    let reasoning = match strategy {
        PlanStrategy::Parallel => format!(
            "Fixed plan: all {} configured specialists run independently.",
            steps.len()
        ),
        _ => format!(
            "Fixed plan: {} configured specialists run in order, each receiving the previous output.",
            steps.len()
        ),
    };

    PlannedExecution {
        plan: ExecutionPlan {
            goal: goal.to_string(),
            reasoning,
            steps,
            strategy,
        },
        usage: None,
        warnings: Vec::new(),
    }
}

fn step_description(agent: &Agent, goal: &str) -> String {
    let summary = [agent.description.trim(), agent.role.trim()]
        .into_iter()
        .find(|s| !s.is_empty());
    match summary {
        Some(summary) => format!("{}: {}", agent.name, summary),
        None => format!("{}: contribute to \"{}\"", agent.name, goal),
    }
}

fn planning_request(
    orchestrator: &Agent,
    specialists: &[&Agent],
    goal: &str,
    context: Option<&Payload>,
) -> ChatRequest {
    let system = format!("{}\n\n{}", prompts::system_prompt(orchestrator), PLANNING_RULES);

    let mut user = format!("Goal: {}\n\nAvailable specialists:\n", goal);
    for agent in specialists {
        user.push_str(&format!("- id: {} | name: {}", agent.id, agent.name));
        if !agent.role.is_empty() {
            user.push_str(&format!(" | role: {}", agent.role));
        }
        if !agent.description.is_empty() {
            user.push_str(&format!(" | description: {}", agent.description));
        }
        user.push('\n');
        let required = agent.required_inputs();
        if !required.is_empty() {
            let fields: Vec<String> = required
                .iter()
                .map(|f| format!("{} ({})", f.name, f.field_type))
                .collect();
            user.push_str(&format!("  required inputs: {}\n", fields.join(", ")));
        }
    }
    if let Some(context) = context.filter(|c| !c.is_empty()) {
        user.push_str(&format!(
            "\nShared context:\n{}\n",
            Value::Object(context.clone())
        ));
    }
    let ids: Vec<String> = specialists.iter().map(|a| format!("\"{}\"", a.id)).collect();
    user.push_str(&format!(
        "\nValid agentId values (use no others): {}\n",
        ids.join(", ")
    ));

    ChatRequest::new(
        &orchestrator.model,
        vec![ChatMessage::system(system), ChatMessage::user(user)],
    )
    .temperature(PLANNING_TEMPERATURE)
    .max_tokens(orchestrator.effective_max_tokens())
}

/// Strict schema for plans. `inputMapping` is an array of `{field, source}`
/// pairs, since strict mode cannot express open maps.
fn plan_schema(specialists: &[&Agent]) -> Value {
    let ids: Vec<&str> = specialists.iter().map(|a| a.id.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "reasoning": {"type": "string"},
            "strategy": {"type": "string", "enum": ["sequential", "parallel", "mixed"]},
            "steps": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "stepId": {"type": "string"},
                        "agentId": {"type": "string", "enum": ids},
                        "description": {"type": "string"},
                        "inputMapping": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "field": {"type": "string"},
                                    "source": {"type": "string"}
                                },
                                "required": ["field", "source"],
                                "additionalProperties": false
                            }
                        },
                        "dependsOn": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["stepId", "agentId", "description", "inputMapping", "dependsOn"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["reasoning", "strategy", "steps"],
        "additionalProperties": false
    })
}

/// The text between the first `{` and the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Scalars become strings; anything else is absent.
fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn find_specialist<'a>(specialists: &[&'a Agent], agent_id: &str) -> Option<&'a Agent> {
    specialists
        .iter()
        .find(|a| a.id == agent_id)
        .or_else(|| {
            specialists.iter().find(|a| {
                a.id.eq_ignore_ascii_case(agent_id) || a.name.eq_ignore_ascii_case(agent_id)
            })
        })
        .copied()
}

/// Turn raw planner JSON into a well-formed plan.
///
/// Missing step ids become `step<n>`, duplicates get a numeric suffix, agent
/// names are looked up, malformed mapping paths become literals (with a
/// warning), the plan is capped at `max_steps`, and dependency edges are
/// sanitized last.
pub fn normalize_plan(
    raw: &Value,
    goal: &str,
    specialists: &[&Agent],
    max_steps: Option<usize>,
) -> Result<(ExecutionPlan, Vec<String>), EngineError> {
    let object = raw
        .as_object()
        .ok_or_else(|| EngineError::PlanParse("plan is not a JSON object".to_string()))?;
    let raw_steps = object
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::PlanParse("plan has no steps array".to_string()))?;

    let mut warnings = Vec::new();
    let mut seen_ids = HashSet::new();
    let mut steps = Vec::new();

    for (index, raw_step) in raw_steps.iter().enumerate() {
        let Some(fields) = raw_step.as_object() else {
            warnings.push(format!("Ignored plan entry {}: not an object", index + 1));
            continue;
        };

        let base_id = as_text(fields.get("stepId"))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("step{}", index + 1));
        let mut step_id = base_id.clone();
        let mut suffix = 2;
        while !seen_ids.insert(step_id.clone()) {
            step_id = format!("{}_{}", base_id, suffix);
            suffix += 1;
        }

        let agent_id = as_text(fields.get("agentId")).unwrap_or_default();
        let agent_name = find_specialist(specialists, &agent_id)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| agent_id.clone());

        let input_mapping = normalize_mapping(fields.get("inputMapping"), &step_id, &mut warnings);
        let depends_on = match fields.get("dependsOn") {
            Some(Value::Array(items)) => items.iter().filter_map(|v| as_text(Some(v))).collect(),
            Some(single) => as_text(Some(single)).into_iter().collect(),
            None => Vec::new(),
        };

        steps.push(PlanStep {
            step_id,
            agent_id,
            agent_name,
            description: as_text(fields.get("description")).unwrap_or_default(),
            input_mapping,
            depends_on,
        });
    }

    if steps.is_empty() {
        return Err(EngineError::PlanParse("plan contains no steps".to_string()));
    }
    if let Some(limit) = max_steps.filter(|n| *n > 0 && steps.len() > *n) {
        warnings.push(format!(
            "Plan truncated from {} to {} steps (maxSteps)",
            steps.len(),
            limit
        ));
        steps.truncate(limit);
    }

    let mut plan = ExecutionPlan {
        goal: goal.to_string(),
        reasoning: as_text(object.get("reasoning")).unwrap_or_default(),
        steps,
        strategy: PlanStrategy::parse_lenient(
            &as_text(object.get("strategy")).unwrap_or_default(),
        ),
    };
    plan.sanitize_dependencies();
    debug_assert!(plan.dependencies_are_sound());
    Ok((plan, warnings))
}

/// Accept either `{field: source}` or `[{field, source}]`.
fn normalize_mapping(
    raw: Option<&Value>,
    step_id: &str,
    warnings: &mut Vec<String>,
) -> BTreeMap<String, SourcePath> {
    let pairs: Vec<(String, Value)> = match raw {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let field = as_text(item.get("field"))?;
                Some((field, item.get("source").cloned().unwrap_or(Value::Null)))
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut mapping = BTreeMap::new();
    for (field, source) in pairs {
        if field == GOAL_FIELD {
            warnings.push(format!(
                "Step {}: input '{}' is reserved for the run goal; mapping ignored",
                step_id, field
            ));
            continue;
        }
        let path = match source {
            Value::String(raw) => SourcePath::parse(&raw).unwrap_or_else(|e| {
                warnings.push(format!(
                    "Step {}: input '{}' has a malformed path ({}); using it as a literal",
                    step_id, field, e
                ));
                SourcePath::Literal(raw.clone())
            }),
            Value::Null => continue,
            other => SourcePath::Literal(other.to_string()),
        };
        mapping.insert(field, path);
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_agent::testing::ScriptedClient;
    use maestro_core::OrchestrationConfig;

    fn specialists() -> Vec<Agent> {
        let mut researcher = Agent::specialist("researcher", "Researcher", "gpt-4o");
        researcher.role = "finds facts".to_string();
        let writer = Agent::specialist("writer", "Writer", "gpt-4o");
        vec![researcher, writer]
    }

    fn orchestrator(mode: ExecutionMode) -> Agent {
        let mut orch = Agent::orchestrator("orch", "Lead", "gpt-4o", &["researcher", "writer"]);
        orch.orchestration = Some(OrchestrationConfig {
            execution_mode: mode,
            ..OrchestrationConfig::default()
        });
        orch
    }

    #[tokio::test]
    async fn sequential_mode_chains_without_calling_the_model() {
        let client = Arc::new(ScriptedClient::new());
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();

        let planned = PlanBuilder::new(client.clone())
            .build(&orchestrator(ExecutionMode::Sequential), &refs, "goal", None)
            .await
            .unwrap();

        assert_eq!(client.call_count(), 0);
        assert_eq!(planned.plan.strategy, PlanStrategy::Sequential);
        let ids: Vec<&str> = planned.plan.steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["step1", "step2"]);
        assert!(planned.plan.steps[0].depends_on.is_empty());
        assert_eq!(planned.plan.steps[1].depends_on, vec!["step1"]);
        assert!(planned.plan.steps[1].input_mapping.is_empty());
        assert!(planned.plan.dependencies_are_sound());
    }

    #[tokio::test]
    async fn parallel_mode_has_no_edges() {
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();
        let planned = PlanBuilder::new(Arc::new(ScriptedClient::new()))
            .build(&orchestrator(ExecutionMode::Parallel), &refs, "goal", None)
            .await
            .unwrap();

        assert_eq!(planned.plan.strategy, PlanStrategy::Parallel);
        assert!(planned.plan.steps.iter().all(|s| s.depends_on.is_empty()));
    }

    #[tokio::test]
    async fn no_specialists_is_fatal() {
        let result = PlanBuilder::new(Arc::new(ScriptedClient::new()))
            .build(&orchestrator(ExecutionMode::LlmPlanned), &[], "goal", None)
            .await;
        assert!(matches!(result, Err(EngineError::NoSpecialists(_))));
    }

    #[tokio::test]
    async fn llm_plan_is_normalized_and_lists_valid_ids() {
        let reply = json!({
            "reasoning": "research then write",
            "strategy": "sequential",
            "steps": [
                {"stepId": "s1", "agentId": "researcher", "description": "research",
                 "inputMapping": [{"field": "topic", "source": "user_input.goal"}],
                 "dependsOn": ["s2"]},
                {"stepId": "s2", "agentId": "WRITER", "description": "write",
                 "inputMapping": [{"field": "notes", "source": "steps.s1.output"}],
                 "dependsOn": ["s1", "s2", "ghost"]}
            ]
        });
        let client = Arc::new(ScriptedClient::new().reply(&reply.to_string()));
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();

        let planned = PlanBuilder::new(client.clone())
            .build(&orchestrator(ExecutionMode::LlmPlanned), &refs, "write docs", None)
            .await
            .unwrap();

        let plan = planned.plan;
        assert!(plan.dependencies_are_sound());
        assert!(plan.steps[0].depends_on.is_empty());
        assert_eq!(plan.steps[1].depends_on, vec!["s1"]);
        assert_eq!(plan.steps[1].agent_name, "Writer");
        assert_eq!(
            plan.steps[1].input_mapping["notes"],
            SourcePath::StepOutput {
                step_id: "s1".to_string(),
                field: vec![]
            }
        );
        assert_eq!(planned.usage.unwrap().total_tokens, ScriptedClient::TOKENS_PER_CALL);

        let request = client.last_request().unwrap();
        assert!(request.user_text().contains("\"researcher\", \"writer\""));
        assert!(request.system_text().contains("dependsOn"));
    }

    #[tokio::test]
    async fn structured_rejection_falls_back_to_free_form() {
        let client = Arc::new(
            ScriptedClient::new()
                .reject_structured("json_schema not supported")
                .reply(
                    "Here is the plan:\n```json\n{\"reasoning\": \"r\", \"strategy\": \"parallel\", \
                     \"steps\": [{\"agentId\": \"writer\", \"inputMapping\": {\"x\": \"steps..output\"}}]}\n```",
                ),
        );
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();

        let planned = PlanBuilder::new(client)
            .build(&orchestrator(ExecutionMode::LlmPlanned), &refs, "goal", None)
            .await
            .unwrap();

        assert_eq!(planned.plan.strategy, PlanStrategy::Parallel);
        assert_eq!(planned.plan.steps[0].step_id, "step1");
        assert_eq!(
            planned.plan.steps[0].input_mapping["x"],
            SourcePath::Literal("steps..output".to_string())
        );
        assert!(planned.warnings.iter().any(|w| w.contains("free-form")));
        assert!(planned.warnings.iter().any(|w| w.contains("malformed path")));
    }

    #[tokio::test]
    async fn free_form_without_json_fails_loudly() {
        let client = Arc::new(
            ScriptedClient::new()
                .reject_structured("nope")
                .reply("I cannot plan this."),
        );
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();

        let result = PlanBuilder::new(client)
            .build(&orchestrator(ExecutionMode::LlmPlanned), &refs, "goal", None)
            .await;
        assert!(matches!(result, Err(EngineError::PlanParse(_))));
    }

    #[test]
    fn normalization_dedupes_ids_and_falls_back_to_agent_id() {
        let raw = json!({"steps": [
            {"stepId": "a", "agentId": "unknown-agent"},
            {"stepId": "a", "agentId": "writer", "dependsOn": "a"},
            "garbage"
        ]});
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();

        let (plan, warnings) = normalize_plan(&raw, "g", &refs, None).unwrap();

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].agent_name, "unknown-agent");
        assert_eq!(plan.steps[1].step_id, "a_2");
        assert_eq!(plan.steps[1].depends_on, vec!["a"]);
        assert_eq!(plan.strategy, PlanStrategy::Sequential);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn normalization_caps_steps_and_resanitizes() {
        let raw = json!({"steps": [
            {"stepId": "a", "agentId": "writer"},
            {"stepId": "b", "agentId": "writer", "dependsOn": ["c"]},
            {"stepId": "c", "agentId": "writer", "dependsOn": ["a"]}
        ]});
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();

        let (plan, _) = normalize_plan(&raw, "g", &refs, Some(2)).unwrap();

        assert_eq!(plan.steps.len(), 2);
        assert!(plan.steps[1].depends_on.is_empty(), "edge to truncated step dropped");
        assert!(plan.dependencies_are_sound());
    }

    #[test]
    fn mapping_onto_goal_is_ignored_with_a_warning() {
        let raw = json!({"steps": [
            {"stepId": "a", "agentId": "writer", "inputMapping": {
                "goal": "context.topic",
                "topic": "context.topic"
            }}
        ]});
        let agents = specialists();
        let refs: Vec<&Agent> = agents.iter().collect();

        let (plan, warnings) = normalize_plan(&raw, "g", &refs, None).unwrap();

        let mapping = &plan.steps[0].input_mapping;
        assert!(!mapping.contains_key("goal"));
        assert!(mapping.contains_key("topic"));
        assert!(warnings.iter().any(|w| w.contains("reserved for the run goal")));
    }

    #[test]
    fn normalization_rejects_missing_or_empty_steps() {
        let refs: Vec<&Agent> = Vec::new();
        assert!(matches!(
            normalize_plan(&json!({"reasoning": "x"}), "g", &refs, None),
            Err(EngineError::PlanParse(_))
        ));
        assert!(matches!(
            normalize_plan(&json!({"steps": []}), "g", &refs, None),
            Err(EngineError::PlanParse(_))
        ));
    }

    #[test]
    fn extracts_outermost_object() {
        assert_eq!(extract_json_object("x {\"a\": {\"b\": 1}} y"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json_object("no json"), None);
        assert_eq!(extract_json_object("} backwards {"), None);
    }
}

// ABOUTME: Defines the Agent configuration record for specialists and orchestrators.
// ABOUTME: Includes declared input/output schemas, RAG settings, and orchestration settings.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

/// Sampling temperature used when an agent's stored value is missing or unusable.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Token ceiling used when an agent's stored value is missing or unusable.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Whether an agent performs bounded work or plans and delegates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Specialist,
    Orchestrator,
}

/// Scalar kind of a declared schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Boolean,
    Json,
    Array,
    Image,
    File,
}

impl FieldType {
    pub fn label(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Json => "json",
            FieldType::Array => "array",
            FieldType::Image => "image",
            FieldType::File => "file",
        }
    }

    /// The JSON Schema fragment describing values of this kind. Images and
    /// files travel as URL or base64 strings.
    pub fn json_schema(&self) -> Value {
        match self {
            FieldType::String | FieldType::Image | FieldType::File => json!({"type": "string"}),
            FieldType::Number => json!({"type": "number"}),
            FieldType::Boolean => json!({"type": "boolean"}),
            FieldType::Json => json!({"type": "object"}),
            FieldType::Array => json!({"type": "array", "items": {}}),
        }
    }

    /// Whether a concrete JSON value is acceptable for this kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::String | FieldType::Image | FieldType::File => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Json => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One named, typed field of an agent's declared input or output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

impl FieldSchema {
    pub fn new(name: &str, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            description: String::new(),
            required,
        }
    }
}

/// Retrieval-augmented context settings for an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Knowledge scope to retrieve from. Falls back to the agent id.
    #[serde(default)]
    pub knowledge_base_id: Option<String>,
}

/// How an orchestrator acquires its execution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    #[default]
    LlmPlanned,
}

/// How completed step outputs are merged into the final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationStrategy {
    Concatenate,
    #[default]
    Summarize,
    BestOfN,
}

/// Orchestrator-only settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub planning_strategy: Option<String>,
    #[serde(default)]
    pub evaluation_mode: Option<String>,
    #[serde(default)]
    pub consolidation: ConsolidationStrategy,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub retry_budget: Option<u32>,
}

/// Configuration for one LLM-backed unit. Read-only during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: AgentKind,
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default, deserialize_with = "lenient_f32")]
    pub temperature: Option<f32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub input_schema: Vec<FieldSchema>,
    #[serde(default)]
    pub output_schema: Vec<FieldSchema>,
    #[serde(default)]
    pub rag: Option<RagConfig>,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub allowed_agents: Vec<String>,
    #[serde(default)]
    pub orchestration: Option<OrchestrationConfig>,
}

impl Agent {
    /// Create a specialist with the given identity and model and no schemas.
    pub fn specialist(id: &str, name: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            role: String::new(),
            description: String::new(),
            kind: AgentKind::Specialist,
            model: model.to_string(),
            provider: String::new(),
            temperature: None,
            max_tokens: None,
            system_prompt: String::new(),
            input_schema: Vec::new(),
            output_schema: Vec::new(),
            rag: None,
            avatar: None,
            allowed_agents: Vec::new(),
            orchestration: None,
        }
    }

    /// Create an orchestrator allowed to call `allowed` in the given order.
    pub fn orchestrator(id: &str, name: &str, model: &str, allowed: &[&str]) -> Self {
        Self {
            kind: AgentKind::Orchestrator,
            allowed_agents: allowed.iter().map(|s| s.to_string()).collect(),
            orchestration: Some(OrchestrationConfig::default()),
            ..Self::specialist(id, name, model)
        }
    }

    pub fn is_orchestrator(&self) -> bool {
        self.kind == AgentKind::Orchestrator
    }

    /// Temperature coerced into a usable number.
    pub fn effective_temperature(&self) -> f32 {
        self.temperature
            .filter(|t| t.is_finite() && *t >= 0.0)
            .unwrap_or(DEFAULT_TEMPERATURE)
    }

    /// Max tokens coerced into a usable number.
    pub fn effective_max_tokens(&self) -> u32 {
        self.max_tokens.filter(|m| *m > 0).unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn rag_enabled(&self) -> bool {
        self.rag.as_ref().is_some_and(|r| r.enabled)
    }

    /// The knowledge scope used for retrieval.
    pub fn knowledge_scope(&self) -> &str {
        self.rag
            .as_ref()
            .and_then(|r| r.knowledge_base_id.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id)
    }

    pub fn orchestration(&self) -> OrchestrationConfig {
        self.orchestration.clone().unwrap_or_default()
    }

    /// Names of required input fields, used when describing the agent to a planner.
    pub fn required_inputs(&self) -> Vec<&FieldSchema> {
        self.input_schema.iter().filter(|f| f.required).collect()
    }
}

/// Accept a number, a numeric string, or anything else as `None`.
fn lenient_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.trim().parse::<f32>().ok(),
        _ => None,
    }))
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }))
}

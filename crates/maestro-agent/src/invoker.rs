// ABOUTME: SpecialistInvoker executes one specialist agent against the completion capability.
// ABOUTME: Handles the image-model branch, RAG injection, structured output, and result normalization.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Value, json};

use maestro_core::{Agent, Payload};

use crate::completion::{ChatMessage, ChatRequest, CompletionClient, ImageRequest, Usage};
use crate::knowledge::{KnowledgeBase, KnowledgeEntry};
use crate::prompts::{self, MAX_RAG_ENTRIES};

/// Substrings identifying image-generation models.
const IMAGE_MODEL_PATTERNS: &[&str] = &[
    "dall-e",
    "gpt-image",
    "stable-diffusion",
    "sdxl",
    "flux",
    "midjourney",
    "imagen",
    "playground-v",
];

/// Whether a model id names an image-generation model.
pub fn is_image_model(model: &str) -> bool {
    let model = model.to_lowercase();
    IMAGE_MODEL_PATTERNS.iter().any(|p| model.contains(p))
}

/// Mismatches between a resolved input and the agent's declared input schema:
/// required fields that are absent or null, and values of the wrong kind.
pub fn input_problems(agent: &Agent, input: &Payload) -> Vec<String> {
    let mut problems = Vec::new();
    for field in &agent.input_schema {
        match input.get(&field.name) {
            None | Some(Value::Null) if field.required => {
                problems.push(format!("missing required input field {}", field.name));
            }
            None | Some(Value::Null) => {}
            Some(value) if !field.field_type.accepts(value) => {
                problems.push(format!(
                    "input field {} should be {}, got {}",
                    field.name,
                    field.field_type,
                    kind_of(value)
                ));
            }
            Some(_) => {}
        }
    }
    problems
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Uniform outcome of one specialist invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvocationResult {
    pub success: bool,
    pub output: Option<Payload>,
    pub error: Option<String>,
    pub tokens_used: Option<u64>,
    pub cost: Option<f64>,
    /// Problems found checking the input against the declared input schema.
    /// The request is still sent.
    pub input_warnings: Vec<String>,
}

impl InvocationResult {
    pub fn succeeded(output: Payload, usage: Option<&Usage>) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            tokens_used: usage.map(|u| u.total_tokens),
            cost: usage.and_then(|u| u.cost),
            input_warnings: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Split into the success payload or the error message.
    pub fn into_result(self) -> Result<InvocationResult, String> {
        if self.success {
            Ok(self)
        } else {
            Err(self.error.unwrap_or_else(|| "specialist invocation failed".to_string()))
        }
    }
}

/// Runs specialists. Never fails across its own boundary: every internal
/// error becomes an `InvocationResult` with `success == false`.
#[derive(Clone)]
pub struct SpecialistInvoker {
    client: Arc<dyn CompletionClient>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
}

impl SpecialistInvoker {
    pub fn new(client: Arc<dyn CompletionClient>) -> Self {
        Self {
            client,
            knowledge: None,
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub async fn invoke(&self, agent: &Agent, input: &Payload) -> InvocationResult {
        let input_warnings = input_problems(agent, input);
        for problem in &input_warnings {
            tracing::warn!(agent = %agent.id, "{}", problem);
        }

        let result = if is_image_model(&agent.model) {
            self.invoke_image(agent, input).await
        } else {
            self.invoke_text(agent, input).await
        };
        let mut result = result.unwrap_or_else(|error| {
            tracing::warn!(agent = %agent.id, error = %error, "specialist invocation failed");
            InvocationResult::failed(error)
        });
        result.input_warnings = input_warnings;
        result
    }

    async fn invoke_image(
        &self,
        agent: &Agent,
        input: &Payload,
    ) -> Result<InvocationResult, String> {
        let prompt = image_prompt(input);
        let request = ImageRequest::new(&agent.model, &prompt);
        let response = self
            .client
            .generate_image(&request)
            .await
            .map_err(|e| e.to_string())?;

        let images: Vec<String> = response
            .data
            .iter()
            .filter_map(|d| d.display_url())
            .collect();
        let Some(first) = images.first().cloned() else {
            return Err("image generation returned no images".to_string());
        };
        let revised_prompt = response
            .data
            .first()
            .and_then(|d| d.revised_prompt.clone());

        let mut output = Payload::new();
        output.insert("images".to_string(), json!(images));
        output.insert("image_url".to_string(), json!(first));
        output.insert("prompt".to_string(), json!(prompt));
        output.insert("revised_prompt".to_string(), json!(revised_prompt));
        Ok(InvocationResult::succeeded(output, None))
    }

    async fn invoke_text(
        &self,
        agent: &Agent,
        input: &Payload,
    ) -> Result<InvocationResult, String> {
        let mut system = prompts::system_prompt(agent);
        if agent.rag_enabled() {
            let entries = self.retrieve(agent, input).await;
            if !entries.is_empty() {
                system.push_str(&prompts::rag_block(&entries));
            }
        }

        let request = ChatRequest::new(
            &agent.model,
            vec![
                ChatMessage::system(system),
                ChatMessage::user(prompts::input_message(input)),
            ],
        )
        .temperature(agent.effective_temperature())
        .max_tokens(agent.effective_max_tokens());

        if !agent.output_schema.is_empty() {
            let schema = prompts::output_json_schema(&agent.output_schema);
            let response = self
                .client
                .chat_structured(&request, &schema_name(agent), &schema)
                .await
                .map_err(|e| e.to_string())?;
            return Ok(InvocationResult::succeeded(
                into_payload(response.data),
                Some(&response.usage),
            ));
        }

        let response = self.client.chat(&request).await.map_err(|e| e.to_string())?;
        Ok(InvocationResult::succeeded(
            parse_free_form(response.content()),
            Some(&response.usage),
        ))
    }

    /// Scoped entries plus relevance hits, deduplicated by id and capped.
    /// Retrieval problems degrade to an empty list.
    async fn retrieve(&self, agent: &Agent, input: &Payload) -> Vec<KnowledgeEntry> {
        let Some(knowledge) = &self.knowledge else {
            return Vec::new();
        };
        let scope = agent.knowledge_scope();
        let query = prompts::retrieval_query(input);

        let (scoped, searched) = futures::future::join(
            knowledge.knowledge_for_agent(scope),
            knowledge.search(&query, Some(scope)),
        )
        .await;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for result in [scoped, searched] {
            match result {
                Ok(found) => {
                    for entry in found {
                        if seen.insert(entry.id.clone()) {
                            entries.push(entry);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(agent = %agent.id, error = %e, "knowledge retrieval failed");
                }
            }
        }
        entries.truncate(MAX_RAG_ENTRIES);
        tracing::debug!(agent = %agent.id, entries = entries.len(), "knowledge retrieved");
        entries
    }
}

fn schema_name(agent: &Agent) -> String {
    let cleaned: String = agent
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{}_output", cleaned.trim_matches('_').to_lowercase())
}

/// First of prompt/text/description, else the first string field, else the whole input.
fn image_prompt(input: &Payload) -> String {
    for key in ["prompt", "text", "description"] {
        if let Some(Value::String(s)) = input.get(key) {
            return s.clone();
        }
    }
    input
        .values()
        .find_map(|v| v.as_str().map(String::from))
        .unwrap_or_else(|| Value::Object(input.clone()).to_string())
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut wrapped = Payload::new();
            wrapped.insert("result".to_string(), other);
            wrapped
        }
    }
}

/// Parse a free-form reply as JSON, tolerating a surrounding code fence;
/// anything unparseable is wrapped as `{result: <text>}`.
fn parse_free_form(text: &str) -> Payload {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(unfenced) {
        Ok(value) => into_payload(value),
        Err(_) => into_payload(Value::String(text.to_string())),
    }
}

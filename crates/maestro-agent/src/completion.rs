// ABOUTME: Defines the CompletionClient trait, the text/image generation capability agents call.
// ABOUTME: Also defines the request/response shapes and CompletionError (what can go wrong).

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors raised by a completion provider. Every variant carries or implies
/// a human-readable message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompletionError {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Output constraint requested from the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseFormat {
    /// JSON matching `schema`; `strict` asks the provider to enforce it exactly.
    JsonSchema {
        name: String,
        schema: Value,
        strict: bool,
    },
}

fn type_names(schema: &Map<String, Value>) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Whether a schema can be sent in strict mode: every object closes its
/// properties and requires all of them, every array has typed items.
pub fn is_strict_schema(schema: &Value) -> bool {
    let Some(schema) = schema.as_object() else {
        return false;
    };
    let types = type_names(schema);
    if types.is_empty() {
        return false;
    }
    if types.contains(&"object") {
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return false;
        };
        if schema.get("additionalProperties") != Some(&Value::Bool(false)) {
            return false;
        }
        let required: HashSet<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !properties.keys().all(|k| required.contains(k.as_str())) {
            return false;
        }
        if !properties.values().all(is_strict_schema) {
            return false;
        }
    }
    if types.contains(&"array") && !schema.get("items").is_some_and(is_strict_schema) {
        return false;
    }
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub response_format: Option<ResponseFormat>,
}

impl ChatRequest {
    pub fn new(model: &str, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.to_string(),
            messages,
            temperature: maestro_core::agent::DEFAULT_TEMPERATURE,
            max_tokens: maestro_core::agent::DEFAULT_MAX_TOKENS,
            response_format: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Concatenated content of every user message, mainly for logs and tests.
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn system_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatResponse {
    /// A single-choice assistant response.
    pub fn text(content: &str, usage: Usage) -> Self {
        Self {
            choices: vec![Choice {
                message: ChatMessage::assistant(content),
            }],
            usage,
        }
    }

    /// Content of the first choice, or an empty string.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("")
    }
}

/// Already-parsed structured output from a schema-constrained call.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResponse {
    pub data: Value,
    pub usage: Usage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub style: String,
}

impl ImageRequest {
    pub fn new(model: &str, prompt: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            style: "vivid".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub url: Option<String>,
    pub b64_json: Option<String>,
    pub revised_prompt: Option<String>,
}

impl ImageData {
    /// A displayable reference: the URL, or a data URI for base64 payloads.
    pub fn display_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| self.b64_json.as_ref().map(|b| format!("data:image/png;base64,{}", b)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResponse {
    pub data: Vec<ImageData>,
}

/// Issue a `json_schema` chat request and parse the reply content as JSON.
/// Schemas that strict mode cannot express are sent non-strict.
pub async fn structured_via_chat<C>(
    client: &C,
    request: &ChatRequest,
    schema_name: &str,
    schema: &Value,
) -> Result<StructuredResponse, CompletionError>
where
    C: CompletionClient + ?Sized,
{
    let request = request.clone().response_format(ResponseFormat::JsonSchema {
        name: schema_name.to_string(),
        schema: schema.clone(),
        strict: is_strict_schema(schema),
    });
    let response = client.chat(&request).await?;
    let data = serde_json::from_str(response.content().trim()).map_err(|e| {
        CompletionError::InvalidResponse(format!("structured output is not JSON: {}", e))
    })?;
    Ok(StructuredResponse {
        data,
        usage: response.usage,
    })
}

/// The outbound text/image generation capability. Implementations signal
/// failure through `CompletionError`.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Free-form (or `response_format`-constrained) chat completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError>;

    /// Schema-constrained completion returning parsed structured data.
    async fn chat_structured(
        &self,
        request: &ChatRequest,
        schema_name: &str,
        schema: &Value,
    ) -> Result<StructuredResponse, CompletionError> {
        structured_via_chat(self, request, schema_name, schema).await
    }

    async fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> Result<ImageResponse, CompletionError> {
        Err(CompletionError::Unsupported(format!(
            "{} does not support image generation (model {})",
            self.provider_name(),
            request.model
        )))
    }

    /// Provider name for logging and display (e.g. "openai").
    fn provider_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::testing::ScriptedClient;
    use serde_json::json;

    #[test]
    fn strict_schema_requires_every_property_and_closed_objects() {
        let closed = json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "score": {"type": ["number", "null"]},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["summary", "score", "tags"],
            "additionalProperties": false
        });
        assert!(is_strict_schema(&closed));

        let mut partial = closed.clone();
        partial["required"] = json!(["summary"]);
        assert!(!is_strict_schema(&partial));

        let mut open_object = closed.clone();
        open_object["properties"]["meta"] = json!({"type": "object"});
        open_object["required"] = json!(["summary", "score", "tags", "meta"]);
        assert!(!is_strict_schema(&open_object));

        let mut untyped_items = closed;
        untyped_items["properties"]["tags"] = json!({"type": "array", "items": {}});
        assert!(!is_strict_schema(&untyped_items));
    }

    #[tokio::test]
    async fn structured_call_drops_strict_for_open_schemas() {
        let client = ScriptedClient::new().reply(r#"{"meta": {}}"#);
        let request = ChatRequest::new("gpt-4o", vec![ChatMessage::user("x")]);
        let schema = json!({
            "type": "object",
            "properties": {"meta": {"type": "object"}},
            "required": ["meta"],
            "additionalProperties": false
        });

        structured_via_chat(&client, &request, "out", &schema).await.unwrap();

        let sent = client.last_request().unwrap();
        assert!(matches!(
            sent.response_format,
            Some(ResponseFormat::JsonSchema { strict: false, .. })
        ));
    }

    #[test]
    fn image_data_prefers_url_then_base64() {
        let url = ImageData {
            url: Some("https://img/1.png".to_string()),
            ..ImageData::default()
        };
        assert_eq!(url.display_url().as_deref(), Some("https://img/1.png"));

        let b64 = ImageData {
            b64_json: Some("AAAA".to_string()),
            ..ImageData::default()
        };
        assert_eq!(
            b64.display_url().as_deref(),
            Some("data:image/png;base64,AAAA")
        );
    }

    #[test]
    fn completion_error_display() {
        assert!(
            CompletionError::ProviderError("boom".to_string())
                .to_string()
                .contains("boom")
        );
        assert_eq!(CompletionError::RateLimited.to_string(), "Rate limited");
    }
}

// ABOUTME: OpenAI-compatible HTTP adapter implementing the CompletionClient trait.
// ABOUTME: Translates ChatRequest/ImageRequest into Chat Completions and Images API calls.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::completion::{
    ChatRequest, ChatResponse, CompletionClient, CompletionError, ImageData, ImageRequest,
    ImageResponse, MessageRole, ResponseFormat, Usage,
};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api";

/// Adapter for any endpoint speaking the OpenAI Chat Completions protocol
/// (OpenAI itself, OpenRouter, local gateways).
pub struct OpenAICompatibleClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider: String,
    key_var: String,
}

impl OpenAICompatibleClient {
    /// Create a client for the given provider label and endpoint.
    /// `key_var` names the env variable the key came from, for error messages.
    pub fn new(provider: &str, api_key: String, base_url: String, key_var: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            provider: provider.to_string(),
            key_var: key_var.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the JSON request body for the Chat Completions API.
    pub fn build_chat_body(request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                };
                json!({"role": role, "content": m.content})
            })
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        if let Some(ResponseFormat::JsonSchema {
            name,
            schema,
            strict,
        }) = &request.response_format
        {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": name,
                    "strict": strict,
                    "schema": schema
                }
            });
        }

        body
    }

    pub fn build_image_body(request: &ImageRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "prompt": request.prompt,
            "n": 1,
            "size": request.size,
        });
        // Only the dall-e-3 family understands quality/style.
        if request.model.contains("dall-e-3") {
            body["quality"] = json!(request.quality);
            body["style"] = json!(request.style);
        }
        body
    }

    /// Parse a Chat Completions response body.
    pub fn parse_chat_response(body: &Value) -> Result<ChatResponse, CompletionError> {
        let choices = body
            .get("choices")
            .and_then(|c| c.as_array())
            .ok_or_else(|| {
                CompletionError::InvalidResponse("missing choices array in response".to_string())
            })?;

        let first = choices
            .first()
            .ok_or_else(|| CompletionError::InvalidResponse("empty choices array".to_string()))?;

        let content = first
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("");

        Ok(ChatResponse::text(content, parse_usage(body.get("usage"))))
    }

    pub fn parse_image_response(body: &Value) -> Result<ImageResponse, CompletionError> {
        let data = body
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| {
                CompletionError::InvalidResponse("missing data array in image response".to_string())
            })?;

        let images = data
            .iter()
            .map(|item| ImageData {
                url: item.get("url").and_then(|u| u.as_str()).map(String::from),
                b64_json: item.get("b64_json").and_then(|b| b.as_str()).map(String::from),
                revised_prompt: item
                    .get("revised_prompt")
                    .and_then(|r| r.as_str())
                    .map(String::from),
            })
            .collect();

        Ok(ImageResponse { data: images })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, CompletionError> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| CompletionError::ProviderError(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CompletionError::ProviderError(format!(
                "Unauthorized: check {}",
                self.key_var
            )));
        }

        if status.is_server_error() {
            return Err(CompletionError::ProviderError(format!(
                "Server error: {}",
                status
            )));
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CompletionError::ProviderError(format!(
                "API error {}: {}",
                status, error_body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(format!("failed to parse JSON: {}", e)))
    }
}

fn parse_usage(usage: Option<&Value>) -> Usage {
    let Some(usage) = usage else {
        return Usage::default();
    };
    let tokens = |key: &str| usage.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
    let prompt_tokens = tokens("prompt_tokens");
    let completion_tokens = tokens("completion_tokens");
    let total_tokens = usage
        .get("total_tokens")
        .and_then(|v| v.as_u64())
        .unwrap_or(prompt_tokens + completion_tokens);
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
        cost: usage.get("cost").and_then(|c| c.as_f64()),
    }
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        let body = Self::build_chat_body(request);
        tracing::debug!(
            provider = %self.provider,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion"
        );
        let response_body = self.post("/v1/chat/completions", &body).await?;
        Self::parse_chat_response(&response_body)
    }

    async fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> Result<ImageResponse, CompletionError> {
        let body = Self::build_image_body(request);
        let response_body = self.post("/v1/images/generations", &body).await?;
        Self::parse_image_response(&response_body)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChatMessage;

    fn test_client() -> OpenAICompatibleClient {
        OpenAICompatibleClient::new(
            "openai",
            "test-key".to_string(),
            "https://api.openai.com/".to_string(),
            "OPENAI_API_KEY",
        )
    }

    #[test]
    fn client_creation_trims_base_url() {
        let client = test_client();
        assert_eq!(client.provider_name(), "openai");
        assert_eq!(client.base_url(), "https://api.openai.com");
        assert_eq!(client.api_key, "test-key");
    }

    #[test]
    fn builds_free_form_chat_body() {
        let request = ChatRequest::new(
            "gpt-4o",
            vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
        )
        .temperature(0.2)
        .max_tokens(100);

        let body = OpenAICompatibleClient::build_chat_body(&request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 100);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn builds_schema_response_format() {
        let schema = json!({"type": "object", "properties": {"a": {"type": "string"}}});
        let format = |strict| ResponseFormat::JsonSchema {
            name: "output".to_string(),
            schema: schema.clone(),
            strict,
        };
        let request = ChatRequest::new("gpt-4o", vec![ChatMessage::user("x")]);

        let strict = OpenAICompatibleClient::build_chat_body(
            &request.clone().response_format(format(true)),
        );
        assert_eq!(strict["response_format"]["type"], "json_schema");
        assert_eq!(strict["response_format"]["json_schema"]["strict"], true);
        assert_eq!(strict["response_format"]["json_schema"]["schema"], schema);

        let lenient =
            OpenAICompatibleClient::build_chat_body(&request.response_format(format(false)));
        assert_eq!(lenient["response_format"]["json_schema"]["strict"], false);
    }

    #[test]
    fn optional_output_fields_produce_a_strict_request() {
        use maestro_core::{FieldSchema, FieldType};

        let fields = vec![
            FieldSchema::new("summary", FieldType::String, true),
            FieldSchema::new("score", FieldType::Number, false),
        ];
        let schema = crate::prompts::output_json_schema(&fields);
        let request = ChatRequest::new("gpt-4o", vec![ChatMessage::user("x")]).response_format(
            ResponseFormat::JsonSchema {
                name: "output".to_string(),
                schema: schema.clone(),
                strict: crate::completion::is_strict_schema(&schema),
            },
        );

        let body = OpenAICompatibleClient::build_chat_body(&request);

        let sent = &body["response_format"]["json_schema"];
        assert_eq!(sent["strict"], true);
        assert_eq!(sent["schema"]["required"], json!(["summary", "score"]));
        assert_eq!(
            sent["schema"]["properties"]["score"]["type"],
            json!(["number", "null"])
        );
    }

    #[test]
    fn image_body_adds_quality_only_for_dalle3() {
        let dalle3 =
            OpenAICompatibleClient::build_image_body(&ImageRequest::new("dall-e-3", "a cat"));
        assert_eq!(dalle3["quality"], "standard");
        assert_eq!(dalle3["style"], "vivid");

        let other =
            OpenAICompatibleClient::build_image_body(&ImageRequest::new("flux-schnell", "a cat"));
        assert!(other.get("quality").is_none());
    }

    #[test]
    fn parses_chat_response_with_usage_and_cost() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "{\"a\": 1}"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15, "cost": 0.002}
        });

        let response = OpenAICompatibleClient::parse_chat_response(&body).unwrap();

        assert_eq!(response.content(), "{\"a\": 1}");
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(response.usage.cost, Some(0.002));
    }

    #[test]
    fn rejects_response_without_choices() {
        let result = OpenAICompatibleClient::parse_chat_response(&json!({"error": "nope"}));
        assert!(matches!(result, Err(CompletionError::InvalidResponse(_))));

        let empty = OpenAICompatibleClient::parse_chat_response(&json!({"choices": []}));
        assert!(empty.unwrap_err().to_string().contains("empty choices"));
    }

    #[test]
    fn parses_image_response() {
        let body = json!({
            "data": [{"url": "https://img/1.png", "revised_prompt": "a fluffy cat"}]
        });
        let response = OpenAICompatibleClient::parse_image_response(&body).unwrap();
        assert_eq!(response.data.len(), 1);
        assert_eq!(response.data[0].url.as_deref(), Some("https://img/1.png"));
        assert_eq!(response.data[0].revised_prompt.as_deref(), Some("a fluffy cat"));
    }

    #[tokio::test]
    #[cfg(feature = "live-test")]
    async fn openai_chat_live() {
        let key = std::env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY must be set");
        let client = OpenAICompatibleClient::new(
            "openai",
            key,
            DEFAULT_BASE_URL.to_string(),
            "OPENAI_API_KEY",
        );
        let request = ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("Say hi")]);
        let result = client.chat(&request).await;
        assert!(result.is_ok(), "live test failed: {:?}", result.err());
    }
}

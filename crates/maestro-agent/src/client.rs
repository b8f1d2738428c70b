// ABOUTME: Factory function for creating completion clients from the environment.
// ABOUTME: Resolves a provider name into a configured Arc<dyn CompletionClient>.

use std::env;
use std::sync::Arc;

use crate::completion::CompletionClient;
use crate::providers::OpenAICompatibleClient;
use crate::providers::openai::{DEFAULT_BASE_URL, OPENROUTER_BASE_URL};

/// Create a completion client for the given provider name.
///
/// Supported providers:
/// - `openai`: OPENAI_API_KEY, optional OPENAI_BASE_URL
/// - `openrouter`: OPENROUTER_API_KEY, optional OPENROUTER_BASE_URL
pub fn create_completion_client(
    provider: &str,
) -> Result<Arc<dyn CompletionClient>, anyhow::Error> {
    let (key_var, url_var, default_url) = match provider {
        "openai" => ("OPENAI_API_KEY", "OPENAI_BASE_URL", DEFAULT_BASE_URL),
        "openrouter" => ("OPENROUTER_API_KEY", "OPENROUTER_BASE_URL", OPENROUTER_BASE_URL),
        unknown => return Err(anyhow::anyhow!("unsupported completion provider: {}", unknown)),
    };

    let api_key = env::var(key_var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", key_var))?;
    let base_url = env::var(url_var).unwrap_or_else(|_| default_url.to_string());

    tracing::info!(provider, base_url = %base_url, "completion client configured");
    Ok(Arc::new(OpenAICompatibleClient::new(
        provider, api_key, base_url, key_var,
    )))
}

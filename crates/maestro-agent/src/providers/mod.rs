// ABOUTME: Provider module aggregating the LLM HTTP adapters.
// ABOUTME: Each sub-module implements CompletionClient for a specific API family.

pub mod openai;

pub use openai::OpenAICompatibleClient;

// ABOUTME: Test utilities for maestro, including a scripted stub completion client.
// ABOUTME: Used in tests to simulate replies, failures, and hung calls without real API calls.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::completion::{
    ChatRequest, ChatResponse, CompletionClient, CompletionError, ImageData, ImageRequest,
    ImageResponse, StructuredResponse, Usage, structured_via_chat,
};

/// What the stub does for one call.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    Reply(String),
    Fail(String),
    /// Never resolve.
    Hang,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Responder = Box<dyn Fn(&ChatRequest) -> ScriptedReply + Send + Sync>;

/// A stub completion client driven by a script.
///
/// Each chat call pops the next scripted reply; once the script is empty the
/// responder (if any) decides, and otherwise the fallback reply is used.
/// Every request is recorded for later assertions.
pub struct ScriptedClient {
    script: Mutex<VecDeque<ScriptedReply>>,
    responder: Option<Responder>,
    fallback: ScriptedReply,
    structured_error: Option<String>,
    image: Option<ImageData>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedClient {
    /// Tokens reported for every successful call.
    pub const TOKENS_PER_CALL: u64 = 10;

    /// A stub that answers every call with `{"status": "done"}`.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: None,
            fallback: ScriptedReply::Reply("{\"status\": \"done\"}".to_string()),
            structured_error: None,
            image: None,
            delay: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Queue one reply.
    pub fn reply(self, text: &str) -> Self {
        self.push(ScriptedReply::Reply(text.to_string()))
    }

    /// Queue one failure.
    pub fn fail(self, message: &str) -> Self {
        self.push(ScriptedReply::Fail(message.to_string()))
    }

    /// Queue `times` failures.
    pub fn fail_times(mut self, times: usize, message: &str) -> Self {
        for _ in 0..times {
            self = self.fail(message);
        }
        self
    }

    pub fn always_fail(mut self, message: &str) -> Self {
        self.fallback = ScriptedReply::Fail(message.to_string());
        self
    }

    /// Every unscripted call never resolves.
    pub fn hang(mut self) -> Self {
        self.fallback = ScriptedReply::Hang;
        self
    }

    /// Decide unscripted replies from the request itself.
    pub fn respond_with<F>(mut self, responder: F) -> Self
    where
        F: Fn(&ChatRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Make schema-constrained calls fail, as a provider without json_schema support would.
    pub fn reject_structured(mut self, message: &str) -> Self {
        self.structured_error = Some(message.to_string());
        self
    }

    /// Answer image generation with a single image.
    pub fn image(mut self, url: &str, revised_prompt: Option<&str>) -> Self {
        self.image = Some(ImageData {
            url: Some(url.to_string()),
            b64_json: None,
            revised_prompt: revised_prompt.map(String::from),
        });
        self
    }

    /// Sleep this long inside every chat call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    pub fn last_request(&self) -> Option<ChatRequest> {
        lock(&self.requests).last().cloned()
    }

    fn push(self, reply: ScriptedReply) -> Self {
        lock(&self.script).push_back(reply);
        self
    }

    fn next_reply(&self, request: &ChatRequest) -> ScriptedReply {
        if let Some(reply) = lock(&self.script).pop_front() {
            return reply;
        }
        match &self.responder {
            Some(responder) => responder(request),
            None => self.fallback.clone(),
        }
    }

    fn usage() -> Usage {
        Usage {
            prompt_tokens: 6,
            completion_tokens: 4,
            total_tokens: Self::TOKENS_PER_CALL,
            cost: None,
        }
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());
        let reply = self.next_reply(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            ScriptedReply::Reply(text) => Ok(ChatResponse::text(&text, Self::usage())),
            ScriptedReply::Fail(message) => Err(CompletionError::ProviderError(message)),
            ScriptedReply::Hang => futures::future::pending().await,
        }
    }

    async fn chat_structured(
        &self,
        request: &ChatRequest,
        schema_name: &str,
        schema: &Value,
    ) -> Result<StructuredResponse, CompletionError> {
        if let Some(message) = &self.structured_error {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Err(CompletionError::Unsupported(message.clone()));
        }
        structured_via_chat(self, request, schema_name, schema).await
    }

    async fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> Result<ImageResponse, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.image {
            Some(image) => Ok(ImageResponse {
                data: vec![image.clone()],
            }),
            None => Err(CompletionError::Unsupported(format!(
                "no scripted image for {}",
                request.model
            ))),
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

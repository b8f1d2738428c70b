// ABOUTME: Agent layer for maestro: the completion capability and specialist execution.
// ABOUTME: Defines the CompletionClient and KnowledgeBase seams plus the SpecialistInvoker.

pub mod client;
pub mod completion;
pub mod invoker;
pub mod knowledge;
pub mod prompts;
pub mod providers;
pub mod testing;

pub use client::create_completion_client;
pub use completion::{
    ChatMessage, ChatRequest, ChatResponse, Choice, CompletionClient, CompletionError, ImageData,
    ImageRequest, ImageResponse, MessageRole, ResponseFormat, StructuredResponse, Usage,
};
pub use invoker::{InvocationResult, SpecialistInvoker, input_problems, is_image_model};
pub use knowledge::{InMemoryKnowledgeBase, KnowledgeBase, KnowledgeEntry, KnowledgeError};

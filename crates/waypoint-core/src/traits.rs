use futures::future::BoxFuture;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// LLM client: one request, one complete response.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and wait for the full response.
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>>;
}

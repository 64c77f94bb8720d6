pub mod openai;
pub mod retry;

use std::sync::Arc;

use waypoint_core::config::{AppConfig, ModelConfig};
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::LlmClient;

pub use openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name.
///
/// Every supported provider speaks the OpenAI chat-completions dialect;
/// they differ only in `base_url`.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "openai" | "deepseek" | "ollama" | "groq" | "openrouter" | "together" => {
            Ok(Box::new(OpenAiClient::new()))
        }
        other => Err(WaypointError::UnsupportedProvider(other.to_string())),
    }
}

/// Build the client for an application config, wrapping it with retry and
/// fallback handling when either is configured.
pub fn client_for(config: &AppConfig) -> Result<Arc<dyn LlmClient>> {
    let primary = create_client(&config.model)?;
    if config.fallback_models.is_empty() && config.model.retry.is_none() {
        return Ok(Arc::from(primary));
    }

    let fallbacks = config
        .fallback_models
        .iter()
        .map(|mc| Ok((mc.clone(), create_client(mc)?)))
        .collect::<Result<Vec<_>>>()?;
    let retry_config = config.model.retry.clone().unwrap_or_default();

    Ok(Arc::new(RetryingClient::new(primary, fallbacks, retry_config)))
}

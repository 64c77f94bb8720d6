use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{info, warn};

use waypoint_core::config::{ModelConfig, RetryConfig};
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::LlmClient;
use waypoint_core::types::*;

/// Wraps a primary model with backoff retries, then tries each fallback
/// model once.
///
/// Only transient provider failures are retried: rate limiting, server
/// errors, timeouts and refused connections. Anything else (a bad request,
/// bad credentials, an unparseable reply) goes straight to the fallbacks.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }

    async fn call_primary(
        &self,
        config: &ModelConfig,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelResponse> {
        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;
        loop {
            let err = match self.primary.chat(config, messages.to_vec(), tools).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };
            if attempt >= max_retries || !is_transient(&err) {
                return Err(err);
            }

            let backoff = calculate_backoff(attempt, &self.retry_config);
            attempt += 1;
            warn!(
                attempt,
                max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %err,
                "Retrying model request"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn call_fallbacks(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Option<ModelResponse> {
        for (fb_config, fb_client) in &self.fallbacks {
            match fb_client.chat(fb_config, messages.to_vec(), tools).await {
                Ok(response) => {
                    info!(
                        model = %fb_config.model_id,
                        provider = %fb_config.provider,
                        "Answered by fallback model"
                    );
                    return Some(response);
                }
                Err(e) => {
                    warn!(model = %fb_config.model_id, error = %e, "Fallback model failed");
                }
            }
        }
        None
    }
}

/// Whether another attempt at the same provider could succeed.
pub(crate) fn is_transient(e: &WaypointError) -> bool {
    match e {
        WaypointError::LlmHttp { status, .. } => *status == 429 || (500..=599).contains(status),
        WaypointError::LlmTimeout(_) | WaypointError::LlmConnection(_) => true,
        _ => false,
    }
}

pub(crate) fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let err = match self.call_primary(&config, &messages, &tools).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if self.fallbacks.is_empty() {
                return Err(err);
            }
            info!(model = %config.model_id, error = %err, "Primary model failed, trying fallbacks");
            match self.call_fallbacks(&messages, &tools).await {
                Some(response) => Ok(response),
                None => Err(err),
            }
        })
    }
}

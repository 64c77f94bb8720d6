//! Shared test helpers: a scripted [`LlmClient`] and config fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;

use waypoint_core::config::{AppConfig, EnvState, ModelConfig};
use waypoint_core::error::{Result, WaypointError};
use waypoint_core::traits::LlmClient;
use waypoint_core::types::*;

/// One canned model reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Plain assistant text.
    Text(String),
    /// A single tool call.
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    /// Wait before producing the inner reply.
    Delayed(Duration, Box<Scripted>),
    /// Fail the request with `LlmRequest(msg)`.
    Error(String),
    /// Fail the request with a provider HTTP status.
    Status(u16, String),
    /// Fail the request as if the provider could not be reached.
    Offline,
}

impl Scripted {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    pub fn tool(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self::ToolCall {
            name: name.into(),
            input,
        }
    }

    pub fn delayed(ms: u64, inner: Scripted) -> Self {
        Self::Delayed(Duration::from_millis(ms), Box::new(inner))
    }
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> Scripted + Send + Sync>;

/// Shared view of how many requests a [`ScriptedLlm`] has served.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An [`LlmClient`] that replays a fixed script, or asks a responder
/// closure once the script runs out.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    responder: Option<Responder>,
    calls: CallCounter,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    usage: TokenUsage,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            responder: None,
            calls: CallCounter::default(),
            requests: Arc::new(Mutex::new(Vec::new())),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
        }
    }

    /// Reply to every request by inspecting the messages sent.
    pub fn responding(f: impl Fn(&[ChatMessage]) -> Scripted + Send + Sync + 'static) -> Self {
        let mut llm = Self::new(vec![]);
        llm.responder = Some(Box::new(f));
        llm
    }

    /// Token usage reported on every successful reply.
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = TokenUsage {
            input_tokens,
            output_tokens,
        };
        self
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Handle on every message list received so far, in call order.
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<ChatMessage>>>> {
        self.requests.clone()
    }

    fn next_reply(&self, messages: &[ChatMessage]) -> Scripted {
        let queued = self.script.lock().ok().and_then(|mut q| q.pop_front());
        match (queued, &self.responder) {
            (Some(reply), _) => reply,
            (None, Some(responder)) => responder(messages),
            (None, None) => Scripted::Error("script exhausted".into()),
        }
    }
}

/// Last user text in a request, ignoring tool results.
pub fn last_user_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text())
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

impl LlmClient for ScriptedLlm {
    fn chat(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        Box::pin(async move {
            let n = self.calls.0.fetch_add(1, Ordering::SeqCst) + 1;
            let mut reply = self.next_reply(&messages);
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(messages);
            }

            while let Scripted::Delayed(delay, inner) = reply {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }

            let (content, stop_reason) = match reply {
                Scripted::Text(text) => (vec![ContentBlock::Text { text }], StopReason::EndTurn),
                Scripted::ToolCall { name, input } => (
                    vec![ContentBlock::ToolUse {
                        id: format!("call_{}", n),
                        name,
                        input,
                    }],
                    StopReason::ToolUse,
                ),
                Scripted::Error(msg) => return Err(WaypointError::LlmRequest(msg)),
                Scripted::Status(status, body) => {
                    return Err(WaypointError::LlmHttp { status, body })
                }
                Scripted::Offline => {
                    return Err(WaypointError::LlmConnection("connection refused".into()))
                }
                Scripted::Delayed(..) => unreachable!("delays are unwrapped above"),
            };

            Ok(ModelResponse {
                message: ChatMessage {
                    role: Role::Assistant,
                    content,
                    timestamp: Some(Utc::now()),
                },
                stop_reason,
                usage: self.usage,
                model_name: Some("scripted".to_string()),
            })
        })
    }
}

/// Model config pointing nowhere; only scripted clients should see it.
pub fn test_model_config() -> ModelConfig {
    let mut config = ModelConfig::new("test-model");
    config.api_key = Some("sk-test".into());
    config
}

/// Test-profile config with no variables set.
pub fn test_app_config() -> AppConfig {
    AppConfig::from_lookup(EnvState::Test, |_| None)
}

/// Parse a TOML config snippet, panicking on error.
pub fn config_from_toml(toml_str: &str) -> AppConfig {
    toml::from_str(toml_str).expect("valid test config")
}

/// Temporary directory for history files and databases.
pub fn temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}

use std::sync::Mutex;

use futures::future::BoxFuture;
use tracing::debug;

use waypoint_core::types::{ChatMessage, ContentBlock, Role};

use crate::agent::{Agent, RunOptions};
use crate::error::AgentError;
use crate::usage::{Usage, UsageLimits};

/// Rewrites the message list just before it is sent to the model.
///
/// The stored history is left alone; only the outgoing request changes.
/// Processors that call a model themselves must count those requests
/// against `usage` and `limits`, which belong to the run being processed.
pub trait HistoryProcessor: Send + Sync + 'static {
    fn process<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        usage: &'a Usage,
        limits: UsageLimits,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, AgentError>>;
}

/// Keep only the last `n` messages, plus a leading system message if any.
///
/// A tool result is never kept without the assistant message that asked
/// for it, so slightly more than `n` messages may survive.
pub struct KeepRecent(pub usize);

impl HistoryProcessor for KeepRecent {
    fn process<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        _usage: &'a Usage,
        _limits: UsageLimits,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, AgentError>> {
        Box::pin(async move { Ok(keep_recent(messages, self.0)) })
    }
}

fn keep_recent(mut messages: Vec<ChatMessage>, n: usize) -> Vec<ChatMessage> {
    if messages.len() <= n {
        return messages;
    }
    let system = match messages.first() {
        Some(first) if first.role == Role::System => Some(messages.remove(0)),
        _ => None,
    };
    let cut = pair_boundary(&messages, messages.len().saturating_sub(n));
    let mut kept: Vec<ChatMessage> = system.into_iter().collect();
    kept.extend(messages.drain(cut..));
    kept
}

fn is_tool_result(message: &ChatMessage) -> bool {
    message
        .content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
}

/// Move `cut` back until `messages[cut..]` does not open with a tool result.
fn pair_boundary(messages: &[ChatMessage], mut cut: usize) -> usize {
    while cut > 0 && messages.get(cut).is_some_and(is_tool_result) {
        cut -= 1;
    }
    cut
}

const SUMMARIZE_PROMPT: &str = "Summarize this conversation, omitting small talk and unrelated topics. \
Focus on the technical discussion and next steps.";

type SummaryCache = Option<(Vec<ChatMessage>, Vec<ChatMessage>)>;

/// Replace the oldest `threshold` messages with a summary written by a
/// (typically cheaper) agent, keeping the summary and the last exchange.
///
/// The summary of a prefix is reused while the prefix stays the same, so
/// tool rounds and retries within one run do not re-summarize it.
pub struct SummarizeOld {
    pub threshold: usize,
    summarizer: Agent<(), String>,
    cache: Mutex<SummaryCache>,
}

impl SummarizeOld {
    pub fn new(summarizer: Agent<(), String>) -> Self {
        Self {
            threshold: 10,
            summarizer,
            cache: Mutex::new(None),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    fn cached(&self, prefix: &[ChatMessage]) -> Option<Vec<ChatMessage>> {
        let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache
            .as_ref()
            .filter(|(key, _)| key.as_slice() == prefix)
            .map(|(_, summary)| summary.clone())
    }

    async fn summarize(
        &self,
        prefix: &[ChatMessage],
        usage: &Usage,
        limits: UsageLimits,
    ) -> Result<Vec<ChatMessage>, AgentError> {
        if let Some(summary) = self.cached(prefix) {
            debug!(summarized = prefix.len(), "Reusing summary of old messages");
            return Ok(summary);
        }

        debug!(summarized = prefix.len(), "Summarizing old messages");
        let options = RunOptions {
            history: prefix,
            usage: Some(usage),
            limits,
        };
        let run = self.summarizer.run(SUMMARIZE_PROMPT, &(), options).await?;
        let summary = run.new_messages().to_vec();

        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((prefix.to_vec(), summary.clone()));
        Ok(summary)
    }
}

impl HistoryProcessor for SummarizeOld {
    fn process<'a>(
        &'a self,
        messages: Vec<ChatMessage>,
        usage: &'a Usage,
        limits: UsageLimits,
    ) -> BoxFuture<'a, Result<Vec<ChatMessage>, AgentError>> {
        Box::pin(async move {
            if messages.len() <= self.threshold {
                return Ok(messages);
            }

            let tail = pair_boundary(&messages, messages.len() - 1);
            let end = pair_boundary(&messages, self.threshold.min(tail));
            if end == 0 {
                return Ok(messages);
            }

            let mut processed = self.summarize(&messages[..end], usage, limits).await?;
            processed.extend_from_slice(&messages[tail..]);
            Ok(processed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use waypoint_test_utils::{test_model_config, Scripted, ScriptedLlm};

    fn conversation(n: usize) -> Vec<ChatMessage> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    ChatMessage::user(format!("question {}", i))
                } else {
                    ChatMessage::assistant_text(format!("answer {}", i))
                }
            })
            .collect()
    }

    fn tool_call(id: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse {
                id: id.into(),
                name: "get_flights".into(),
                input: serde_json::json!({}),
            }],
            timestamp: None,
        }
    }

    fn tool_reply(id: &str) -> ChatMessage {
        ChatMessage::tool_results(vec![ContentBlock::ToolResult {
            tool_use_id: id.into(),
            content: "[]".into(),
            is_error: false,
        }])
    }

    async fn unlimited(
        processor: &impl HistoryProcessor,
        messages: Vec<ChatMessage>,
    ) -> Vec<ChatMessage> {
        processor
            .process(messages, &Usage::new(), UsageLimits::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_keep_recent_trims_and_keeps_system() {
        let mut messages = vec![ChatMessage::system("Be concise.")];
        messages.extend(conversation(8));

        let kept = unlimited(&KeepRecent(5), messages).await;
        assert_eq!(kept.len(), 6);
        assert_eq!(kept[0].role, Role::System);
        assert_eq!(kept[1].text(), "answer 3");
        assert_eq!(kept[5].text(), "answer 7");
    }

    #[tokio::test]
    async fn test_keep_recent_short_history_unchanged() {
        let messages = conversation(3);
        let kept = unlimited(&KeepRecent(5), messages.clone()).await;
        assert_eq!(kept, messages);
    }

    #[tokio::test]
    async fn test_keep_recent_keeps_tool_call_with_its_result() {
        let mut messages = conversation(4);
        messages.push(tool_call("call_1"));
        messages.push(tool_reply("call_1"));
        messages.push(ChatMessage::assistant_text("No flights today."));

        // A plain cut at 2 would start at the tool result
        let kept = unlimited(&KeepRecent(2), messages).await;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0], tool_call("call_1"));
        assert!(is_tool_result(&kept[1]));
    }

    #[tokio::test]
    async fn test_summarize_old_replaces_prefix() {
        let llm = ScriptedLlm::new(vec![Scripted::text("We discussed questions 0-9.")]);
        let requests = llm.requests();
        let summarizer = Agent::<(), String>::new(Arc::new(llm), test_model_config());
        let processor = SummarizeOld::new(summarizer);

        let processed = unlimited(&processor, conversation(12)).await;

        // Summary request + summary reply + last message
        assert_eq!(processed.len(), 3);
        assert_eq!(processed[1].text(), "We discussed questions 0-9.");
        assert_eq!(processed[2].text(), "answer 11");

        let sent = &requests.lock().unwrap()[0];
        assert_eq!(sent.len(), 11);
        assert_eq!(sent[9].text(), "answer 9");
    }

    #[tokio::test]
    async fn test_summarize_old_below_threshold_skips_model() {
        let llm = ScriptedLlm::new(vec![]);
        let calls = llm.call_counter();
        let processor = SummarizeOld::new(Agent::new(Arc::new(llm), test_model_config()));

        let processed = unlimited(&processor, conversation(10)).await;
        assert_eq!(processed.len(), 10);
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn test_summarize_old_reuses_summary_and_keeps_tool_pair() {
        let llm = ScriptedLlm::new(vec![Scripted::text("Earlier: flight questions.")]);
        let calls = llm.call_counter();
        let processor =
            SummarizeOld::new(Agent::new(Arc::new(llm), test_model_config())).with_threshold(2);

        let mut messages = conversation(5);
        let first = unlimited(&processor, messages.clone()).await;
        assert_eq!(first.len(), 3);

        messages.push(tool_call("call_1"));
        messages.push(tool_reply("call_1"));
        let second = unlimited(&processor, messages).await;

        // Same prefix, so no second summary request
        assert_eq!(calls.get(), 1);
        assert_eq!(second.len(), 4);
        assert_eq!(second[1].text(), "Earlier: flight questions.");
        assert_eq!(second[2], tool_call("call_1"));
        assert!(is_tool_result(&second[3]));
    }

    #[tokio::test]
    async fn test_summarize_old_counts_against_budget() {
        let llm = ScriptedLlm::new(vec![Scripted::text("summary")]);
        let calls = llm.call_counter();
        let processor =
            SummarizeOld::new(Agent::new(Arc::new(llm), test_model_config())).with_threshold(2);

        let usage = Usage::new();
        usage.check_before_request(&UsageLimits::default()).unwrap();
        let err = processor
            .process(conversation(4), &usage, UsageLimits::requests(1))
            .await
            .unwrap_err();

        assert!(err.is_limit_exceeded());
        assert_eq!(calls.get(), 0);
        assert_eq!(usage.requests(), 1);
    }
}

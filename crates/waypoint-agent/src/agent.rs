use std::marker::PhantomData;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waypoint_core::config::ModelConfig;
use waypoint_core::traits::LlmClient;
use waypoint_core::types::{ChatMessage, ContentBlock, ToolDefinition};

use crate::error::AgentError;
use crate::history::HistoryProcessor;
use crate::output::OutputCleaner;
use crate::tool::{FnValidator, ModelRetry, ResultValidator, RunContext, Tool, ToolError};
use crate::usage::{Usage, UsageLimits};

type DynamicPrompt<D> = Arc<dyn Fn(&D) -> String + Send + Sync>;

/// One kind of model call with a typed output.
///
/// `D` is the deps type handed to tools, validators and dynamic prompts.
/// `O` is the output: `String` outputs are taken from the reply text as-is,
/// anything else is requested as JSON matching `O`'s schema and parsed.
pub struct Agent<D, O> {
    llm: Arc<dyn LlmClient>,
    model: ModelConfig,
    system_prompt: String,
    dynamic_prompts: Vec<DynamicPrompt<D>>,
    tools: Vec<Box<dyn Tool<D>>>,
    validators: Vec<Box<dyn ResultValidator<D, O>>>,
    history_processors: Vec<Box<dyn HistoryProcessor>>,
    retries: u32,
    _output: PhantomData<fn() -> O>,
}

/// Per-run inputs besides the prompt and deps.
#[derive(Default, Clone, Copy)]
pub struct RunOptions<'a> {
    /// Earlier messages to continue from. The system prompt is only added
    /// when this is empty.
    pub history: &'a [ChatMessage],
    /// Shared counter when several runs draw on one budget.
    pub usage: Option<&'a Usage>,
    pub limits: UsageLimits,
}

/// The outcome of a successful run.
#[derive(Debug, Clone)]
pub struct AgentRun<O> {
    pub run_id: Uuid,
    pub output: O,
    messages: Vec<ChatMessage>,
    new_start: usize,
}

impl<O> AgentRun<O> {
    /// The full conversation, including any history passed in.
    pub fn all_messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Only the messages produced by this run.
    pub fn new_messages(&self) -> &[ChatMessage] {
        &self.messages[self.new_start..]
    }
}

enum OutputMode {
    Text,
    Json(serde_json::Value),
}

impl<D, O> Agent<D, O>
where
    D: Send + Sync + 'static,
    O: DeserializeOwned + JsonSchema + Send + Sync + 'static,
{
    pub fn new(llm: Arc<dyn LlmClient>, model: ModelConfig) -> Self {
        Self {
            llm,
            model,
            system_prompt: String::new(),
            dynamic_prompts: vec![],
            tools: vec![],
            validators: vec![],
            history_processors: vec![],
            retries: 1,
            _output: PhantomData,
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Add a system prompt section computed from the deps at run time.
    pub fn dynamic_prompt(mut self, f: impl Fn(&D) -> String + Send + Sync + 'static) -> Self {
        self.dynamic_prompts.push(Arc::new(f));
        self
    }

    pub fn tool(mut self, tool: impl Tool<D>) -> Self {
        self.tools.push(Box::new(tool));
        self
    }

    pub fn validator(mut self, validator: impl ResultValidator<D, O>) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Add a synchronous validator over the deps and the parsed output.
    pub fn validate_with(
        self,
        f: impl Fn(&D, &O) -> Result<(), ModelRetry> + Send + Sync + 'static,
    ) -> Self {
        self.validator(FnValidator(f))
    }

    pub fn history_processor(mut self, processor: impl HistoryProcessor) -> Self {
        self.history_processors.push(Box::new(processor));
        self
    }

    /// How many re-prompts a run may spend on bad output or tool retries.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    fn output_mode() -> OutputMode {
        let schema = serde_json::to_value(schemars::schema_for!(O)).unwrap_or_default();
        if schema.get("type").and_then(|t| t.as_str()) == Some("string") {
            OutputMode::Text
        } else {
            OutputMode::Json(schema)
        }
    }

    fn build_system_prompt(&self, deps: &D, mode: &OutputMode) -> String {
        let mut sections: Vec<String> = Vec::new();
        if !self.system_prompt.is_empty() {
            sections.push(self.system_prompt.clone());
        }
        sections.extend(self.dynamic_prompts.iter().map(|f| f(deps)));
        if let OutputMode::Json(schema) = mode {
            sections.push(format!(
                "Respond only with a JSON value matching this JSON schema, without any other text:\n{}",
                schema
            ));
        }
        sections.join("\n\n")
    }

    fn parse_output(mode: &OutputMode, text: &str) -> Result<O, String> {
        match mode {
            OutputMode::Text => serde_json::from_value(serde_json::Value::String(text.to_string()))
                .map_err(|e| e.to_string()),
            OutputMode::Json(_) => OutputCleaner::parse_json(text),
        }
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Spend one retry, or fail once the ceiling is passed.
    fn spend_retry(&self, used: u32, issue: String) -> Result<u32, AgentError> {
        let used = used + 1;
        if used > self.retries {
            return Err(AgentError::OutputRetriesExceeded {
                retries: self.retries,
                last_issue: issue,
            });
        }
        warn!(retry = used, max = self.retries, issue = %issue, "Re-prompting model");
        Ok(used)
    }

    /// Run the agent to a validated output.
    ///
    /// Every model request is counted against `options.limits` before it is
    /// sent, so an exhausted budget fails without issuing the request.
    pub async fn run(
        &self,
        prompt: &str,
        deps: &D,
        options: RunOptions<'_>,
    ) -> Result<AgentRun<O>, AgentError> {
        let run_id = Uuid::new_v4();
        let local_usage = Usage::new();
        let usage = options.usage.unwrap_or(&local_usage);
        let mode = Self::output_mode();
        let tool_defs = self.tool_definitions();

        let mut messages = options.history.to_vec();
        let new_start = messages.len();
        if messages.is_empty() {
            let system = self.build_system_prompt(deps, &mode);
            if !system.is_empty() {
                messages.push(ChatMessage::system(system));
            }
        }
        messages.push(ChatMessage::user(prompt));

        debug!(%run_id, model = %self.model.model_id, tools = tool_defs.len(), "Agent run started");

        let mut retries_used = 0u32;
        loop {
            // Processors that call a model draw on this run's budget too
            let mut request = messages.clone();
            for processor in &self.history_processors {
                request = processor.process(request, usage, options.limits).await?;
            }

            usage.check_before_request(&options.limits)?;
            let response = self.llm.chat(&self.model, request, &tool_defs).await?;
            usage.record(response.usage);
            usage.check_tokens(&options.limits)?;

            let reply = response.message;
            messages.push(reply.clone());

            let tool_uses = reply.tool_uses();
            if !tool_uses.is_empty() {
                let mut results = Vec::with_capacity(tool_uses.len());
                for (id, name, input) in tool_uses {
                    let ctx = RunContext {
                        deps,
                        usage,
                        retry: retries_used,
                        prompt,
                    };
                    let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
                        let issue = format!(
                            "Unknown tool name: '{}'. Available tools: {}",
                            name,
                            self.tools.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
                        );
                        retries_used = self
                            .spend_retry(retries_used, issue.clone())
                            .map_err(|_| AgentError::ToolNotFound(name.to_string()))?;
                        results.push(tool_result(id, issue, true));
                        continue;
                    };

                    debug!(%run_id, tool = name, "Calling tool");
                    match tool.call(ctx, input.clone()).await {
                        Ok(value) => {
                            let content = match value {
                                serde_json::Value::String(s) => s,
                                other => other.to_string(),
                            };
                            results.push(tool_result(id, content, false));
                        }
                        Err(ToolError::Retry(msg)) => {
                            retries_used = self.spend_retry(retries_used, msg.clone())?;
                            results.push(tool_result(id, retry_message(&msg), true));
                        }
                        Err(ToolError::Failed(msg)) => {
                            return Err(AgentError::Tool {
                                name: name.to_string(),
                                message: msg,
                            });
                        }
                    }
                }
                messages.push(ChatMessage::tool_results(results));
                continue;
            }

            let text = reply.text();
            let output = match Self::parse_output(&mode, &text) {
                Ok(output) => output,
                Err(issue) => {
                    retries_used = self.spend_retry(retries_used, issue.clone())?;
                    messages.push(ChatMessage::user(retry_message(&issue)));
                    continue;
                }
            };

            let ctx = RunContext {
                deps,
                usage,
                retry: retries_used,
                prompt,
            };
            let mut rejection = None;
            for validator in &self.validators {
                if let Err(ModelRetry(msg)) = validator.validate(ctx, &output).await {
                    rejection = Some(msg);
                    break;
                }
            }

            match rejection {
                Some(issue) => {
                    retries_used = self.spend_retry(retries_used, issue.clone())?;
                    messages.push(ChatMessage::user(retry_message(&issue)));
                }
                None => {
                    info!(
                        %run_id,
                        requests = usage.requests(),
                        total_tokens = usage.total_tokens(),
                        retries = retries_used,
                        "Agent run complete"
                    );
                    return Ok(AgentRun {
                        run_id,
                        output,
                        messages,
                        new_start,
                    });
                }
            }
        }
    }
}

fn tool_result(id: &str, content: String, is_error: bool) -> ContentBlock {
    ContentBlock::ToolResult {
        tool_use_id: id.to_string(),
        content,
        is_error,
    }
}

fn retry_message(issue: &str) -> String {
    format!("{}\n\nFix the errors and try again.", issue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use serde::Deserialize;
    use serde_json::json;
    use waypoint_core::types::Role;
    use waypoint_test_utils::{test_model_config, Scripted, ScriptedLlm};

    use crate::history::{KeepRecent, SummarizeOld};

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Verdict {
        correct: bool,
        comment: String,
    }

    struct Customer {
        name: String,
        balance: f64,
    }

    struct Balance;

    impl Tool<Customer> for Balance {
        fn name(&self) -> &str {
            "customer_balance"
        }

        fn description(&self) -> &str {
            "Returns the customer's current account balance."
        }

        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}})
        }

        fn call<'a>(
            &'a self,
            ctx: RunContext<'a, Customer>,
            _input: serde_json::Value,
        ) -> BoxFuture<'a, Result<serde_json::Value, ToolError>> {
            Box::pin(async move { Ok(json!(format!("${:.2}", ctx.deps.balance))) })
        }
    }

    fn customer() -> Customer {
        Customer {
            name: "John".into(),
            balance: 123.45,
        }
    }

    #[tokio::test]
    async fn test_text_output_with_system_prompt() {
        let llm = ScriptedLlm::new(vec![Scripted::text("Rome")]);
        let requests = llm.requests();
        let agent: Agent<(), String> = Agent::new(Arc::new(llm), test_model_config())
            .system_prompt("Be concise, reply with one sentence.");

        let run = agent.run("Capital of Italy?", &(), RunOptions::default()).await.unwrap();
        assert_eq!(run.output, "Rome");
        assert_eq!(run.new_messages().len(), 3);

        let sent = &requests.lock().unwrap()[0];
        assert_eq!(sent[0].role, Role::System);
        // Text outputs carry no schema instruction
        assert!(!sent[0].text().contains("JSON schema"));
    }

    #[tokio::test]
    async fn test_history_skips_system_prompt() {
        let llm = ScriptedLlm::new(vec![
            Scripted::text("Paris"),
            Scripted::text("You asked about France."),
        ]);
        let requests = llm.requests();
        let agent: Agent<(), String> =
            Agent::new(Arc::new(llm), test_model_config()).system_prompt("Be concise.");

        let first = agent.run("Capital of France?", &(), RunOptions::default()).await.unwrap();
        let options = RunOptions {
            history: first.all_messages(),
            ..RunOptions::default()
        };
        let second = agent.run("What did I ask?", &(), options).await.unwrap();

        assert_eq!(second.all_messages().len(), 5);
        assert_eq!(second.new_messages().len(), 2);
        let sent = &requests.lock().unwrap()[1];
        assert_eq!(sent.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[tokio::test]
    async fn test_structured_output_retry_then_success() {
        let llm = ScriptedLlm::new(vec![
            Scripted::text("I think it is correct"),
            Scripted::json(json!({"correct": true, "comment": "Well done"})),
        ]);
        let requests = llm.requests();
        let agent: Agent<(), Verdict> = Agent::new(Arc::new(llm), test_model_config());

        let run = agent.run("<answer>4</answer>", &(), RunOptions::default()).await.unwrap();
        assert_eq!(
            run.output,
            Verdict {
                correct: true,
                comment: "Well done".into()
            }
        );

        let requests = requests.lock().unwrap();
        assert!(requests[0][0].text().contains("JSON schema"));
        assert!(requests[1].last().unwrap().text().contains("Fix the errors"));
    }

    #[tokio::test]
    async fn test_output_retries_exceeded() {
        let llm = ScriptedLlm::new(vec![Scripted::text("nope"), Scripted::text("still nope")]);
        let calls = llm.call_counter();
        let agent: Agent<(), Verdict> = Agent::new(Arc::new(llm), test_model_config());

        let err = agent.run("evaluate", &(), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::OutputRetriesExceeded { retries: 1, .. }));
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn test_tool_loop_and_dynamic_prompt() {
        let llm = ScriptedLlm::new(vec![
            Scripted::tool("customer_balance", json!({})),
            Scripted::text("Your balance is $123.45."),
        ]);
        let requests = llm.requests();
        let agent: Agent<Customer, String> = Agent::new(Arc::new(llm), test_model_config())
            .system_prompt("You are a support agent in our bank.")
            .dynamic_prompt(|c: &Customer| format!("The customer's name is {:?}", c.name))
            .tool(Balance);

        let run = agent.run("What is my balance?", &customer(), RunOptions::default()).await.unwrap();
        assert_eq!(run.output, "Your balance is $123.45.");

        let requests = requests.lock().unwrap();
        assert!(requests[0][0].text().contains("The customer's name is \"John\""));
        let tool_reply = requests[1].last().unwrap();
        assert!(matches!(
            &tool_reply.content[0],
            ContentBlock::ToolResult { content, is_error: false, .. } if content == "$123.45"
        ));
    }

    #[tokio::test]
    async fn test_unknown_tool_exhausts_retries() {
        let llm = ScriptedLlm::new(vec![
            Scripted::tool("transfer_funds", json!({})),
            Scripted::tool("transfer_funds", json!({})),
        ]);
        let agent: Agent<Customer, String> =
            Agent::new(Arc::new(llm), test_model_config()).tool(Balance);

        let err = agent.run("Move money", &customer(), RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(name) if name == "transfer_funds"));
    }

    #[tokio::test]
    async fn test_validator_model_retry() {
        let llm = ScriptedLlm::new(vec![
            Scripted::json(json!({"correct": false, "comment": ""})),
            Scripted::json(json!({"correct": false, "comment": "The answer is 4."})),
        ]);
        let agent: Agent<(), Verdict> = Agent::new(Arc::new(llm), test_model_config())
            .validate_with(|_, v: &Verdict| {
                if v.comment.is_empty() {
                    Err(ModelRetry::new("comment must not be empty"))
                } else {
                    Ok(())
                }
            });

        let run = agent.run("evaluate", &(), RunOptions::default()).await.unwrap();
        assert_eq!(run.output.comment, "The answer is 4.");
    }

    #[tokio::test]
    async fn test_request_limit_stops_before_sending() {
        let llm = ScriptedLlm::new(vec![
            Scripted::tool("customer_balance", json!({})),
            Scripted::tool("customer_balance", json!({})),
            Scripted::text("done"),
        ]);
        let calls = llm.call_counter();
        let agent: Agent<Customer, String> =
            Agent::new(Arc::new(llm), test_model_config()).tool(Balance);

        let usage = Usage::new();
        let options = RunOptions {
            usage: Some(&usage),
            limits: UsageLimits::requests(2),
            ..RunOptions::default()
        };
        let err = agent.run("balance?", &customer(), options).await.unwrap_err();

        assert!(err.is_limit_exceeded());
        assert_eq!(calls.get(), 2);
        assert_eq!(usage.requests(), 2);
    }

    fn earlier_turns(n: usize) -> Vec<ChatMessage> {
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

    #[tokio::test]
    async fn test_history_processor_trims_request_only() {
        let llm = ScriptedLlm::new(vec![Scripted::text("Still Paris.")]);
        let requests = llm.requests();
        let agent: Agent<(), String> =
            Agent::new(Arc::new(llm), test_model_config()).history_processor(KeepRecent(3));

        let history = earlier_turns(6);
        let options = RunOptions {
            history: &history,
            ..RunOptions::default()
        };
        let run = agent.run("And now?", &(), options).await.unwrap();

        let sent = &requests.lock().unwrap()[0];
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].text(), "question 4");
        assert_eq!(sent[2].text(), "And now?");

        assert_eq!(run.all_messages().len(), 8);
        assert_eq!(&run.all_messages()[..6], history.as_slice());
        assert_eq!(run.new_messages().len(), 2);
    }

    #[tokio::test]
    async fn test_summarizer_requests_share_the_budget() {
        let summarizer_llm = ScriptedLlm::new(vec![Scripted::text("Earlier questions.")]);
        let summarizer_calls = summarizer_llm.call_counter();
        let summarizer: Agent<(), String> =
            Agent::new(Arc::new(summarizer_llm), test_model_config());

        let llm = ScriptedLlm::new(vec![Scripted::text("answer")]);
        let calls = llm.call_counter();
        let agent: Agent<(), String> = Agent::new(Arc::new(llm), test_model_config())
            .history_processor(SummarizeOld::new(summarizer).with_threshold(2));

        let history = earlier_turns(4);
        let usage = Usage::new();
        let options = RunOptions {
            history: &history,
            usage: Some(&usage),
            limits: UsageLimits::requests(1),
        };
        let err = agent.run("next?", &(), options).await.unwrap_err();

        assert!(err.is_limit_exceeded());
        assert_eq!(summarizer_calls.get() + calls.get(), 1);
        assert_eq!(calls.get(), 0);
        assert_eq!(usage.requests(), 1);
    }
}

//! Ask → Answer → Evaluate → Congratulate | Reprimand → Ask.
//!
//! One agent writes a question, the user answers it, a second agent judges
//! the answer. A wrong answer loops back to a fresh question; a right one
//! ends the run with the evaluator's comment.

use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use waypoint_agent::graph::{
    Edge, GraphContext, GraphError, GraphNode, GraphRunner, GraphSpec, ResumePoint, RunHistory,
    Transition,
};
use waypoint_agent::{format_as_xml, Agent, RunOptions, UsageLimits};
use waypoint_core::config::AppConfig;
use waypoint_core::traits::LlmClient;
use waypoint_core::types::ChatMessage;

use crate::prompt::UserPrompter;

pub const ASK_PROMPT: &str = "Ask a simple question with a single correct answer.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionState {
    pub question: Option<String>,
    pub ask_agent_messages: Vec<ChatMessage>,
    pub evaluate_agent_messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationResult {
    pub correct: bool,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum QuestionNode {
    Ask,
    Answer {
        question: String,
        #[serde(default)]
        answer: Option<String>,
    },
    Evaluate {
        answer: String,
    },
    Congratulate {
        comment: String,
    },
    Reprimand {
        comment: String,
    },
}

pub struct QuestionDeps {
    pub ask_agent: Agent<(), String>,
    pub evaluate_agent: Agent<(), EvaluationResult>,
    pub limits: UsageLimits,
}

impl QuestionDeps {
    pub fn new(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Self {
        Self {
            ask_agent: Agent::new(llm.clone(), config.model.clone())
                .retries(config.limits.output_retries),
            evaluate_agent: Agent::new(llm, config.model.clone())
                .system_prompt("Given a question and answer, evaluate if the answer is correct.")
                .retries(config.limits.output_retries),
            limits: UsageLimits::from(&config.limits),
        }
    }
}

#[derive(Serialize)]
struct QuestionAndAnswer<'a> {
    question: &'a str,
    answer: &'a str,
}

impl GraphNode for QuestionNode {
    type State = QuestionState;
    type Deps = QuestionDeps;
    type Output = String;

    fn name(&self) -> &'static str {
        match self {
            Self::Ask => "Ask",
            Self::Answer { .. } => "Answer",
            Self::Evaluate { .. } => "Evaluate",
            Self::Congratulate { .. } => "Congratulate",
            Self::Reprimand { .. } => "Reprimand",
        }
    }

    fn graph() -> GraphSpec {
        GraphSpec::new("question_graph", "Ask")
            .nodes(["Ask", "Answer", "Evaluate", "Congratulate", "Reprimand"])
            .edge(Edge::next("Ask", "Answer"))
            .edge(Edge::next("Answer", "Evaluate"))
            .edge(Edge::next("Evaluate", "Congratulate"))
            .edge(Edge::next("Evaluate", "Reprimand"))
            .edge(Edge::end("Congratulate").label("success"))
            .edge(Edge::next("Reprimand", "Ask"))
    }

    fn run<'a>(
        self,
        ctx: GraphContext<'a, QuestionState, QuestionDeps>,
    ) -> BoxFuture<'a, Result<Transition<Self, String>, GraphError>> {
        Box::pin(async move {
            let GraphContext { state, deps } = ctx;
            match self {
                Self::Ask => {
                    let options = RunOptions {
                        history: &state.ask_agent_messages,
                        limits: deps.limits,
                        ..RunOptions::default()
                    };
                    let run = deps.ask_agent.run(ASK_PROMPT, &(), options).await?;
                    state.ask_agent_messages.extend_from_slice(run.new_messages());
                    state.question = Some(run.output.clone());
                    Ok(Transition::Next(Self::Answer {
                        question: run.output,
                        answer: None,
                    }))
                }
                Self::Answer { answer, .. } => {
                    let answer = answer.ok_or_else(|| GraphError::MissingInput {
                        node: "Answer".into(),
                        field: "answer".into(),
                    })?;
                    Ok(Transition::Next(Self::Evaluate { answer }))
                }
                Self::Evaluate { answer } => {
                    let question = state.question.clone().ok_or_else(|| GraphError::MissingInput {
                        node: "Evaluate".into(),
                        field: "question".into(),
                    })?;
                    let prompt = format_as_xml(
                        &QuestionAndAnswer {
                            question: &question,
                            answer: &answer,
                        },
                        None,
                    )
                    .map_err(waypoint_core::WaypointError::from)?;

                    let options = RunOptions {
                        history: &state.evaluate_agent_messages,
                        limits: deps.limits,
                        ..RunOptions::default()
                    };
                    let run = deps.evaluate_agent.run(&prompt, &(), options).await?;
                    state
                        .evaluate_agent_messages
                        .extend_from_slice(run.new_messages());

                    let EvaluationResult { correct, comment } = run.output;
                    if correct {
                        Ok(Transition::Next(Self::Congratulate { comment }))
                    } else {
                        Ok(Transition::Next(Self::Reprimand { comment }))
                    }
                }
                Self::Congratulate { comment } => {
                    info!(comment = %comment, "Correct answer");
                    Ok(Transition::End(comment))
                }
                Self::Reprimand { comment } => {
                    info!(comment = %comment, "Incorrect answer");
                    state.question = None;
                    Ok(Transition::Next(Self::Ask))
                }
            }
        })
    }
}

/// Show what a transition means to the person answering.
fn announce(prompter: &dyn UserPrompter, node: &QuestionNode) {
    match node {
        QuestionNode::Reprimand { comment } => prompter.show(&format!("Comment: {}", comment)),
        QuestionNode::Congratulate { comment } => {
            prompter.show(&format!("Correct answer! {}", comment))
        }
        _ => {}
    }
}

enum Pending {
    Ready(QuestionNode),
    /// An unanswered question the prompter had no answer for.
    Waiting(String),
}

/// Fill in a pending answer from the prompter.
fn fill_answer(prompter: &dyn UserPrompter, node: QuestionNode) -> Result<Pending, GraphError> {
    match node {
        QuestionNode::Answer {
            question,
            answer: None,
        } => Ok(match prompter.ask(&question)? {
            Some(answer) => Pending::Ready(QuestionNode::Answer {
                question,
                answer: Some(answer),
            }),
            None => Pending::Waiting(question),
        }),
        other => Ok(Pending::Ready(other)),
    }
}

/// Run once from `Ask` to the end, asking the prompter for every answer.
pub async fn run_interactive(
    runner: &GraphRunner<QuestionNode>,
    prompter: &dyn UserPrompter,
) -> Result<(String, RunHistory<QuestionNode>), GraphError> {
    let mut state = QuestionState::default();
    let mut history = RunHistory::new();
    let mut node = QuestionNode::Ask;
    let mut steps = 0usize;

    loop {
        runner.check_step_limit(steps, &node)?;
        steps += 1;

        match runner.next(node, &mut state, &mut history).await? {
            Transition::End(comment) => return Ok((comment, history)),
            Transition::Next(next) => {
                announce(prompter, &next);
                node = match fill_answer(prompter, next)? {
                    Pending::Ready(node) => node,
                    Pending::Waiting(_) => {
                        return Err(GraphError::MissingInput {
                            node: "Answer".into(),
                            field: "answer".into(),
                        })
                    }
                };
            }
        }
    }
}

/// Where a continuous run stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum ContinuousOutcome {
    Finished {
        comment: String,
        history: RunHistory<QuestionNode>,
    },
    /// Paused at an unanswered question; the next invocation resumes here.
    AwaitingAnswer { question: String },
}

/// Resume the persisted run (or start one) and keep stepping.
///
/// Every step is persisted by the runner's store, so the process may stop
/// at any point and a later call picks up at the pending node. A finished
/// history is cleared and a new run begins. The run pauses when the
/// prompter has no answer for a pending question.
pub async fn run_continuous(
    runner: &GraphRunner<QuestionNode>,
    prompter: &dyn UserPrompter,
) -> Result<ContinuousOutcome, GraphError> {
    let (point, mut history) = runner.resume().await?;
    let (mut node, mut state) = match point {
        ResumePoint::Pending { node, state } => {
            info!(node = node.name(), "Resuming question graph");
            (node, state)
        }
        ResumePoint::Finished { .. } => {
            runner.reset().await?;
            history = RunHistory::new();
            (QuestionNode::Ask, QuestionState::default())
        }
        ResumePoint::Fresh => (QuestionNode::Ask, QuestionState::default()),
    };
    let mut steps = 0usize;

    loop {
        node = match fill_answer(prompter, node)? {
            Pending::Ready(node) => node,
            Pending::Waiting(question) => {
                return Ok(ContinuousOutcome::AwaitingAnswer { question });
            }
        };

        runner.check_step_limit(steps, &node)?;
        steps += 1;

        match runner.next(node, &mut state, &mut history).await? {
            Transition::End(comment) => {
                return Ok(ContinuousOutcome::Finished { comment, history });
            }
            Transition::Next(next) => {
                announce(prompter, &next);
                node = next;
            }
        }
    }
}

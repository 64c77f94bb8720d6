//! WriteEmail ⇄ Feedback: a writer drafts a welcome email and a reviewer
//! either accepts it or sends it back with feedback.

use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::info;

use waypoint_agent::graph::{Edge, GraphContext, GraphError, GraphNode, GraphSpec, Transition};
use waypoint_agent::{format_as_xml, Agent, RunOptions, UsageLimits};
use waypoint_core::config::AppConfig;
use waypoint_core::traits::LlmClient;
use waypoint_core::types::ChatMessage;
use waypoint_core::WaypointError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Email {
    pub subject: String,
    pub body: String,
}

/// The reviewer's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum FeedbackVerdict {
    RequiresWrite { feedback: String },
    Ok,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailState {
    pub user: User,
    pub write_agent_messages: Vec<ChatMessage>,
}

impl EmailState {
    pub fn new(user: User) -> Self {
        Self {
            user,
            write_agent_messages: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node")]
pub enum EmailNode {
    WriteEmail {
        #[serde(default)]
        feedback: Option<String>,
    },
    Feedback {
        email: Email,
    },
}

pub struct EmailDeps {
    pub writer: Agent<(), Email>,
    pub reviewer: Agent<(), FeedbackVerdict>,
    pub limits: UsageLimits,
}

impl EmailDeps {
    pub fn new(llm: Arc<dyn LlmClient>, config: &AppConfig) -> Self {
        Self {
            writer: Agent::new(llm.clone(), config.model.clone())
                .system_prompt("Write a welcome email to our tech blog.")
                .retries(config.limits.output_retries),
            reviewer: Agent::new(llm, config.model.clone())
                .system_prompt(
                    "Review the email and provide feedback, email must reference the users specific interests.",
                )
                .retries(config.limits.output_retries),
            limits: UsageLimits::from(&config.limits),
        }
    }
}

#[derive(Serialize)]
struct Review<'a> {
    user: &'a User,
    email: &'a Email,
}

/// Loose address check for CLI input.
pub fn parse_email(s: &str) -> Result<String, String> {
    let s = s.trim();
    match s.split_once('@') {
        Some((local, domain))
            if !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.') =>
        {
            Ok(s.to_string())
        }
        _ => Err(format!("'{}' is not a valid email address", s)),
    }
}

impl GraphNode for EmailNode {
    type State = EmailState;
    type Deps = EmailDeps;
    type Output = Email;

    fn name(&self) -> &'static str {
        match self {
            Self::WriteEmail { .. } => "WriteEmail",
            Self::Feedback { .. } => "Feedback",
        }
    }

    fn graph() -> GraphSpec {
        GraphSpec::new("email_feedback_graph", "WriteEmail")
            .nodes(["WriteEmail", "Feedback"])
            .edge(Edge::next("WriteEmail", "Feedback"))
            .edge(Edge::next("Feedback", "WriteEmail").label("requires rewrite"))
            .edge(Edge::end("Feedback").label("ok"))
    }

    fn run<'a>(
        self,
        ctx: GraphContext<'a, EmailState, EmailDeps>,
    ) -> BoxFuture<'a, Result<Transition<Self, Email>, GraphError>> {
        Box::pin(async move {
            let GraphContext { state, deps } = ctx;
            match self {
                Self::WriteEmail { feedback } => {
                    let user_xml = format_as_xml(&state.user, Some("user")).map_err(WaypointError::from)?;
                    let prompt = match feedback.as_deref().filter(|f| !f.is_empty()) {
                        Some(feedback) => format!(
                            "Rewrite the email for the user:\n{}\nFeedback: {}",
                            user_xml, feedback
                        ),
                        None => format!("Write a welcome email for the user:\n{}", user_xml),
                    };

                    let options = RunOptions {
                        history: &state.write_agent_messages,
                        limits: deps.limits,
                        ..RunOptions::default()
                    };
                    let run = deps.writer.run(&prompt, &(), options).await?;
                    state.write_agent_messages.extend_from_slice(run.new_messages());
                    Ok(Transition::Next(Self::Feedback { email: run.output }))
                }
                Self::Feedback { email } => {
                    let prompt = format_as_xml(
                        &Review {
                            user: &state.user,
                            email: &email,
                        },
                        None,
                    )
                    .map_err(WaypointError::from)?;

                    let options = RunOptions {
                        limits: deps.limits,
                        ..RunOptions::default()
                    };
                    match deps.reviewer.run(&prompt, &(), options).await?.output {
                        FeedbackVerdict::RequiresWrite { feedback } => {
                            info!(feedback = %feedback, "Email needs a rewrite");
                            Ok(Transition::Next(Self::WriteEmail {
                                feedback: Some(feedback),
                            }))
                        }
                        FeedbackVerdict::Ok => {
                            info!(subject = %email.subject, "Email accepted");
                            Ok(Transition::End(email))
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email() {
        assert!(parse_email("john.joe@example.com").is_ok());
        assert!(parse_email("john.joe").is_err());
        assert!(parse_email("@example.com").is_err());
        assert!(parse_email("john@localhost").is_err());
    }

    #[test]
    fn test_verdict_shape() {
        let ok: FeedbackVerdict = serde_json::from_str(r#"{"verdict": "ok"}"#).unwrap();
        assert_eq!(ok, FeedbackVerdict::Ok);
        let rewrite: FeedbackVerdict =
            serde_json::from_str(r#"{"verdict": "requires_write", "feedback": "Mention Lisp"}"#)
                .unwrap();
        assert_eq!(
            rewrite,
            FeedbackVerdict::RequiresWrite {
                feedback: "Mention Lisp".into()
            }
        );
    }
}

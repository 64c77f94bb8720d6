use thiserror::Error;

use waypoint_core::WaypointError;

/// Errors raised while running an agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The request or token budget would be exceeded. Raised before the
    /// offending request is sent.
    #[error("Usage limit exceeded: {0}")]
    UsageLimitExceeded(String),

    #[error("Exceeded maximum retries ({retries}) for output validation: {last_issue}")]
    OutputRetriesExceeded { retries: u32, last_issue: String },

    /// The model kept calling a tool the agent does not have.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error(transparent)]
    Core(#[from] WaypointError),
}

impl AgentError {
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::UsageLimitExceeded(_))
    }
}

use thiserror::Error;

use waypoint_core::WaypointError;

use crate::error::AgentError;

#[derive(Debug, Error)]
pub enum GraphError {
    /// A node was constructed without a value its step requires.
    #[error("Node '{node}' is missing required input: {field}")]
    MissingInput { node: String, field: String },

    #[error("Transition {from} -> {to} is not declared in graph '{graph}'")]
    UndeclaredTransition {
        graph: String,
        from: String,
        to: String,
    },

    #[error("Step limit of {limit} reached in graph '{graph}' (next node: {node})")]
    StepLimitExceeded {
        graph: String,
        limit: usize,
        node: String,
    },

    #[error("Corrupt run history at line {line}: {message}")]
    CorruptHistory { line: usize, message: String },

    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Core(#[from] WaypointError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GraphError {
    /// True for both the request budget and the step cap.
    pub fn is_limit_exceeded(&self) -> bool {
        match self {
            Self::StepLimitExceeded { .. } => true,
            Self::Agent(e) => e.is_limit_exceeded(),
            _ => false,
        }
    }
}

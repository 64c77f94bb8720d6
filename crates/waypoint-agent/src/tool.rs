use futures::future::BoxFuture;
use thiserror::Error;

use crate::usage::Usage;

/// Ask the model to try again, with an explanation it will see.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ModelRetry(pub String);

impl ModelRetry {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Tool failure modes.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    /// Reported back to the model as a retry prompt.
    #[error("{0}")]
    Retry(String),
    /// Ends the run.
    #[error("{0}")]
    Failed(String),
}

impl From<ModelRetry> for ToolError {
    fn from(retry: ModelRetry) -> Self {
        Self::Retry(retry.0)
    }
}

/// What tools, validators, and dynamic prompts see during a run.
pub struct RunContext<'a, D> {
    pub deps: &'a D,
    pub usage: &'a Usage,
    /// Output retries used so far in this run.
    pub retry: u32,
    pub prompt: &'a str,
}

// Manual impls: `D` itself need not be Clone.
impl<D> Clone for RunContext<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D> Copy for RunContext<'_, D> {}

/// A function the model may call, with access to the run's deps.
pub trait Tool<D>: Send + Sync + 'static {
    /// Tool name (used in model tool calls).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    fn call<'a>(
        &'a self,
        ctx: RunContext<'a, D>,
        input: serde_json::Value,
    ) -> BoxFuture<'a, Result<serde_json::Value, ToolError>>;
}

/// Checks a parsed output and may ask the model for another one.
pub trait ResultValidator<D, O>: Send + Sync + 'static {
    fn validate<'a>(
        &'a self,
        ctx: RunContext<'a, D>,
        output: &'a O,
    ) -> BoxFuture<'a, Result<(), ModelRetry>>;
}

/// Adapter for synchronous validator closures.
pub(crate) struct FnValidator<F>(pub F);

impl<D, O, F> ResultValidator<D, O> for FnValidator<F>
where
    D: Sync,
    O: Sync,
    F: Fn(&D, &O) -> Result<(), ModelRetry> + Send + Sync + 'static,
{
    fn validate<'a>(
        &'a self,
        ctx: RunContext<'a, D>,
        output: &'a O,
    ) -> BoxFuture<'a, Result<(), ModelRetry>> {
        let verdict = (self.0)(ctx.deps, output);
        Box::pin(async move { verdict })
    }
}

//! Agents and step graphs.
//!
//! An [`Agent`] wraps one kind of model call: a system prompt, optional tools
//! over typed deps, and a typed output that is parsed and validated with a
//! bounded number of re-prompts. The [`graph`] module walks a small directed
//! graph of steps, each of which typically delegates to one or more agents.

pub mod agent;
pub mod error;
pub mod fanout;
pub mod graph;
pub mod history;
pub mod output;
pub mod tool;
pub mod usage;
pub mod xml;

pub use agent::{Agent, AgentRun, RunOptions};
pub use error::AgentError;
pub use fanout::{fan_out, Attributed};
pub use history::{HistoryProcessor, KeepRecent, SummarizeOld};
pub use output::OutputCleaner;
pub use tool::{ModelRetry, ResultValidator, RunContext, Tool, ToolError};
pub use usage::{Usage, UsageLimits};
pub use xml::format_as_xml;

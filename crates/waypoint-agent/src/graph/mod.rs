//! Step graphs: a small directed graph of named nodes walked one transition
//! at a time.
//!
//! Each graph is a per-graph enum implementing [`GraphNode`]. A node's
//! `run` is its single transition function: it may mutate the shared state,
//! call agents through the deps, and returns either the next node or an
//! explicit [`Transition::End`] carrying the result. The [`GraphRunner`]
//! checks every transition against the declared [`GraphSpec`], records a
//! [`HistoryStep`] per step, and can persist those steps so a run resumes
//! after a restart.

pub mod edge;
pub mod error;
pub mod history;
pub mod mermaid;
pub mod node;
pub mod runner;

pub use edge::{Edge, GraphSpec, Target};
pub use error::GraphError;
pub use history::{
    HistoryStep, HistoryStore, JsonlHistoryStore, MemoryHistoryStore, ResumePoint, RunHistory,
};
pub use mermaid::mermaid;
pub use node::{GraphContext, GraphNode, Transition};
pub use runner::GraphRunner;

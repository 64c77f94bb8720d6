use std::fmt::Debug;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::edge::GraphSpec;
use super::error::GraphError;

/// What a node's transition produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<N, R> {
    Next(N),
    End(R),
}

impl<N, R> Transition<N, R> {
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End(_))
    }
}

/// Borrowed view a node runs against: the run's state and its deps.
pub struct GraphContext<'a, S, D> {
    pub state: &'a mut S,
    pub deps: &'a D,
}

/// A step graph, expressed as one enum with a variant per node.
///
/// Each variant carries only the fields its own step needs; the value is
/// consumed by `run`, so a node is never reused after its transition.
pub trait GraphNode:
    Sized + Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    type State: Clone + Debug + Default + PartialEq + Serialize + DeserializeOwned + Send + Sync;
    type Deps: Send + Sync;
    type Output: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync;

    /// Variant name, matching the node names in [`GraphNode::graph`].
    fn name(&self) -> &'static str;

    /// Declared structure of the graph.
    fn graph() -> GraphSpec;

    /// Run this node's transition exactly once.
    fn run<'a>(
        self,
        ctx: GraphContext<'a, Self::State, Self::Deps>,
    ) -> BoxFuture<'a, Result<Transition<Self, Self::Output>, GraphError>>;
}

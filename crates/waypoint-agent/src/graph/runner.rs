use chrono::Utc;
use tracing::{debug, info, warn};

use super::edge::{GraphSpec, Target};
use super::error::GraphError;
use super::history::{HistoryStep, HistoryStore, ResumePoint, RunHistory};
use super::node::{GraphContext, GraphNode, Transition};

/// Walks a step graph one transition at a time.
///
/// The runner owns the deps handed to every node. It does not retry node
/// errors; those propagate unchanged.
pub struct GraphRunner<N: GraphNode> {
    graph: GraphSpec,
    deps: N::Deps,
    store: Option<Box<dyn HistoryStore<N>>>,
    max_steps: Option<usize>,
}

impl<N: GraphNode> GraphRunner<N> {
    /// Create a runner, rejecting a graph whose declared shape is invalid.
    pub fn new(deps: N::Deps) -> Result<Self, GraphError> {
        let graph = N::graph();
        graph.validate()?;
        Ok(Self {
            graph,
            deps,
            store: None,
            max_steps: None,
        })
    }

    /// Persist every step to `store` as it is taken.
    pub fn with_store(mut self, store: impl HistoryStore<N> + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Cap the number of steps a single `run` may take.
    pub fn with_max_steps(mut self, max_steps: Option<usize>) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn graph(&self) -> &GraphSpec {
        &self.graph
    }

    pub fn deps(&self) -> &N::Deps {
        &self.deps
    }

    /// Run `node`'s transition exactly once.
    ///
    /// Records the pre-transition node together with the state it left
    /// behind, plus an end record if the run finished, and persists both
    /// before returning. A transition the graph does not declare is
    /// rejected with `state` restored to what it was before the node ran.
    pub async fn next(
        &self,
        node: N,
        state: &mut N::State,
        history: &mut RunHistory<N>,
    ) -> Result<Transition<N, N::Output>, GraphError> {
        let name = node.name();
        let snapshot = node.clone();
        let state_before = state.clone();
        info!(graph = %self.graph.name, node = name, step = history.len() + 1, "Running node");

        let transition = node
            .run(GraphContext {
                state: &mut *state,
                deps: &self.deps,
            })
            .await?;

        let target = match &transition {
            Transition::Next(next) => Target::Node(next.name().to_string()),
            Transition::End(_) => Target::End,
        };
        if !self.graph.allows(name, &target) {
            *state = state_before;
            return Err(GraphError::UndeclaredTransition {
                graph: self.graph.name.clone(),
                from: name.to_string(),
                to: target.to_string(),
            });
        }
        debug!(graph = %self.graph.name, from = name, to = %target, "Transition");

        let at = Utc::now();
        let mut steps = vec![HistoryStep::Node {
            node: snapshot,
            state: state.clone(),
            next: match &transition {
                Transition::Next(next) => Some(next.clone()),
                Transition::End(_) => None,
            },
            at,
        }];
        if let Transition::End(result) = &transition {
            steps.push(HistoryStep::End {
                result: result.clone(),
                state: state.clone(),
                at,
            });
        }

        for step in steps {
            if let Some(store) = &self.store {
                store.append(&step).await?;
            }
            history.push(step);
        }

        Ok(transition)
    }

    /// Fail if `steps_taken` already reached the cap, before `node` runs.
    ///
    /// Drivers that step with [`GraphRunner::next`] themselves call this to
    /// honour the same cap as [`GraphRunner::run`].
    pub fn check_step_limit(&self, steps_taken: usize, node: &N) -> Result<(), GraphError> {
        match self.max_steps {
            Some(limit) if steps_taken >= limit => {
                warn!(graph = %self.graph.name, limit, node = node.name(), "Step limit reached");
                Err(GraphError::StepLimitExceeded {
                    graph: self.graph.name.clone(),
                    limit,
                    node: node.name().to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    /// Step from `start` until the graph ends, appending to `history`.
    pub async fn run_with_history(
        &self,
        start: N,
        state: &mut N::State,
        history: &mut RunHistory<N>,
    ) -> Result<N::Output, GraphError> {
        let mut node = start;
        let mut steps = 0usize;
        loop {
            self.check_step_limit(steps, &node)?;
            steps += 1;

            match self.next(node, state, history).await? {
                Transition::Next(next) => node = next,
                Transition::End(result) => {
                    info!(graph = %self.graph.name, steps, "Graph run complete");
                    return Ok(result);
                }
            }
        }
    }

    /// Step from `start` until the graph ends.
    pub async fn run(
        &self,
        start: N,
        state: &mut N::State,
    ) -> Result<(N::Output, RunHistory<N>), GraphError> {
        let mut history = RunHistory::new();
        let result = self.run_with_history(start, state, &mut history).await?;
        Ok((result, history))
    }

    /// Load the persisted history and work out where it stands.
    ///
    /// Without a store there is nothing to resume from.
    pub async fn resume(&self) -> Result<(ResumePoint<N>, RunHistory<N>), GraphError> {
        let Some(store) = &self.store else {
            return Ok((ResumePoint::Fresh, RunHistory::new()));
        };
        let history = store.load_all().await?;
        let point = history.resume_point()?;
        debug!(graph = %self.graph.name, steps = history.len(), "Loaded run history");
        Ok((point, history))
    }

    /// Clear the persisted history.
    pub async fn reset(&self) -> Result<(), GraphError> {
        if let Some(store) = &self.store {
            store.reset().await?;
        }
        Ok(())
    }
}

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use waypoint_core::WaypointError;

use super::error::GraphError;
use super::node::GraphNode;

/// One persisted record of a run.
///
/// `Node` holds the node as it was before its transition, the state after
/// it, and the node the transition produced (`None` if it ended the run).
/// `End` follows the last `Node` record and carries the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", bound = "")]
pub enum HistoryStep<N: GraphNode> {
    Node {
        node: N,
        state: N::State,
        next: Option<N>,
        at: DateTime<Utc>,
    },
    End {
        result: N::Output,
        state: N::State,
        at: DateTime<Utc>,
    },
}

impl<N: GraphNode> HistoryStep<N> {
    pub fn state(&self) -> &N::State {
        match self {
            Self::Node { state, .. } | Self::End { state, .. } => state,
        }
    }
}

/// Where a persisted run stands.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint<N: GraphNode> {
    /// Nothing recorded yet.
    Fresh,
    /// The run stopped before `node` ran.
    Pending { node: N, state: N::State },
    Finished { result: N::Output, state: N::State },
}

/// Ordered record of executed steps.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHistory<N: GraphNode> {
    steps: Vec<HistoryStep<N>>,
}

impl<N: GraphNode> Default for RunHistory<N> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<N: GraphNode> RunHistory<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<HistoryStep<N>>) -> Self {
        Self { steps }
    }

    pub fn push(&mut self, step: HistoryStep<N>) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[HistoryStep<N>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the executed nodes, in order.
    pub fn node_names(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter_map(|s| match s {
                HistoryStep::Node { node, .. } => Some(node.name()),
                HistoryStep::End { .. } => None,
            })
            .collect()
    }

    pub fn result(&self) -> Option<&N::Output> {
        match self.steps.last() {
            Some(HistoryStep::End { result, .. }) => Some(result),
            _ => None,
        }
    }

    /// Work out where to continue from.
    ///
    /// A final `Node` record with no successor and no `End` after it means
    /// the process stopped between the two writes; that history cannot be
    /// resumed.
    pub fn resume_point(&self) -> Result<ResumePoint<N>, GraphError> {
        match self.steps.last() {
            None => Ok(ResumePoint::Fresh),
            Some(HistoryStep::Node {
                next: Some(node),
                state,
                ..
            }) => Ok(ResumePoint::Pending {
                node: node.clone(),
                state: state.clone(),
            }),
            Some(HistoryStep::End { result, state, .. }) => Ok(ResumePoint::Finished {
                result: result.clone(),
                state: state.clone(),
            }),
            Some(HistoryStep::Node { node, .. }) => Err(GraphError::CorruptHistory {
                line: self.steps.len(),
                message: format!("node '{}' ended the run but no end record follows", node.name()),
            }),
        }
    }
}

/// Persistence for history steps.
pub trait HistoryStore<N: GraphNode>: Send + Sync {
    /// Durably append one step.
    fn append<'a>(&'a self, step: &'a HistoryStep<N>) -> BoxFuture<'a, Result<(), GraphError>>;

    fn load_all(&self) -> BoxFuture<'_, Result<RunHistory<N>, GraphError>>;

    /// Forget everything, so the next run starts fresh.
    fn reset(&self) -> BoxFuture<'_, Result<(), GraphError>>;
}

/// Append-only JSONL file: one step per line.
///
/// Each append is flushed before returning, so a killed process loses at
/// most the step it was in the middle of.
pub struct JsonlHistoryStore {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<N: GraphNode> HistoryStore<N> for JsonlHistoryStore {
    fn append<'a>(&'a self, step: &'a HistoryStep<N>) -> BoxFuture<'a, Result<(), GraphError>> {
        Box::pin(async move {
            let mut line = serde_json::to_string(step).map_err(WaypointError::from)?;
            line.push('\n');

            let _guard = self.lock.lock().await;
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            file.sync_data().await?;

            debug!(path = %self.path.display(), "Persisted history step");
            Ok(())
        })
    }

    fn load_all(&self) -> BoxFuture<'_, Result<RunHistory<N>, GraphError>> {
        Box::pin(async move {
            let content = match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(RunHistory::new())
                }
                Err(e) => return Err(e.into()),
            };

            let mut steps = Vec::new();
            for (i, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let step = serde_json::from_str(line).map_err(|e| GraphError::CorruptHistory {
                    line: i + 1,
                    message: e.to_string(),
                })?;
                steps.push(step);
            }
            Ok(RunHistory::from_steps(steps))
        })
    }

    fn reset(&self) -> BoxFuture<'_, Result<(), GraphError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// In-process store, for tests and one-shot runs.
pub struct MemoryHistoryStore<N: GraphNode> {
    steps: Mutex<Vec<HistoryStep<N>>>,
}

impl<N: GraphNode> Default for MemoryHistoryStore<N> {
    fn default() -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
        }
    }
}

impl<N: GraphNode> MemoryHistoryStore<N> {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_steps<T>(&self, f: impl FnOnce(&mut Vec<HistoryStep<N>>) -> T) -> T {
        // A poisoned lock still holds complete steps
        let mut guard = self.steps.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl<N: GraphNode> HistoryStore<N> for MemoryHistoryStore<N> {
    fn append<'a>(&'a self, step: &'a HistoryStep<N>) -> BoxFuture<'a, Result<(), GraphError>> {
        self.with_steps(|steps| steps.push(step.clone()));
        Box::pin(async { Ok(()) })
    }

    fn load_all(&self) -> BoxFuture<'_, Result<RunHistory<N>, GraphError>> {
        let steps = self.with_steps(|steps| steps.clone());
        Box::pin(async move { Ok(RunHistory::from_steps(steps)) })
    }

    fn reset(&self) -> BoxFuture<'_, Result<(), GraphError>> {
        self.with_steps(|steps| steps.clear());
        Box::pin(async { Ok(()) })
    }
}

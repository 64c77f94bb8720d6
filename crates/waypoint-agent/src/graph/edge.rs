use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::GraphError;

/// Where an edge leads.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "node", rename_all = "snake_case")]
pub enum Target {
    Node(String),
    End,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(name) => f.write_str(name),
            Self::End => f.write_str("End"),
        }
    }
}

/// A declared transition between two nodes, or from a node to the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source node name.
    pub from: String,
    pub to: Target,
    /// Shown on the diagram.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Edge {
    /// Create an edge to another node.
    pub fn next(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Target::Node(to.into()),
            label: None,
        }
    }

    /// Create an edge that ends the run.
    pub fn end(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: Target::End,
            label: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// The declared shape of a graph: its nodes, one entry node, and every
/// transition a node may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub name: String,
    pub entry: String,
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
}

impl GraphSpec {
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            nodes: vec![],
            edges: vec![],
        }
    }

    pub fn nodes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nodes.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Whether `from -> to` is a declared edge.
    pub fn allows(&self, from: &str, to: &Target) -> bool {
        self.edges.iter().any(|e| e.from == from && &e.to == to)
    }

    pub fn outgoing<'a>(&'a self, from: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == from)
    }

    /// Check the graph is closed: a declared entry, no dangling edges, an
    /// outgoing edge from every node, and at least one way to end.
    pub fn validate(&self) -> Result<(), GraphError> {
        let declared: HashSet<&str> = self.nodes.iter().map(String::as_str).collect();
        if declared.len() != self.nodes.len() {
            return Err(GraphError::InvalidGraph(format!(
                "graph '{}' declares a node twice",
                self.name
            )));
        }

        if !declared.contains(self.entry.as_str()) {
            return Err(GraphError::InvalidGraph(format!(
                "entry node '{}' is not declared in graph '{}'",
                self.entry, self.name
            )));
        }

        for edge in &self.edges {
            if !declared.contains(edge.from.as_str()) {
                return Err(GraphError::InvalidGraph(format!(
                    "edge source '{}' is not declared",
                    edge.from
                )));
            }
            if let Target::Node(to) = &edge.to {
                if !declared.contains(to.as_str()) {
                    return Err(GraphError::InvalidGraph(format!(
                        "edge {} -> {} points at an undeclared node",
                        edge.from, to
                    )));
                }
            }
        }

        if let Some(stuck) = self
            .nodes
            .iter()
            .find(|n| self.outgoing(n.as_str()).next().is_none())
        {
            return Err(GraphError::InvalidGraph(format!(
                "node '{}' has no outgoing edge",
                stuck
            )));
        }

        if !self.edges.iter().any(|e| e.to == Target::End) {
            return Err(GraphError::InvalidGraph(format!(
                "graph '{}' has no edge to End",
                self.name
            )));
        }

        Ok(())
    }
}

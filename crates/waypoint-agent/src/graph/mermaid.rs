use std::fmt::Write;

use super::edge::{GraphSpec, Target};

/// Render a graph as a mermaid `stateDiagram-v2`.
///
/// Nodes named in `highlight` get a `highlighted` class, which is how the
/// CLI marks where a persisted run currently stands.
pub fn mermaid(graph: &GraphSpec, highlight: &[&str]) -> String {
    let mut out = String::from("---\n");
    let _ = writeln!(out, "title: {}", graph.name);
    out.push_str("---\nstateDiagram-v2\n");
    let _ = writeln!(out, "  [*] --> {}", graph.entry);

    for edge in &graph.edges {
        let to = match &edge.to {
            Target::Node(name) => name.as_str(),
            Target::End => "[*]",
        };
        match &edge.label {
            Some(label) => {
                let _ = writeln!(out, "  {} --> {}: {}", edge.from, to, label);
            }
            None => {
                let _ = writeln!(out, "  {} --> {}", edge.from, to);
            }
        }
    }

    let highlighted: Vec<&str> = highlight
        .iter()
        .copied()
        .filter(|h| graph.nodes.iter().any(|n| n == h))
        .collect();
    if !highlighted.is_empty() {
        out.push('\n');
        out.push_str("classDef highlighted fill:#fdff32\n");
        for node in highlighted {
            let _ = writeln!(out, "class {} highlighted", node);
        }
    }

    out
}

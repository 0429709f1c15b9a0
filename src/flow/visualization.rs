//! Mermaid rendering of flow wiring
//!
//! Shapes:
//! - node: rectangle `[id]`
//! - batch node: subroutine `[[id]]`
//! - nested flow: cylinder `[(id)]`
//! - batch flow: trapezoid `[/id\]`
//! - `START`: stadium, with a plain edge into the start node
//! - `END`: circle
//!
//! Default edges are solid, labeled edges dotted.

use super::graph::Graph;
use super::transition::{Target, END};
use crate::node::{NodeId, Outcome, StepKind};

/// Sanitize an id for use as a Mermaid node identifier
pub fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Entry marker drawn ahead of the start node
pub const START: &str = "START";

/// Render one node declaration
pub fn render_node(id: &NodeId, kind: StepKind) -> String {
    let safe_id = sanitize_id(id.as_str());
    let label = id.as_str();

    match kind {
        StepKind::Node => format!("    {}[{}]", safe_id, label),
        StepKind::Batch => format!("    {}[[{}]]", safe_id, label),
        StepKind::Flow => format!("    {}[({})]", safe_id, label),
        StepKind::BatchFlow => format!("    {}[/{}\\]", safe_id, label),
    }
}

/// Render one edge; the default label draws a plain arrow
pub fn render_edge(from: &NodeId, to: &Target, label: &Outcome) -> String {
    let from_safe = sanitize_id(from.as_str());
    let to_safe = sanitize_id(to.as_str());

    if label.is_default() {
        format!("    {} --> {}", from_safe, to_safe)
    } else {
        format!("    {} -. \"{}\" .-> {}", from_safe, label, to_safe)
    }
}

/// Render the whole graph as a `graph TD` diagram
pub fn render<R: ?Sized>(graph: &Graph<R>) -> String {
    let mut lines = vec![
        "graph TD".to_string(),
        format!("    {}([{}])", START, START),
    ];
    let mut edges = vec![format!(
        "    {} --> {}",
        START,
        sanitize_id(graph.start().as_str())
    )];
    let mut reaches_end = false;

    for id in graph.node_ids() {
        if let Some(node) = graph.node(id) {
            lines.push(render_node(id, node.kind));
        }
        if let Some(transitions) = graph.transitions(id) {
            for (label, target) in transitions.iter() {
                reaches_end |= *target == Target::End;
                edges.push(render_edge(id, target, label));
            }
        }
    }

    if reaches_end {
        lines.push(format!("    {}(({}))", END, END));
    }
    lines.extend(edges);
    lines.join("\n")
}

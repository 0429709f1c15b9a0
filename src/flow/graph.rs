//! Flow graph builder and validated graph
//!
//! The graph is generic over the runnable trait object it stores so the sync
//! and async flows share wiring, validation and successor lookup while never
//! mixing their node types.

use std::collections::HashMap;
use std::sync::Arc;

use super::transition::{Target, Transitions, END};
use crate::error::FlowBuildError;
use crate::node::{NodeId, Outcome, StepKind};

/// A registered runnable and what kind of step it is
pub struct GraphNode<R: ?Sized> {
    pub runnable: Arc<R>,
    pub kind: StepKind,
}

impl<R: ?Sized> Clone for GraphNode<R> {
    fn clone(&self) -> Self {
        Self {
            runnable: Arc::clone(&self.runnable),
            kind: self.kind,
        }
    }
}

/// Collects nodes and transitions; problems surface from [`GraphBuilder::build`]
pub struct GraphBuilder<R: ?Sized> {
    name: String,
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, GraphNode<R>>,
    transitions: HashMap<NodeId, Transitions>,
    start: Option<NodeId>,
    errors: Vec<FlowBuildError>,
}

impl<R: ?Sized> GraphBuilder<R> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: Vec::new(),
            nodes: HashMap::new(),
            transitions: HashMap::new(),
            start: None,
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_node(&mut self, id: NodeId, runnable: Arc<R>, kind: StepKind) {
        if id.as_str() == END {
            self.errors.push(FlowBuildError::ReservedId(id.0));
            return;
        }
        if self.nodes.contains_key(&id) {
            self.errors.push(FlowBuildError::DuplicateNode(id.0));
            return;
        }
        self.order.push(id.clone());
        self.nodes.insert(id, GraphNode { runnable, kind });
    }

    pub fn set_start(&mut self, id: NodeId) {
        self.start = Some(id);
    }

    /// Register `from --label--> to`; an existing edge for the label is replaced with a warning
    pub fn add_transition(&mut self, from: NodeId, label: Outcome, to: Target) {
        let table = self.transitions.entry(from.clone()).or_default();
        if let Some(previous) = table.insert(label.clone(), to.clone()) {
            tracing::warn!(
                flow = %self.name,
                node = %from,
                label = %label,
                previous = previous.as_str(),
                target = to.as_str(),
                "Overwriting successor for outcome"
            );
        }
    }

    /// Validate wiring and freeze the graph
    pub fn build(mut self) -> Result<Graph<R>, FlowBuildError> {
        if !self.errors.is_empty() {
            return Err(self.errors.remove(0));
        }

        let start = self.start.ok_or(FlowBuildError::NoStartNode)?;
        if !self.nodes.contains_key(&start) {
            return Err(FlowBuildError::UnknownNode(start.0));
        }

        // Check in registration order so the reported error is deterministic
        let mut sources: Vec<&NodeId> = self.transitions.keys().collect();
        sources.sort_by_key(|id| self.order.iter().position(|o| o == *id));
        for from in sources {
            if !self.nodes.contains_key(from) {
                return Err(FlowBuildError::UnknownNode(from.0.clone()));
            }
            for (_, target) in self.transitions[from].iter() {
                if let Target::Node(to) = target {
                    if !self.nodes.contains_key(to) {
                        return Err(FlowBuildError::UnknownNode(to.0.clone()));
                    }
                }
            }
        }

        Ok(Graph {
            name: self.name,
            order: self.order,
            nodes: self.nodes,
            transitions: self.transitions,
            start,
        })
    }
}

/// Validated, immutable flow graph
pub struct Graph<R: ?Sized> {
    name: String,
    order: Vec<NodeId>,
    nodes: HashMap<NodeId, GraphNode<R>>,
    transitions: HashMap<NodeId, Transitions>,
    start: NodeId,
}

impl<R: ?Sized> Graph<R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start(&self) -> &NodeId {
        &self.start
    }

    pub fn node(&self, id: &NodeId) -> Option<&GraphNode<R>> {
        self.nodes.get(id)
    }

    /// Node ids in registration order
    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn transitions(&self, id: &NodeId) -> Option<&Transitions> {
        self.transitions.get(id)
    }

    /// Successor of `from` for `outcome`, or `None` when the traversal ends
    ///
    /// A label the node has no edge for ends the traversal. When the node has
    /// other edges this is usually a wiring mistake, so it is logged.
    pub fn successor(&self, from: &NodeId, outcome: &Outcome) -> Option<&NodeId> {
        let table = self.transitions.get(from)?;
        match table.get(outcome.as_str()) {
            Some(target) => target.as_node(),
            None => {
                if !table.is_empty() {
                    let known: Vec<&str> = table.labels().map(Outcome::as_str).collect();
                    tracing::warn!(
                        flow = %self.name,
                        node = %from,
                        outcome = %outcome,
                        ?known,
                        "Flow ends: outcome not found in transitions"
                    );
                }
                None
            }
        }
    }
}

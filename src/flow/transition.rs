//! Per-node transition tables

use crate::node::{NodeId, Outcome};

/// Sentinel target that ends a traversal explicitly
pub const END: &str = "END";

/// Where an outcome label leads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Node(NodeId),
    End,
}

impl Target {
    /// `END` maps to [`Target::End`], anything else to a node id
    pub fn parse(id: impl Into<String>) -> Self {
        let id = id.into();
        if id == END {
            Target::End
        } else {
            Target::Node(NodeId(id))
        }
    }

    pub fn as_node(&self) -> Option<&NodeId> {
        match self {
            Target::Node(id) => Some(id),
            Target::End => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Target::Node(id) => id.as_str(),
            Target::End => END,
        }
    }
}

/// Outcome label to successor mapping for one node
///
/// Entries keep registration order so diagrams are stable.
#[derive(Debug, Clone, Default)]
pub struct Transitions {
    entries: Vec<(Outcome, Target)>,
}

impl Transitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the target for `label`, returning the target it replaced
    pub fn insert(&mut self, label: Outcome, target: Target) -> Option<Target> {
        match self.entries.iter_mut().find(|(existing, _)| *existing == label) {
            Some((_, slot)) => Some(std::mem::replace(slot, target)),
            None => {
                self.entries.push((label, target));
                None
            }
        }
    }

    pub fn get(&self, label: &str) -> Option<&Target> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == label)
            .map(|(_, target)| target)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Outcome, &Target)> {
        self.entries.iter().map(|(label, target)| (label, target))
    }

    pub fn labels(&self) -> impl Iterator<Item = &Outcome> {
        self.entries.iter().map(|(label, _)| label)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

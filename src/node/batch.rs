//! Batch nodes
//!
//! A batch node's `prepare` produces a sequence of items; `compute` runs once
//! per item and `finalize` receives every output in input order.
//!
//! Per-item failures follow the node's retry policy. What happens when an item
//! still fails is up to the node: the default `fallback` re-raises and aborts
//! the batch, while a tolerant node can return an [`ItemFailure`] placeholder
//! (see [`ItemResult`]) and report it from `finalize`.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::retry;
use super::{short_type_name, Outcome, Runnable, StepKind};
use crate::config::RetryPolicy;
use crate::context::{Context, Params};
use crate::error::{FlowError, Result};

/// How a batch node runs its items
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanOut {
    /// One item at a time, in order
    #[default]
    Sequential,
    /// All items started together, waits overlapping (async nodes only)
    Concurrent,
}

/// In-band placeholder for an item whose compute phase failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub message: String,
}

impl ItemFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_error(error: &FlowError) -> Self {
        Self::new(error.to_string())
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item failed: {}", self.message)
    }
}

/// Output type for batch nodes that tolerate per-item failure
pub type ItemResult<T> = std::result::Result<T, ItemFailure>;

/// Separate successful outputs from placeholders, keeping each failure's index
pub fn split_failures<T>(outputs: Vec<ItemResult<T>>) -> (Vec<T>, Vec<(usize, ItemFailure)>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for (index, output) in outputs.into_iter().enumerate() {
        match output {
            Ok(value) => ok.push(value),
            Err(failure) => failed.push((index, failure)),
        }
    }
    (ok, failed)
}

/// A synchronous batch node; items run sequentially
pub trait BatchNode: Send + Sync {
    type Item: Send + Sync + 'static;
    type Output: Send + 'static;

    /// Produce the items to process. Not retried.
    fn prepare(&self, ctx: &mut Context, params: &Params) -> Result<Vec<Self::Item>>;

    /// Process one item. Retried per item.
    fn compute(&self, item: &Self::Item) -> Result<Self::Output>;

    /// Called with the last error once every attempt for `item` failed
    fn fallback(&self, _item: &Self::Item, error: FlowError) -> Result<Self::Output> {
        Err(error)
    }

    /// Merge all outputs (in item order) and choose the outcome label
    fn finalize(
        &self,
        ctx: &mut Context,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> Result<Option<Outcome>>;
}

/// A batch node paired with its retry policy
pub struct BatchStep<N> {
    node: N,
    policy: RetryPolicy,
    label: String,
}

impl<N: BatchNode> BatchStep<N> {
    pub fn new(node: N) -> Self {
        Self {
            node,
            policy: RetryPolicy::default(),
            label: short_type_name::<N>(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn inner(&self) -> &N {
        &self.node
    }

    pub fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.run_with(ctx, &Params::new())
    }
}

impl<N: BatchNode> Runnable for BatchStep<N> {
    fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let items = self.node.prepare(ctx, params)?;
        let mut outputs = Vec::with_capacity(items.len());
        for item in &items {
            let output = retry::run_blocking(
                &self.policy,
                &self.label,
                || self.node.compute(item),
                |err| self.node.fallback(item, err),
            )?;
            outputs.push(output);
        }
        tracing::debug!(node = %self.label, items = items.len(), "batch computed");
        let outcome = self.node.finalize(ctx, items, outputs)?;
        Ok(outcome.unwrap_or_default())
    }

    fn kind(&self) -> StepKind {
        StepKind::Batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Upper {
        seen: Mutex<Vec<String>>,
    }

    impl BatchNode for Upper {
        type Item = String;
        type Output = ItemResult<String>;

        fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<Vec<String>> {
            ctx.require("words")
        }

        fn compute(&self, item: &String) -> Result<ItemResult<String>> {
            self.seen.lock().unwrap().push(item.clone());
            if item.is_empty() {
                return Err(FlowError::node("empty word"));
            }
            Ok(Ok(item.to_uppercase()))
        }

        fn fallback(&self, _item: &String, error: FlowError) -> Result<ItemResult<String>> {
            Ok(Err(ItemFailure::from_error(&error)))
        }

        fn finalize(
            &self,
            ctx: &mut Context,
            _items: Vec<String>,
            outputs: Vec<ItemResult<String>>,
        ) -> Result<Option<Outcome>> {
            let (ok, failed) = split_failures(outputs);
            ctx.set("upper", &ok)?;
            ctx.set("failed", &failed.iter().map(|(i, _)| *i).collect::<Vec<_>>())?;
            Ok(Some(if failed.is_empty() { "clean" } else { "partial" }.into()))
        }
    }

    #[test]
    fn test_batch_step_processes_in_order() {
        let step = BatchStep::new(Upper {
            seen: Mutex::new(Vec::new()),
        });
        let mut ctx = Context::new();
        ctx.set("words", &["a", "b", "c"]).unwrap();

        let outcome = step.run(&mut ctx).unwrap();

        assert_eq!(outcome, "clean");
        assert_eq!(ctx.require::<Vec<String>>("upper").unwrap(), vec!["A", "B", "C"]);
        assert_eq!(*step.inner().seen.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(step.kind(), StepKind::Batch);
    }

    #[test]
    fn test_batch_placeholder_on_failure() {
        let step = BatchStep::new(Upper {
            seen: Mutex::new(Vec::new()),
        })
        .with_retry(RetryPolicy::new(2));
        let mut ctx = Context::new();
        ctx.set("words", &["x", "", "z"]).unwrap();

        let outcome = step.run(&mut ctx).unwrap();

        assert_eq!(outcome, "partial");
        assert_eq!(ctx.require::<Vec<usize>>("failed").unwrap(), vec![1]);
        assert_eq!(ctx.require::<Vec<String>>("upper").unwrap(), vec!["X", "Z"]);
        // failing item was attempted twice
        assert_eq!(step.inner().seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_empty_batch() {
        let step = BatchStep::new(Upper {
            seen: Mutex::new(Vec::new()),
        });
        let mut ctx = Context::new();
        ctx.set("words", &Vec::<String>::new()).unwrap();

        assert_eq!(step.run(&mut ctx).unwrap(), "clean");
    }

    #[test]
    fn test_split_failures_keeps_indices() {
        let outputs: Vec<ItemResult<i32>> = vec![Ok(1), Err(ItemFailure::new("boom")), Ok(3)];
        let (ok, failed) = split_failures(outputs);
        assert_eq!(ok, vec![1, 3]);
        assert_eq!(failed, vec![(1, ItemFailure::new("boom"))]);
        assert_eq!(failed[0].1.to_string(), "item failed: boom");
    }
}

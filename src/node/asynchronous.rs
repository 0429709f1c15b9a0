//! Async nodes
//!
//! Cooperative counterparts of [`Node`](super::Node) and
//! [`BatchNode`](super::BatchNode). Every phase may suspend; waits between
//! retries use `tokio::time::sleep`. An async batch node can fan its items out
//! concurrently, in which case all item computations are polled together in the
//! calling task so their I/O waits overlap.

use async_trait::async_trait;
use futures::future::join_all;

use super::retry;
use super::{short_type_name, FanOut, Outcome, StepKind};
use crate::config::RetryPolicy;
use crate::context::{Context, Params};
use crate::error::{FlowError, Result};

/// Object-safe lifecycle shared by async node wrappers and async flows
#[async_trait]
pub trait AsyncRunnable: Send + Sync {
    /// Run the full lifecycle once and return the outcome label
    async fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome>;

    fn kind(&self) -> StepKind {
        StepKind::Node
    }
}

/// An async node
#[async_trait]
pub trait AsyncNode: Send + Sync {
    type Prepared: Send + Sync + 'static;
    type Output: Send + 'static;

    async fn prepare(&self, ctx: &mut Context, params: &Params) -> Result<Self::Prepared>;

    /// Retried according to the node's [`RetryPolicy`]
    async fn compute(&self, prepared: &Self::Prepared) -> Result<Self::Output>;

    async fn fallback(&self, _prepared: &Self::Prepared, error: FlowError) -> Result<Self::Output> {
        Err(error)
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        prepared: Self::Prepared,
        output: Self::Output,
    ) -> Result<Option<Outcome>>;
}

/// An async node paired with its retry policy
pub struct AsyncStep<N> {
    node: N,
    policy: RetryPolicy,
    label: String,
}

impl<N: AsyncNode> AsyncStep<N> {
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

    /// Run the node on its own with empty params
    pub async fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.run_with(ctx, &Params::new()).await
    }
}

#[async_trait]
impl<N: AsyncNode> AsyncRunnable for AsyncStep<N> {
    async fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let prepared = self.node.prepare(ctx, params).await?;
        let node = &self.node;
        let input = &prepared;
        let output = retry::run_async(
            &self.policy,
            &self.label,
            || node.compute(input),
            |err| node.fallback(input, err),
        )
        .await?;
        let outcome = self.node.finalize(ctx, prepared, output).await?;
        Ok(outcome.unwrap_or_default())
    }
}

/// An async batch node
#[async_trait]
pub trait AsyncBatchNode: Send + Sync {
    type Item: Send + Sync + 'static;
    type Output: Send + 'static;

    async fn prepare(&self, ctx: &mut Context, params: &Params) -> Result<Vec<Self::Item>>;

    /// Process one item. Receives no context, so items cannot race on shared state.
    async fn compute(&self, item: &Self::Item) -> Result<Self::Output>;

    async fn fallback(&self, _item: &Self::Item, error: FlowError) -> Result<Self::Output> {
        Err(error)
    }

    /// Merge outputs, always delivered in item order
    async fn finalize(
        &self,
        ctx: &mut Context,
        items: Vec<Self::Item>,
        outputs: Vec<Self::Output>,
    ) -> Result<Option<Outcome>>;
}

/// An async batch node with its retry policy and fan-out discipline
pub struct AsyncBatchStep<N> {
    node: N,
    policy: RetryPolicy,
    label: String,
    fan_out: FanOut,
}

impl<N: AsyncBatchNode> AsyncBatchStep<N> {
    pub fn new(node: N) -> Self {
        Self {
            node,
            policy: RetryPolicy::default(),
            label: short_type_name::<N>(),
            fan_out: FanOut::Sequential,
        }
    }

    /// Start every item before waiting on any of them
    pub fn concurrent(node: N) -> Self {
        Self::new(node).with_fan_out(FanOut::Concurrent)
    }

    pub fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.fan_out = fan_out;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    pub fn inner(&self) -> &N {
        &self.node
    }

    pub async fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.run_with(ctx, &Params::new()).await
    }

    async fn compute_item(&self, item: &N::Item) -> Result<N::Output> {
        let node = &self.node;
        retry::run_async(
            &self.policy,
            &self.label,
            || node.compute(item),
            |err| node.fallback(item, err),
        )
        .await
    }

    async fn compute_all(&self, items: &[N::Item]) -> Result<Vec<N::Output>> {
        match self.fan_out {
            FanOut::Sequential => {
                let mut outputs = Vec::with_capacity(items.len());
                for item in items {
                    outputs.push(self.compute_item(item).await?);
                }
                Ok(outputs)
            }
            FanOut::Concurrent => {
                // join_all keeps input order and lets every sibling finish
                let results = join_all(items.iter().map(|item| self.compute_item(item))).await;
                let failed = results.iter().filter(|r| r.is_err()).count();
                if failed > 0 {
                    tracing::error!(
                        node = %self.label,
                        failed,
                        total = items.len(),
                        "batch items failed"
                    );
                }
                results.into_iter().collect()
            }
        }
    }
}

#[async_trait]
impl<N: AsyncBatchNode> AsyncRunnable for AsyncBatchStep<N> {
    async fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let items = self.node.prepare(ctx, params).await?;
        let outputs = self.compute_all(&items).await?;
        tracing::debug!(
            node = %self.label,
            items = items.len(),
            fan_out = ?self.fan_out,
            "batch computed"
        );
        let outcome = self.node.finalize(ctx, items, outputs).await?;
        Ok(outcome.unwrap_or_default())
    }

    fn kind(&self) -> StepKind {
        StepKind::Batch
    }
}

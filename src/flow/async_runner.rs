//! Async flows
//!
//! Same traversal as [`Flow`](super::Flow), driven cooperatively. Only async
//! runnables can be registered, so a sync node never blocks an async traversal
//! and an async node never runs without an executor.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

use super::graph::{Graph, GraphBuilder};
use super::transition::Target;
use super::visualization;
use crate::config::{FlowConfig, RetryPolicy};
use crate::context::{merge_params, Context, Params};
use crate::error::{FlowBuildError, FlowError, Result};
use crate::node::{
    AsyncBatchNode, AsyncBatchStep, AsyncNode, AsyncRunnable, AsyncStep, FanOut, NodeId, Outcome,
    StepKind,
};

/// Async twin of [`FlowHooks`](super::FlowHooks)
#[async_trait]
pub trait AsyncFlowHooks: Send + Sync {
    async fn prepare(&self, _ctx: &mut Context, _params: &Params) -> Result<()> {
        Ok(())
    }

    /// `None` maps to the default outcome
    async fn finalize(&self, _ctx: &mut Context, outcome: Outcome) -> Result<Option<Outcome>> {
        Ok(Some(outcome))
    }
}

/// A built, runnable async flow
#[derive(Clone)]
pub struct AsyncFlow {
    graph: Arc<Graph<dyn AsyncRunnable>>,
    params: Params,
    config: FlowConfig,
    hooks: Option<Arc<dyn AsyncFlowHooks>>,
}

impl AsyncFlow {
    pub fn builder(name: impl Into<String>) -> AsyncFlowBuilder {
        AsyncFlowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        self.graph.name()
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn graph(&self) -> &Graph<dyn AsyncRunnable> {
        &self.graph
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Run the flow to completion with its own params
    pub async fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.execute(ctx, &self.params).await
    }

    pub fn to_mermaid(&self) -> String {
        visualization::render(self.graph())
    }

    async fn execute(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let Some(hooks) = &self.hooks else {
            return self.traverse(ctx, params).await;
        };
        hooks.prepare(ctx, params).await?;
        let outcome = self.traverse(ctx, params).await?;
        Ok(hooks.finalize(ctx, outcome).await?.unwrap_or_default())
    }

    pub(crate) async fn traverse(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("flow", flow = %self.name(), %run_id);
        self.walk(ctx, params).instrument(span).await
    }

    async fn walk(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let mut current = self.graph.start().clone();
        let mut steps = 0usize;
        tracing::info!(start = %current, "flow started");

        loop {
            let node = self.graph.node(&current).ok_or_else(|| FlowError::UnknownNode {
                flow: self.name().to_string(),
                node: current.clone(),
            })?;

            if self.config.trace_steps {
                tracing::info!(node = %current, kind = ?node.kind, "running step");
            } else {
                tracing::debug!(node = %current, kind = ?node.kind, "running step");
            }

            let outcome = match node.runnable.run_with(ctx, params).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::error!(node = %current, steps, error = %err, "flow aborted");
                    return Err(err);
                }
            };
            steps += 1;

            match self.graph.successor(&current, &outcome) {
                Some(next) => current = next.clone(),
                None => {
                    tracing::info!(steps, outcome = %outcome, "flow finished");
                    return Ok(outcome);
                }
            }
        }
    }
}

#[async_trait]
impl AsyncRunnable for AsyncFlow {
    async fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let merged = merge_params(&self.params, params);
        self.execute(ctx, &merged).await
    }

    fn kind(&self) -> StepKind {
        StepKind::Flow
    }
}

/// Fluent builder for [`AsyncFlow`]
pub struct AsyncFlowBuilder {
    graph: GraphBuilder<dyn AsyncRunnable>,
    params: Params,
    config: FlowConfig,
    hooks: Option<Arc<dyn AsyncFlowHooks>>,
}

impl AsyncFlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, FlowConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: FlowConfig) -> Self {
        Self {
            graph: GraphBuilder::new(name),
            params: Params::new(),
            config,
            hooks: None,
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Run `hooks` before and after every traversal of the built flow
    pub fn hooks<H: AsyncFlowHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn node<N: AsyncNode + 'static>(self, id: impl Into<String>, node: N) -> Self {
        let policy = self.config.default_retry;
        self.node_with_retry(id, node, policy)
    }

    pub fn node_with_retry<N: AsyncNode + 'static>(
        self,
        id: impl Into<String>,
        node: N,
        policy: RetryPolicy,
    ) -> Self {
        let id = id.into();
        let step = AsyncStep::new(node).with_retry(policy).named(id.clone());
        self.runnable(id, step)
    }

    /// Register a batch node that processes items one at a time
    pub fn batch_node<N: AsyncBatchNode + 'static>(self, id: impl Into<String>, node: N) -> Self {
        let policy = self.config.default_retry;
        self.batch_node_with(id, node, policy, FanOut::Sequential)
    }

    /// Register a batch node whose items all run together
    pub fn concurrent_batch_node<N: AsyncBatchNode + 'static>(
        self,
        id: impl Into<String>,
        node: N,
    ) -> Self {
        let policy = self.config.default_retry;
        self.batch_node_with(id, node, policy, FanOut::Concurrent)
    }

    pub fn batch_node_with<N: AsyncBatchNode + 'static>(
        self,
        id: impl Into<String>,
        node: N,
        policy: RetryPolicy,
        fan_out: FanOut,
    ) -> Self {
        let id = id.into();
        let step = AsyncBatchStep::new(node)
            .with_retry(policy)
            .with_fan_out(fan_out)
            .named(id.clone());
        self.runnable(id, step)
    }

    pub fn subflow<F: AsyncRunnable + 'static>(self, id: impl Into<String>, flow: F) -> Self {
        self.runnable(id, flow)
    }

    pub fn runnable<R: AsyncRunnable + 'static>(
        mut self,
        id: impl Into<String>,
        runnable: R,
    ) -> Self {
        let kind = runnable.kind();
        self.graph.add_node(NodeId::new(id), Arc::new(runnable), kind);
        self
    }

    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.graph.set_start(NodeId::new(id));
        self
    }

    pub fn edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transition(from, Outcome::DEFAULT, to)
    }

    pub fn transition(
        mut self,
        from: impl Into<String>,
        label: impl Into<Outcome>,
        to: impl Into<String>,
    ) -> Self {
        self.graph
            .add_transition(NodeId::new(from), label.into(), Target::parse(to));
        self
    }

    pub fn transitions<I, L, T>(mut self, from: impl Into<String>, edges: I) -> Self
    where
        I: IntoIterator<Item = (L, T)>,
        L: Into<Outcome>,
        T: Into<String>,
    {
        let from = NodeId::new(from);
        for (label, to) in edges {
            self.graph
                .add_transition(from.clone(), label.into(), Target::parse(to));
        }
        self
    }

    pub fn build(self) -> std::result::Result<AsyncFlow, FlowBuildError> {
        let graph = self.graph.build()?;
        Ok(AsyncFlow {
            graph: Arc::new(graph),
            params: self.params,
            config: self.config,
            hooks: self.hooks,
        })
    }
}

/// Drives an [`AsyncBatchFlow`]
#[async_trait]
pub trait AsyncFlowBatch: Send + Sync {
    async fn prepare(&self, ctx: &mut Context, params: &Params) -> Result<Vec<Params>>;

    async fn finalize(&self, _ctx: &mut Context, _sets: Vec<Params>) -> Result<Option<Outcome>> {
        Ok(None)
    }
}

/// Runs an async flow once per param set, one traversal after another
///
/// Traversals share the context mutably, so they never overlap.
pub struct AsyncBatchFlow<B> {
    flow: AsyncFlow,
    batch: B,
}

impl<B: AsyncFlowBatch> AsyncBatchFlow<B> {
    pub fn new(flow: AsyncFlow, batch: B) -> Self {
        Self { flow, batch }
    }

    pub fn flow(&self) -> &AsyncFlow {
        &self.flow
    }

    pub async fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.run_with(ctx, &Params::new()).await
    }
}

#[async_trait]
impl<B: AsyncFlowBatch> AsyncRunnable for AsyncBatchFlow<B> {
    async fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let base = merge_params(self.flow.params(), params);
        let sets = self.batch.prepare(ctx, &base).await?;
        tracing::debug!(flow = %self.flow.name(), runs = sets.len(), "batch flow prepared");

        for set in &sets {
            self.flow.traverse(ctx, &merge_params(&base, set)).await?;
        }

        let outcome = self.batch.finalize(ctx, sets).await?;
        Ok(outcome.unwrap_or_default())
    }

    fn kind(&self) -> StepKind {
        StepKind::BatchFlow
    }
}

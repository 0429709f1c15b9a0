//! Synchronous flows
//!
//! A [`Flow`] walks its graph on the calling thread: run the current node,
//! look up the successor for the returned outcome, repeat until there is none.
//! Flows implement [`Runnable`] themselves, so a built flow can be registered
//! as a node of a larger flow.
//!
//! # Example
//!
//! ```ignore
//! let flow = Flow::builder("qa")
//!     .node("decide", Decide)
//!     .node("search", Search)
//!     .node("answer", Answer)
//!     .start("decide")
//!     .transition("decide", "search", "search")
//!     .transition("decide", "answer", "answer")
//!     .edge("search", "decide")
//!     .build()?;
//!
//! let outcome = flow.run(&mut ctx)?;
//! ```
//!
//! A flow can carry [`FlowHooks`] that run before and after the traversal,
//! mirroring a node's prepare and finalize phases. Hook failures are not
//! retried.

use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::graph::{Graph, GraphBuilder};
use super::transition::Target;
use super::visualization;
use crate::config::{FlowConfig, RetryPolicy};
use crate::context::{merge_params, Context, Params};
use crate::error::{FlowBuildError, FlowError, Result};
use crate::node::{BatchNode, BatchStep, Node, NodeId, Outcome, Runnable, Step, StepKind};

/// Phases wrapped around a flow's traversal
///
/// The traversal itself plays the part of a node's compute phase.
pub trait FlowHooks: Send + Sync {
    /// Runs before the start node, with the params the traversal will see
    fn prepare(&self, _ctx: &mut Context, _params: &Params) -> Result<()> {
        Ok(())
    }

    /// Runs after the traversal; `None` maps to the default outcome
    fn finalize(&self, _ctx: &mut Context, outcome: Outcome) -> Result<Option<Outcome>> {
        Ok(Some(outcome))
    }
}

/// A built, runnable synchronous flow
#[derive(Clone)]
pub struct Flow {
    graph: Arc<Graph<dyn Runnable>>,
    params: Params,
    config: FlowConfig,
    hooks: Option<Arc<dyn FlowHooks>>,
}

impl Flow {
    /// Start wiring a new flow
    pub fn builder(name: impl Into<String>) -> FlowBuilder {
        FlowBuilder::new(name)
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

    pub fn graph(&self) -> &Graph<dyn Runnable> {
        &self.graph
    }

    /// Replace the flow's own params
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Run the flow to completion with its own params
    pub fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.execute(ctx, &self.params)
    }

    /// Render the wiring as a Mermaid diagram
    pub fn to_mermaid(&self) -> String {
        visualization::render(self.graph())
    }

    /// Hooks around one traversal
    fn execute(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let Some(hooks) = &self.hooks else {
            return self.traverse(ctx, params);
        };
        hooks.prepare(ctx, params)?;
        let outcome = self.traverse(ctx, params)?;
        Ok(hooks.finalize(ctx, outcome)?.unwrap_or_default())
    }

    pub(crate) fn traverse(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("flow", flow = %self.name(), %run_id);
        let _entered = span.enter();

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

            let outcome = match node.runnable.run_with(ctx, params) {
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

impl Runnable for Flow {
    /// Nested run: parent params are merged over the flow's own
    fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let merged = merge_params(&self.params, params);
        self.execute(ctx, &merged)
    }

    fn kind(&self) -> StepKind {
        StepKind::Flow
    }
}

/// Fluent builder for [`Flow`]
pub struct FlowBuilder {
    graph: GraphBuilder<dyn Runnable>,
    params: Params,
    config: FlowConfig,
    hooks: Option<Arc<dyn FlowHooks>>,
}

impl FlowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, FlowConfig::default())
    }

    /// Builder whose nodes default to `config.default_retry`
    pub fn with_config(name: impl Into<String>, config: FlowConfig) -> Self {
        Self {
            graph: GraphBuilder::new(name),
            params: Params::new(),
            config,
            hooks: None,
        }
    }

    /// Set the flow's params, replacing any set before
    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Set a single param
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Run `hooks` before and after every traversal of the built flow
    pub fn hooks<H: FlowHooks + 'static>(mut self, hooks: H) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Register a node with the default retry policy
    pub fn node<N: Node + 'static>(self, id: impl Into<String>, node: N) -> Self {
        let policy = self.config.default_retry;
        self.node_with_retry(id, node, policy)
    }

    pub fn node_with_retry<N: Node + 'static>(
        self,
        id: impl Into<String>,
        node: N,
        policy: RetryPolicy,
    ) -> Self {
        let id = id.into();
        let step = Step::new(node).with_retry(policy).named(id.clone());
        self.runnable(id, step)
    }

    /// Register a batch node with the default retry policy
    pub fn batch_node<N: BatchNode + 'static>(self, id: impl Into<String>, node: N) -> Self {
        let policy = self.config.default_retry;
        self.batch_node_with_retry(id, node, policy)
    }

    pub fn batch_node_with_retry<N: BatchNode + 'static>(
        self,
        id: impl Into<String>,
        node: N,
        policy: RetryPolicy,
    ) -> Self {
        let id = id.into();
        let step = BatchStep::new(node).with_retry(policy).named(id.clone());
        self.runnable(id, step)
    }

    /// Register a built flow (or batch flow) as a node
    pub fn subflow<F: Runnable + 'static>(self, id: impl Into<String>, flow: F) -> Self {
        self.runnable(id, flow)
    }

    /// Register any runnable as a node
    pub fn runnable<R: Runnable + 'static>(mut self, id: impl Into<String>, runnable: R) -> Self {
        let kind = runnable.kind();
        self.graph.add_node(NodeId::new(id), Arc::new(runnable), kind);
        self
    }

    pub fn start(mut self, id: impl Into<String>) -> Self {
        self.graph.set_start(NodeId::new(id));
        self
    }

    /// Connect `from` to `to` on the default outcome; `to` may be [`END`](super::END)
    pub fn edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transition(from, Outcome::DEFAULT, to)
    }

    /// Connect `from` to `to` on `label`
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

    /// Several labeled transitions from one node
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

    pub fn build(self) -> std::result::Result<Flow, FlowBuildError> {
        let graph = self.graph.build()?;
        Ok(Flow {
            graph: Arc::new(graph),
            params: self.params,
            config: self.config,
            hooks: self.hooks,
        })
    }
}

/// Drives a [`BatchFlow`]: produces one param set per traversal
pub trait FlowBatch: Send + Sync {
    /// Param sets to run the inner flow with, in order
    fn prepare(&self, ctx: &mut Context, params: &Params) -> Result<Vec<Params>>;

    /// Called after every traversal finished
    fn finalize(&self, _ctx: &mut Context, _sets: Vec<Params>) -> Result<Option<Outcome>> {
        Ok(None)
    }
}

/// Runs a flow once per param set produced by a [`FlowBatch`]
pub struct BatchFlow<B> {
    flow: Flow,
    batch: B,
}

impl<B: FlowBatch> BatchFlow<B> {
    pub fn new(flow: Flow, batch: B) -> Self {
        Self { flow, batch }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.run_with(ctx, &Params::new())
    }
}

impl<B: FlowBatch> Runnable for BatchFlow<B> {
    fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let base = merge_params(self.flow.params(), params);
        let sets = self.batch.prepare(ctx, &base)?;
        tracing::debug!(flow = %self.flow.name(), runs = sets.len(), "batch flow prepared");

        for set in &sets {
            self.flow.traverse(ctx, &merge_params(&base, set))?;
        }

        let outcome = self.batch.finalize(ctx, sets)?;
        Ok(outcome.unwrap_or_default())
    }

    fn kind(&self) -> StepKind {
        StepKind::BatchFlow
    }
}

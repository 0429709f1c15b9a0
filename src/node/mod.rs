//! Node abstractions
//!
//! A node is the unit of work in a flow. Every node has the same three-phase
//! lifecycle:
//!
//! ```text
//!   prepare(ctx, params) ──▶ compute(prepared) ──▶ finalize(ctx, prepared, output)
//!                               │   ▲                     │
//!                               └───┘ retry               └──▶ outcome label
//!                               │
//!                               └──▶ fallback(prepared, error) on exhaustion
//! ```
//!
//! `prepare` and `finalize` may read and write the [`Context`]; `compute` only
//! sees what `prepare` handed it and is the one phase expected to do fallible
//! I/O, so it is the only one that is retried.
//!
//! Node traits are typed (`Prepared`/`Output` associated types). Flows store
//! them behind the object-safe [`Runnable`] trait, which is also implemented by
//! flows themselves so that a flow can be used wherever a node can.

pub mod asynchronous;
pub mod batch;
pub(crate) mod retry;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RetryPolicy;
use crate::context::{Context, Params};
use crate::error::{FlowError, Result};

pub use asynchronous::{AsyncBatchNode, AsyncBatchStep, AsyncNode, AsyncRunnable, AsyncStep};
pub use batch::{split_failures, BatchNode, BatchStep, FanOut, ItemFailure, ItemResult};

/// Unique identifier for a node in a flow graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a new NodeId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome label returned by a node's final phase
///
/// The flow looks the label up in the node's transition table to pick the
/// successor. Nodes that return no label produce [`Outcome::DEFAULT`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Outcome(String);

impl Outcome {
    /// Label used for unlabeled outcomes and plain edges
    pub const DEFAULT: &'static str = "default";

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl From<&str> for Outcome {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Outcome {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<str> for Outcome {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Outcome {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a runnable is, used for logging and diagram shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepKind {
    Node,
    Batch,
    Flow,
    BatchFlow,
}

/// A synchronous node
///
/// # Example
///
/// ```ignore
/// struct Double;
///
/// impl Node for Double {
///     type Prepared = i64;
///     type Output = i64;
///
///     fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<i64> {
///         ctx.require("x")
///     }
///
///     fn compute(&self, x: &i64) -> Result<i64> {
///         Ok(x * 2)
///     }
///
///     fn finalize(&self, ctx: &mut Context, _x: i64, doubled: i64) -> Result<Option<Outcome>> {
///         ctx.set("x", &doubled)?;
///         Ok(None)
///     }
/// }
/// ```
pub trait Node: Send + Sync {
    /// Value handed from `prepare` to `compute` and `finalize`
    type Prepared: Send + Sync + 'static;
    /// Result of `compute`
    type Output: Send + 'static;

    /// Read what the node needs from the context. Not retried.
    fn prepare(&self, ctx: &mut Context, params: &Params) -> Result<Self::Prepared>;

    /// Do the work. Retried according to the node's [`RetryPolicy`].
    fn compute(&self, prepared: &Self::Prepared) -> Result<Self::Output>;

    /// Called with the last error once every attempt failed.
    ///
    /// Return a substitute output to keep the flow going; the default
    /// re-raises, which terminates the run.
    fn fallback(&self, _prepared: &Self::Prepared, error: FlowError) -> Result<Self::Output> {
        Err(error)
    }

    /// Write results back and choose the outcome label. Not retried.
    fn finalize(
        &self,
        ctx: &mut Context,
        prepared: Self::Prepared,
        output: Self::Output,
    ) -> Result<Option<Outcome>>;
}

/// Object-safe lifecycle shared by wrapped nodes and flows
pub trait Runnable: Send + Sync {
    /// Run the full lifecycle once and return the outcome label
    fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome>;

    fn kind(&self) -> StepKind {
        StepKind::Node
    }
}

/// A node paired with its retry policy
pub struct Step<N> {
    node: N,
    policy: RetryPolicy,
    label: String,
}

impl<N: Node> Step<N> {
    /// Wrap a node with the default (single attempt) policy
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

    /// Name used in log records
    pub fn named(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &N {
        &self.node
    }

    /// Run the node on its own, outside any flow, with empty params
    pub fn run(&self, ctx: &mut Context) -> Result<Outcome> {
        self.run_with(ctx, &Params::new())
    }
}

impl<N: Node> Runnable for Step<N> {
    fn run_with(&self, ctx: &mut Context, params: &Params) -> Result<Outcome> {
        let prepared = self.node.prepare(ctx, params)?;
        let output = retry::run_blocking(
            &self.policy,
            &self.label,
            || self.node.compute(&prepared),
            |err| self.node.fallback(&prepared, err),
        )?;
        let outcome = self.node.finalize(ctx, prepared, output)?;
        Ok(outcome.unwrap_or_default())
    }
}

pub(crate) fn short_type_name<T>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

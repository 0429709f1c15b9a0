//! nodeflow: a minimal node-graph workflow runtime
//!
//! Work is split into nodes with a three-phase lifecycle (prepare, compute,
//! finalize). Nodes are wired into a [`Flow`] by outcome labels: each node's
//! finalize phase returns a label and the flow follows the matching transition.
//! Nodes share state through a mutable [`Context`].
//!
//! - Bounded retries with a fixed wait around `compute`, then a fallback
//! - Cycles, explicit `END`, and termination on unmatched labels
//! - Flows nest: a built flow registers as a node of a larger flow
//! - Batch nodes fan out over items, sequentially or concurrently (async)
//! - Batch flows rerun a flow once per param set
//!
//! # Example
//!
//! ```rust,ignore
//! use nodeflow::prelude::*;
//!
//! struct Double;
//!
//! impl Node for Double {
//!     type Prepared = i64;
//!     type Output = i64;
//!
//!     fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<i64> {
//!         ctx.require("x")
//!     }
//!
//!     fn compute(&self, x: &i64) -> Result<i64> {
//!         Ok(x * 2)
//!     }
//!
//!     fn finalize(&self, ctx: &mut Context, _x: i64, doubled: i64) -> Result<Option<Outcome>> {
//!         ctx.set("x", &doubled)?;
//!         Ok(if doubled < 100 { Some("again".into()) } else { None })
//!     }
//! }
//!
//! let flow = Flow::builder("doubling")
//!     .node_with_retry("double", Double, RetryPolicy::new(3))
//!     .start("double")
//!     .transition("double", "again", "double")
//!     .build()?;
//!
//! let mut ctx = Context::new();
//! ctx.set("x", &1)?;
//! flow.run(&mut ctx)?;
//! ```

pub mod capability;
pub mod config;
pub mod context;
pub mod error;
pub mod flow;
pub mod node;
pub mod telemetry;

// Re-exports for convenience
pub use config::{FlowConfig, RetryPolicy};
pub use context::{merge_params, Context, Key, Params};
pub use error::{ConfigError, FlowBuildError, FlowError, Result};
pub use flow::{
    AsyncBatchFlow, AsyncFlow, AsyncFlowBatch, AsyncFlowBuilder, AsyncFlowHooks, BatchFlow, Flow,
    FlowBatch, FlowBuilder, FlowHooks, END,
};
pub use node::{
    split_failures, AsyncBatchNode, AsyncBatchStep, AsyncNode, AsyncRunnable, AsyncStep,
    BatchNode, BatchStep, FanOut, ItemFailure, ItemResult, Node, NodeId, Outcome, Runnable, Step,
    StepKind,
};

/// Everything needed to write nodes and wire flows
pub mod prelude {
    pub use crate::config::{FlowConfig, RetryPolicy};
    pub use crate::context::{Context, Key, Params};
    pub use crate::error::{FlowError, Result};
    pub use crate::flow::{
        AsyncBatchFlow, AsyncFlow, AsyncFlowBatch, AsyncFlowHooks, BatchFlow, Flow, FlowBatch,
        FlowHooks, END,
    };
    pub use crate::node::{
        split_failures, AsyncBatchNode, AsyncBatchStep, AsyncNode, AsyncRunnable, AsyncStep,
        BatchNode, BatchStep, FanOut, ItemFailure, ItemResult, Node, Outcome, Runnable, Step,
    };
    pub use async_trait::async_trait;
}

//! Flows: graphs of nodes connected by outcome labels
//!
//! - [`Flow`] / [`FlowBuilder`]: synchronous traversal
//! - [`AsyncFlow`] / [`AsyncFlowBuilder`]: cooperative traversal
//! - [`BatchFlow`] / [`AsyncBatchFlow`]: one traversal per param set
//! - [`FlowHooks`] / [`AsyncFlowHooks`]: prepare and finalize around a traversal
//!
//! Traversal starts at the start node and follows the transition registered
//! for each outcome. It ends when a node's outcome has no transition or leads
//! to [`END`]; the last outcome is returned. Cycles are allowed and the engine
//! imposes no iteration cap.

pub mod async_runner;
pub mod graph;
pub mod runner;
pub mod transition;
pub mod visualization;

pub use async_runner::{
    AsyncBatchFlow, AsyncFlow, AsyncFlowBatch, AsyncFlowBuilder, AsyncFlowHooks,
};
pub use graph::{Graph, GraphBuilder, GraphNode};
pub use runner::{BatchFlow, Flow, FlowBatch, FlowBuilder, FlowHooks};
pub use transition::{Target, Transitions, END};

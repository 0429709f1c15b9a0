//! Error types for the flow runtime
//!
//! `FlowError` covers everything that can go wrong while a flow runs;
//! `FlowBuildError` covers wiring mistakes caught when a graph is built.

use thiserror::Error;

use crate::node::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = FlowError> = std::result::Result<T, E>;

/// Boxed error source carried by [`FlowError::Node`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while running nodes and flows
#[derive(Debug, Error)]
pub enum FlowError {
    /// Failure raised by node code (usually from `compute`)
    #[error("Node error: {message}")]
    Node {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A required context key was absent
    #[error("Missing context key: {0}")]
    MissingKey(String),

    /// A context value could not be read as the requested type
    #[error("Context key '{key}' has an unexpected type: {source}")]
    ContextType {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A typed resource was absent or stored under a different type
    #[error("Missing resource '{0}'")]
    MissingResource(String),

    /// A value could not be serialized into the context
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A flow referenced a node the graph does not contain
    #[error("Unknown node in flow '{flow}': {node}")]
    UnknownNode { flow: String, node: NodeId },

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Any other error raised by node implementations
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    /// Create a node error with a message
    pub fn node(message: impl Into<String>) -> Self {
        Self::Node {
            message: message.into(),
            source: None,
        }
    }

    /// Create a node error with source
    pub fn node_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Node {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a missing key error
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey(key.into())
    }

    /// Check if the error was raised by node code rather than by the runtime
    pub fn is_node_error(&self) -> bool {
        matches!(self, FlowError::Node { .. } | FlowError::Other(_))
    }
}

/// Errors that can occur while building a flow graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlowBuildError {
    #[error("flow start node not set")]
    NoStartNode,
    #[error("unknown node id: {0}")]
    UnknownNode(String),
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),
    #[error("reserved node id: {0}")]
    ReservedId(String),
}

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be a valid positive integer, got '{value}'")]
    InvalidInteger { key: String, value: String },

    #[error("{key} must be a duration such as '500ms' or '2s', got '{value}'")]
    InvalidDuration { key: String, value: String },

    #[error("{key} must be 'true' or 'false', got '{value}'")]
    InvalidBool { key: String, value: String },

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),
}

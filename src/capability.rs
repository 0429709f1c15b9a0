//! Contracts for the external services nodes typically call
//!
//! The runtime itself never touches these. They give node implementations a
//! common shape for completion models, embedding models, web search and vector
//! indexes, so nodes can be written against a trait and tested with fakes.
//! Implementations may fail transiently; wrap calls in a node's `compute`
//! phase so the retry policy applies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Text completion service
#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Single user-turn completion
    async fn prompt(&self, prompt: &str) -> Result<String> {
        self.complete(&[ChatMessage::user(prompt)]).await
    }
}

/// Fixed-length vector produced by an [`EmbeddingModel`]
pub type Embedding = Vec<f32>;

/// Text embedding service; returns one vector per input, in input order
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Length of every vector this model produces
    fn dimensions(&self) -> usize;
}

/// Cosine similarity of two vectors; 0.0 when either is all zeros or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search provider
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SearchHit>>;
}

/// Match returned by a [`VectorIndex`] query
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Position of the vector in insertion order
    pub index: usize,
    pub distance: f32,
}

/// Nearest-neighbor index over embeddings
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn add(&self, vectors: &[Embedding]) -> Result<()>;

    /// Up to `k` closest vectors, nearest first
    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

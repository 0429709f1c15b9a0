//! Integration tests for async flows
//!
//! Nodes here talk to fake services through the capability traits:
//! - a scripted completion model driving a draft/review loop
//! - an embedding model and vector index behind a concurrent batch node
//! - overlapping waits and input-order results under concurrent fan-out

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nodeflow::capability::{
    cosine_similarity, ChatMessage, CompletionModel, Embedding, EmbeddingModel, Neighbor,
    VectorIndex,
};
use nodeflow::prelude::*;
use serde_json::json;
use tokio::time::sleep;

// =============================================================================
// Fake services
// =============================================================================

/// Replays canned responses; `None` entries fail like a transient outage
struct ScriptedModel {
    script: Mutex<VecDeque<Option<String>>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(script: &[Option<&str>]) -> Self {
        Self {
            script: Mutex::new(script.iter().map(|s| s.map(str::to_string)).collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(2)).await;
        match self.script.lock().unwrap().pop_front() {
            Some(Some(reply)) => Ok(reply),
            Some(None) => Err(FlowError::node("model overloaded")),
            None => Err(FlowError::node("script exhausted")),
        }
    }
}

/// Letter-frequency embeddings with length-dependent latency
struct LetterEmbedder;

#[async_trait]
impl EmbeddingModel for LetterEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            sleep(Duration::from_millis((text.len() % 3) as u64 * 5)).await;
            let mut vector = vec![0.0; self.dimensions()];
            for c in text.chars().filter(char::is_ascii_lowercase) {
                vector[(c as u8 - b'a') as usize] += 1.0;
            }
            vectors.push(vector);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        26
    }
}

#[derive(Default)]
struct MemoryIndex {
    vectors: Mutex<Vec<Embedding>>,
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn add(&self, vectors: &[Embedding]) -> Result<()> {
        self.vectors.lock().unwrap().extend_from_slice(vectors);
        Ok(())
    }

    async fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        let mut neighbors: Vec<Neighbor> = self
            .vectors
            .lock()
            .unwrap()
            .iter()
            .enumerate()
            .map(|(index, v)| Neighbor {
                index,
                distance: 1.0 - cosine_similarity(query, v),
            })
            .collect();
        neighbors.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        neighbors.truncate(k);
        Ok(neighbors)
    }
}

// =============================================================================
// Draft / review loop
// =============================================================================

const QUESTION: Key<String> = Key::new("question");
const DRAFT: Key<String> = Key::new("draft");
const FEEDBACK: Key<String> = Key::new("feedback");
const ROUNDS: Key<usize> = Key::new("rounds");

struct Draft {
    model: Arc<dyn CompletionModel>,
}

#[async_trait]
impl AsyncNode for Draft {
    type Prepared = Vec<ChatMessage>;
    type Output = String;

    async fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<Vec<ChatMessage>> {
        let mut messages = vec![
            ChatMessage::system("Answer concisely."),
            ChatMessage::user(ctx.read(&QUESTION)?),
        ];
        if let Some(feedback) = ctx.read_opt(&FEEDBACK)? {
            messages.push(ChatMessage::user(format!("Reviewer feedback: {}", feedback)));
        }
        Ok(messages)
    }

    async fn compute(&self, messages: &Vec<ChatMessage>) -> Result<String> {
        self.model.complete(messages).await
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        _: Vec<ChatMessage>,
        draft: String,
    ) -> Result<Option<Outcome>> {
        ctx.write(&DRAFT, &draft)?;
        let rounds = ctx.read_opt(&ROUNDS)?.unwrap_or(0) + 1;
        ctx.write(&ROUNDS, &rounds)?;
        Ok(None)
    }
}

struct Review {
    model: Arc<dyn CompletionModel>,
}

#[async_trait]
impl AsyncNode for Review {
    type Prepared = String;
    type Output = String;

    async fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<String> {
        ctx.read(&DRAFT)
    }

    async fn compute(&self, draft: &String) -> Result<String> {
        self.model
            .prompt(&format!("Reply APPROVE or REVISE: <reason> for: {}", draft))
            .await
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        _: String,
        verdict: String,
    ) -> Result<Option<Outcome>> {
        match verdict.strip_prefix("REVISE: ") {
            Some(reason) => {
                ctx.write(&FEEDBACK, &reason.to_string())?;
                Ok(Some("revise".into()))
            }
            None => Ok(Some("approved".into())),
        }
    }
}

#[tokio::test]
async fn test_draft_review_loop_with_transient_failure() {
    let model = Arc::new(ScriptedModel::new(&[
        Some("A flow is a graph."),
        None, // reviewer call fails once
        Some("REVISE: mention transitions"),
        Some("A flow is a graph of nodes joined by outcome transitions."),
        Some("APPROVE"),
    ]));

    let flow = AsyncFlow::builder("draft_review")
        .node("draft", Draft { model: model.clone() })
        .node_with_retry(
            "review",
            Review { model: model.clone() },
            RetryPolicy::new(2).with_wait(Duration::from_millis(5)),
        )
        .start("draft")
        .edge("draft", "review")
        .transitions("review", [("revise", "draft"), ("approved", END)])
        .build()
        .unwrap();

    let mut ctx = Context::new();
    ctx.write(&QUESTION, &"What is a flow?".to_string()).unwrap();

    let outcome = flow.run(&mut ctx).await.unwrap();

    assert_eq!(outcome, "approved");
    assert_eq!(ctx.read(&ROUNDS).unwrap(), 2);
    assert_eq!(ctx.read(&FEEDBACK).unwrap(), "mention transitions");
    assert!(ctx.read(&DRAFT).unwrap().contains("outcome transitions"));
    assert_eq!(model.calls.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_exhausted_model_aborts_flow() {
    let model = Arc::new(ScriptedModel::new(&[None, None]));
    let flow = AsyncFlow::builder("outage")
        .node_with_retry("draft", Draft { model: model.clone() }, RetryPolicy::new(2))
        .start("draft")
        .build()
        .unwrap();

    let mut ctx = Context::new();
    ctx.write(&QUESTION, &"anything".to_string()).unwrap();

    let err = flow.run(&mut ctx).await.unwrap_err();

    assert!(err.to_string().contains("model overloaded"));
    assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    assert!(ctx.read_opt(&DRAFT).unwrap().is_none());
}

// =============================================================================
// Embedding and retrieval
// =============================================================================

const INDEX: &str = "index";

struct EmbedChunks {
    embedder: Arc<dyn EmbeddingModel>,
}

#[async_trait]
impl AsyncBatchNode for EmbedChunks {
    type Item = String;
    type Output = Embedding;

    async fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<Vec<String>> {
        ctx.require("chunks")
    }

    async fn compute(&self, chunk: &String) -> Result<Embedding> {
        let mut vectors = self.embedder.embed(std::slice::from_ref(chunk)).await?;
        vectors
            .pop()
            .ok_or_else(|| FlowError::node("embedding model returned nothing"))
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        _chunks: Vec<String>,
        vectors: Vec<Embedding>,
    ) -> Result<Option<Outcome>> {
        let index = ctx.require_resource::<MemoryIndex>(INDEX)?;
        index.add(&vectors).await?;
        ctx.set("indexed", &vectors.len())?;
        Ok(None)
    }
}

struct Retrieve {
    embedder: Arc<dyn EmbeddingModel>,
}

#[async_trait]
impl AsyncNode for Retrieve {
    type Prepared = (String, Arc<MemoryIndex>);
    type Output = Vec<Neighbor>;

    async fn prepare(
        &self,
        ctx: &mut Context,
        _params: &Params,
    ) -> Result<(String, Arc<MemoryIndex>)> {
        Ok((ctx.require("query")?, ctx.require_resource(INDEX)?))
    }

    async fn compute(&self, (query, index): &(String, Arc<MemoryIndex>)) -> Result<Vec<Neighbor>> {
        let query = self.embedder.embed(&[query.clone()]).await?;
        index.nearest(&query[0], 1).await
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        _: (String, Arc<MemoryIndex>),
        neighbors: Vec<Neighbor>,
    ) -> Result<Option<Outcome>> {
        let chunks: Vec<String> = ctx.require("chunks")?;
        match neighbors.first() {
            Some(best) => {
                ctx.set("best_chunk", &chunks[best.index])?;
                Ok(Some("found".into()))
            }
            None => Ok(Some("empty".into())),
        }
    }
}

#[tokio::test]
async fn test_concurrent_embedding_then_retrieval() {
    let embedder: Arc<dyn EmbeddingModel> = Arc::new(LetterEmbedder);
    let flow = AsyncFlow::builder("rag")
        .concurrent_batch_node("embed", EmbedChunks { embedder: embedder.clone() })
        .node("retrieve", Retrieve { embedder })
        .start("embed")
        .edge("embed", "retrieve")
        .build()
        .unwrap();

    let mut ctx = Context::try_from(json!({
        "chunks": ["apple pie", "zebra zoo", "carrot cake", "kiwi"],
        "query": "zoo zebra",
    }))
    .unwrap();
    ctx.insert_resource(INDEX, MemoryIndex::default());

    let outcome = flow.run(&mut ctx).await.unwrap();

    assert_eq!(outcome, "found");
    assert_eq!(ctx.require::<usize>("indexed").unwrap(), 4);
    assert_eq!(ctx.require::<String>("best_chunk").unwrap(), "zebra zoo");
    // vectors were stored in chunk order despite uneven latency
    let index = ctx.require_resource::<MemoryIndex>(INDEX).unwrap();
    let stored = index.vectors.lock().unwrap();
    assert_eq!(stored[3][(b'k' - b'a') as usize], 1.0);
    assert_eq!(stored[3][(b'i' - b'a') as usize], 2.0);
}

#[tokio::test]
async fn test_missing_resource_fails_batch() {
    let flow = AsyncFlow::builder("no_index")
        .concurrent_batch_node(
            "embed",
            EmbedChunks {
                embedder: Arc::new(LetterEmbedder),
            },
        )
        .start("embed")
        .build()
        .unwrap();

    let mut ctx = Context::try_from(json!({"chunks": ["a"]})).unwrap();
    let err = flow.run(&mut ctx).await.unwrap_err();
    assert!(matches!(err, FlowError::MissingResource(ref key) if key == INDEX));
}

// =============================================================================
// Fan-out timing and ordering
// =============================================================================

/// "Fetches" a page by sleeping for its delay
struct FetchPages {
    finished: Mutex<Vec<usize>>,
}

#[async_trait]
impl AsyncBatchNode for FetchPages {
    type Item = (usize, u64);
    type Output = ItemResult<String>;

    async fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<Vec<(usize, u64)>> {
        let delays: Vec<u64> = ctx.require("delays")?;
        Ok(delays.into_iter().enumerate().collect())
    }

    async fn compute(&self, (page, delay): &(usize, u64)) -> Result<ItemResult<String>> {
        sleep(Duration::from_millis(*delay)).await;
        self.finished.lock().unwrap().push(*page);
        if *delay == 0 {
            return Err(FlowError::node(format!("page {} is empty", page)));
        }
        Ok(Ok(format!("page-{}", page)))
    }

    async fn fallback(&self, _: &(usize, u64), error: FlowError) -> Result<ItemResult<String>> {
        Ok(Err(ItemFailure::from_error(&error)))
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        _: Vec<(usize, u64)>,
        pages: Vec<ItemResult<String>>,
    ) -> Result<Option<Outcome>> {
        let rendered: Vec<String> = pages
            .iter()
            .map(|page| match page {
                Ok(body) => body.clone(),
                Err(failure) => failure.to_string(),
            })
            .collect();
        ctx.set("pages", &rendered)?;
        let (_, failed) = split_failures(pages);
        Ok(Some(if failed.is_empty() { "complete" } else { "partial" }.into()))
    }
}

#[tokio::test]
async fn test_concurrent_fan_out_overlaps_and_keeps_order() {
    let flow = AsyncFlow::builder("crawl")
        .concurrent_batch_node(
            "fetch",
            FetchPages {
                finished: Mutex::new(Vec::new()),
            },
        )
        .start("fetch")
        .build()
        .unwrap();

    let mut ctx = Context::try_from(json!({"delays": [50, 10, 40, 20, 30]})).unwrap();

    let start = Instant::now();
    let outcome = flow.run(&mut ctx).await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(outcome, "complete");
    assert_eq!(
        ctx.require::<Vec<String>>("pages").unwrap(),
        vec!["page-0", "page-1", "page-2", "page-3", "page-4"]
    );
    // sequential would take 150ms
    assert!(elapsed < Duration::from_millis(120), "took {:?}", elapsed);
}

#[tokio::test]
async fn test_sequential_fan_out_takes_sum_of_waits() {
    let flow = AsyncFlow::builder("crawl")
        .batch_node(
            "fetch",
            FetchPages {
                finished: Mutex::new(Vec::new()),
            },
        )
        .start("fetch")
        .build()
        .unwrap();

    let mut ctx = Context::try_from(json!({"delays": [20, 10, 20]})).unwrap();

    let start = Instant::now();
    flow.run(&mut ctx).await.unwrap();

    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_placeholders_reported_in_place() {
    let flow = AsyncFlow::builder("crawl")
        .concurrent_batch_node(
            "fetch",
            FetchPages {
                finished: Mutex::new(Vec::new()),
            },
        )
        .start("fetch")
        .build()
        .unwrap();

    let mut ctx = Context::try_from(json!({"delays": [10, 0, 5]})).unwrap();
    let outcome = flow.run(&mut ctx).await.unwrap();

    assert_eq!(outcome, "partial");
    let pages: Vec<String> = ctx.require("pages").unwrap();
    assert_eq!(pages[0], "page-0");
    assert!(pages[1].starts_with("item failed:"));
    assert!(pages[1].contains("page 1 is empty"));
    assert_eq!(pages[2], "page-2");
}

// =============================================================================
// Batch flows
// =============================================================================

struct Topics;

#[async_trait]
impl AsyncFlowBatch for Topics {
    async fn prepare(&self, ctx: &mut Context, _params: &Params) -> Result<Vec<Params>> {
        let topics: Vec<String> = ctx.require("topics")?;
        Ok(topics
            .into_iter()
            .map(|topic| {
                let mut params = Params::new();
                params.insert("topic".into(), json!(topic));
                params
            })
            .collect())
    }

    async fn finalize(&self, _ctx: &mut Context, sets: Vec<Params>) -> Result<Option<Outcome>> {
        Ok(Some(format!("ran_{}", sets.len()).into()))
    }
}

struct Summarize {
    model: Arc<dyn CompletionModel>,
}

#[async_trait]
impl AsyncNode for Summarize {
    type Prepared = String;
    type Output = String;

    async fn prepare(&self, _ctx: &mut Context, params: &Params) -> Result<String> {
        params
            .get("topic")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| FlowError::node("topic param missing"))
    }

    async fn compute(&self, topic: &String) -> Result<String> {
        self.model.prompt(topic).await
    }

    async fn finalize(
        &self,
        ctx: &mut Context,
        topic: String,
        summary: String,
    ) -> Result<Option<Outcome>> {
        let mut summaries: Vec<String> = ctx.get_as("summaries")?.unwrap_or_default();
        summaries.push(format!("{}={}", topic, summary));
        ctx.set("summaries", &summaries)?;
        Ok(None)
    }
}

#[tokio::test]
async fn test_async_batch_flow_nested() {
    let model = Arc::new(ScriptedModel::new(&[Some("fast"), Some("safe")]));
    let per_topic = AsyncFlow::builder("per_topic")
        .node("summarize", Summarize { model })
        .start("summarize")
        .build()
        .unwrap();

    let outer = AsyncFlow::builder("report")
        .subflow("topics", AsyncBatchFlow::new(per_topic, Topics))
        .start("topics")
        .build()
        .unwrap();

    let mut ctx = Context::try_from(json!({"topics": ["speed", "safety"]})).unwrap();
    let outcome = outer.run(&mut ctx).await.unwrap();

    assert_eq!(outcome, "ran_2");
    assert_eq!(
        ctx.require::<Vec<String>>("summaries").unwrap(),
        vec!["speed=fast", "safety=safe"]
    );
}

//! Shared fixtures: a scripted LLM, a scripted vector store, and a fixed
//! embedder, wired into an orchestrator the integration suites drive.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use kallgrund::config::EngineConfig;
use kallgrund::embedding::EmbeddingProvider;
use kallgrund::error::{EmbeddingError, LlmError, StoreError};
use kallgrund::llm::{ChatParams, LlmGateway, StreamItem, StreamStats, TokenStream};
use kallgrund::message::ChatMessage;
use kallgrund::orchestrator::Orchestrator;
use kallgrund::vector_store::{VectorHit, VectorStore};

/// Scripted LLM gateway.
///
/// Calls are routed on the system prompt (rewrite, grading, reflection,
/// revision, decontextualization) to their own queues, so concurrent
/// sub-calls cannot steal each other's replies. Generation replies pop from
/// `generations`; an empty queue fails the call, which is how tests script
/// "the model is down".
#[derive(Default)]
pub struct MockLlm {
    pub generations: Mutex<VecDeque<String>>,
    pub rewrites: Mutex<VecDeque<String>>,
    pub revisions: Mutex<VecDeque<String>>,
    pub reflections: Mutex<VecDeque<String>>,
    pub decontextualizations: Mutex<VecDeque<String>>,
    /// `(needle, reply)` pairs matched against the grading prompt.
    pub grade_rules: Mutex<Vec<(String, String)>>,
    /// When set, generation replies repeat instead of draining.
    pub repeat_generations: bool,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_generation(&self, reply: impl Into<String>) {
        self.generations.lock().unwrap().push_back(reply.into());
    }

    pub fn push_rewrite(&self, reply: impl Into<String>) {
        self.rewrites.lock().unwrap().push_back(reply.into());
    }

    pub fn push_revision(&self, reply: impl Into<String>) {
        self.revisions.lock().unwrap().push_back(reply.into());
    }

    pub fn push_reflection(&self, reply: impl Into<String>) {
        self.reflections.lock().unwrap().push_back(reply.into());
    }

    pub fn push_decontextualization(&self, reply: impl Into<String>) {
        self.decontextualizations.lock().unwrap().push_back(reply.into());
    }

    pub fn grade_rule(&self, needle: impl Into<String>, reply: impl Into<String>) {
        self.grade_rules.lock().unwrap().push((needle.into(), reply.into()));
    }

    fn pop(queue: &Mutex<VecDeque<String>>) -> Result<String, LlmError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Transport("no scripted reply".to_string()))
    }

    fn next_generation(&self) -> Result<String, LlmError> {
        let mut queue = self.generations.lock().unwrap();
        if self.repeat_generations {
            return queue
                .front()
                .cloned()
                .ok_or_else(|| LlmError::Transport("no scripted reply".to_string()));
        }
        queue
            .pop_front()
            .ok_or_else(|| LlmError::Transport("no scripted reply".to_string()))
    }

    fn route(&self, system: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let user = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        if system.contains("skriver om sökfrågor") {
            return Self::pop(&self.rewrites);
        }
        if system.contains("bedömer om ett dokument") {
            let rules = self.grade_rules.lock().unwrap();
            for (needle, reply) in rules.iter() {
                if user.contains(needle.as_str()) {
                    return Ok(reply.clone());
                }
            }
            return Ok(r#"{"relevant": true, "score": 0.9, "reason": "relevant"}"#.to_string());
        }
        if system.contains("urval av dokument") {
            return Self::pop(&self.reflections);
        }
        if system.contains("reviderar") {
            return Self::pop(&self.revisions);
        }
        if user.contains("fristående") {
            return Self::pop(&self.decontextualizations);
        }
        self.next_generation()
    }
}

#[async_trait]
impl LlmGateway for MockLlm {
    async fn chat(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _params: &ChatParams,
    ) -> Result<String, LlmError> {
        self.route(system, messages)
    }

    async fn chat_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _params: &ChatParams,
    ) -> Result<TokenStream, LlmError> {
        let full = self.route(system, messages)?;
        let mut items: Vec<Result<StreamItem, LlmError>> = full
            .split_inclusive(' ')
            .map(|token| Ok(StreamItem::token(token)))
            .collect();
        items.push(Ok(StreamItem::done(StreamStats {
            tokens_generated: items.len() as u32,
            model_used: "mock-model".to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
        })));
        Ok(Box::pin(stream::iter(items)))
    }
}

/// Vector store answering searches from a queue, then a fallback.
pub struct ScriptedStore {
    queue: Mutex<VecDeque<Vec<VectorHit>>>,
    fallback: Vec<VectorHit>,
}

impl ScriptedStore {
    /// Every search returns `hits`.
    pub fn always(hits: Vec<VectorHit>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: hits,
        }
    }

    /// Searches pop from `responses`; once drained, `fallback` answers.
    pub fn sequence(responses: Vec<Vec<VectorHit>>, fallback: Vec<VectorHit>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            fallback,
        }
    }

    /// A store with nothing in it.
    pub fn empty() -> Self {
        Self::always(Vec::new())
    }
}

#[async_trait]
impl VectorStore for ScriptedStore {
    async fn search(&self, _vector: &[f32], k: usize) -> Result<Vec<VectorHit>, StoreError> {
        let mut hits = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        hits.truncate(k);
        Ok(hits)
    }
}

/// Embedder returning a constant unit vector; retrieval scores are fully
/// controlled by the scripted store.
pub struct FixedEmbedder;

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![1.0, 0.0, 0.0])
    }
}

/// Build one scripted hit.
pub fn hit(id: &str, title: &str, text: &str, score: f32, source: &str, doc_type: &str) -> VectorHit {
    VectorHit {
        id: id.to_string(),
        score,
        payload: json!({
            "title": title,
            "text": text,
            "source": source,
            "doc_type": doc_type,
        }),
    }
}

/// Wire a full orchestrator over the mocks.
pub fn orchestrator(
    config: EngineConfig,
    llm: Arc<MockLlm>,
    store: Arc<ScriptedStore>,
) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::builder(config)
            .llm(llm)
            .embedder(Arc::new(FixedEmbedder))
            .vector_store(store)
            .build()
            .expect("all providers supplied"),
    )
}

/// A structured EVIDENCE answer citing `doc_id` as `[1]`.
pub fn evidence_json(svar: &str, doc_id: &str) -> String {
    json!({
        "mode": "EVIDENCE",
        "saknas_underlag": false,
        "svar": svar,
        "kallor": [{
            "doc_id": doc_id,
            "chunk_id": format!("{doc_id}_chunk_1"),
            "citat": "citerat stycke",
            "loc": "stycke 1",
        }],
        "fakta_utan_kalla": [],
    })
    .to_string()
}

/// Collect a full SSE stream into its events.
pub async fn drain_stream(
    handle: kallgrund::orchestrator::streaming::StreamHandle,
) -> Vec<kallgrund::sse::SseEvent> {
    let mut events = Vec::new();
    while let Ok(event) = handle.events.recv_async().await {
        events.push(event);
    }
    events
}

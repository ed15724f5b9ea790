//! SSE ordering contract and cancellation behavior.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockLlm, ScriptedStore, drain_stream, hit, orchestrator};
use kallgrund::config::EngineConfig;
use kallgrund::orchestrator::QueryRequest;
use kallgrund::message::ChatMessage;
use kallgrund::sse::{SseEvent, encode};
use kallgrund::types::{ResponseMode, StrategyKind};

fn law_store() -> Arc<ScriptedStore> {
    Arc::new(ScriptedStore::always(vec![hit(
        "sfs_2018_218",
        "Dataskyddslagen",
        "Kompletterande bestämmelser till GDPR.",
        0.9,
        "riksdagen",
        "sfs",
    )]))
}

/// Full ordering: metadata, decontextualized, tokens, corrections, done —
/// and nothing after done.
#[tokio::test]
async fn event_order_with_decontextualization_and_corrections() {
    let llm = Arc::new(MockLlm::new());
    llm.push_decontextualization("Vad säger dataskyddslagen om personer med demenssjukdom?");
    // The answer contains a discouraged term so the guardrail corrects it.
    llm.push_generation(
        serde_json::json!({
            "mode": "EVIDENCE",
            "saknas_underlag": false,
            "svar": "Lagen skyddar uppgifter om en dement person [1].",
            "kallor": [{
                "doc_id": "sfs_2018_218",
                "chunk_id": "sfs_2018_218_chunk_1",
                "citat": "kompletterande bestämmelser",
                "loc": "1 kap",
            }],
            "fakta_utan_kalla": [],
        })
        .to_string(),
    );
    let engine = orchestrator(EngineConfig::default(), llm, law_store());

    let request = QueryRequest::new("Vad gäller för samma lag då?")
        .with_mode(ResponseMode::Evidence)
        .with_history(vec![
            ChatMessage::user("Vad säger dataskyddslagen?"),
            ChatMessage::assistant("Den kompletterar GDPR."),
        ]);
    let events = drain_stream(engine.stream_query(request)).await;

    let labels: Vec<&str> = events.iter().map(SseEvent::label).collect();
    assert_eq!(labels.first(), Some(&"metadata"));
    assert_eq!(labels.get(1), Some(&"decontextualized"));
    assert!(labels.iter().filter(|l| **l == "token").count() >= 2);
    let corrections_at = labels.iter().position(|l| *l == "corrections").unwrap();
    let done_at = labels.iter().position(|l| *l == "done").unwrap();
    let last_token_at = labels.iter().rposition(|l| *l == "token").unwrap();
    assert!(last_token_at < corrections_at);
    assert_eq!(done_at, labels.len() - 1, "no event may follow done");

    match &events[corrections_at] {
        SseEvent::Corrections {
            corrections,
            corrected_text,
        } => {
            assert_eq!(corrections[0].original, "dement");
            assert!(corrected_text.contains("person med demenssjukdom"));
            assert!(corrected_text.contains("[1]"));
        }
        other => panic!("expected corrections, got {other:?}"),
    }
}

/// Metadata always leads and carries the retrieved sources.
#[tokio::test]
async fn metadata_is_first_and_carries_sources() {
    let llm = Arc::new(MockLlm::new());
    llm.push_generation(common::evidence_json(
        "Dataskyddslagen kompletterar GDPR [1].",
        "sfs_2018_218",
    ));
    let engine = orchestrator(EngineConfig::default(), llm, law_store());

    let events = drain_stream(engine.stream_query(
        QueryRequest::new("Vad gäller enligt dataskyddslagen?").with_mode(ResponseMode::Evidence),
    ))
    .await;

    match events.first().unwrap() {
        SseEvent::Metadata {
            mode,
            sources,
            evidence_level: _,
        } => {
            assert_eq!(*mode, ResponseMode::Evidence);
            assert_eq!(sources.len(), 1);
            assert_eq!(sources[0].id, "sfs_2018_218");
        }
        other => panic!("expected metadata first, got {other:?}"),
    }
    assert!(matches!(events.last().unwrap(), SseEvent::Done { .. }));
}

/// Chat streams skip retrieval: empty sources, tokens, done.
#[tokio::test]
async fn chat_stream_has_no_sources() {
    let llm = Arc::new(MockLlm::new());
    llm.push_generation("Hej! Vad kan jag hjälpa dig med?");
    let engine = orchestrator(EngineConfig::default(), llm, Arc::new(ScriptedStore::empty()));

    let events = drain_stream(engine.stream_query(QueryRequest::new("Hej!"))).await;

    match events.first().unwrap() {
        SseEvent::Metadata { mode, sources, .. } => {
            assert_eq!(*mode, ResponseMode::Chat);
            assert!(sources.is_empty());
        }
        other => panic!("expected metadata first, got {other:?}"),
    }
    assert!(events.iter().any(|e| matches!(e, SseEvent::Token { .. })));
    assert!(matches!(events.last().unwrap(), SseEvent::Done { .. }));
}

/// An empty corpus streams the refusal: metadata with no sources, the
/// template as a token, done.
#[tokio::test]
async fn refusal_streams_template_token() {
    let llm = Arc::new(MockLlm::new());
    let config = EngineConfig::default();
    let template = config.evidence_refusal_template.clone();
    let engine = orchestrator(config, llm, Arc::new(ScriptedStore::empty()));

    let events = drain_stream(engine.stream_query(
        QueryRequest::new("Vad är folkmängden enligt SCB?").with_mode(ResponseMode::Evidence),
    ))
    .await;

    match events.first().unwrap() {
        SseEvent::Metadata { sources, .. } => assert!(sources.is_empty()),
        other => panic!("expected metadata first, got {other:?}"),
    }
    assert!(events.iter().any(|e| matches!(
        e,
        SseEvent::Token { content } if content == &template
    )));
    assert!(matches!(events.last().unwrap(), SseEvent::Done { .. }));
}

/// Cancelling the handle stops the feed without a terminal event.
#[tokio::test]
async fn cancellation_stops_the_feed() {
    let llm = Arc::new(MockLlm::new());
    llm.push_generation(common::evidence_json(
        "Dataskyddslagen kompletterar GDPR [1].",
        "sfs_2018_218",
    ));
    let engine = orchestrator(EngineConfig::default(), llm, law_store());

    let handle = engine.stream_query(
        QueryRequest::new("Vad gäller enligt dataskyddslagen?").with_mode(ResponseMode::Evidence),
    );
    handle.cancel();

    let mut events = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(
        Duration::from_millis(200),
        handle.events.recv_async(),
    )
    .await
    {
        events.push(event);
    }
    // The producer stopped at the next suspension point: whatever arrived,
    // no terminal event was emitted.
    assert!(events.iter().all(|e| !e.is_terminal()));
}

/// Streamed frames never leak internal fields.
#[tokio::test]
async fn stream_frames_have_no_internal_fields() {
    let llm = Arc::new(MockLlm::new());
    llm.push_generation(common::evidence_json(
        "Dataskyddslagen kompletterar GDPR [1].",
        "sfs_2018_218",
    ));
    let engine = orchestrator(EngineConfig::default(), llm, law_store());

    let events = drain_stream(engine.stream_query(
        QueryRequest::new("Vad gäller enligt dataskyddslagen?").with_mode(ResponseMode::Evidence),
    ))
    .await;

    for event in &events {
        let frame = encode(event).unwrap();
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
        // Tokens may quote the model's raw JSON, but the engine's own
        // metadata/corrections payloads never carry internal fields.
        if !matches!(event, SseEvent::Token { .. }) {
            assert!(!frame.contains("arbetsanteckning"));
            assert!(!frame.contains("reasoning_steps"));
        }
    }
}

/// An invalid request errors out as the single terminal event.
#[tokio::test]
async fn invalid_request_streams_one_error() {
    let llm = Arc::new(MockLlm::new());
    let engine = orchestrator(EngineConfig::default(), llm, Arc::new(ScriptedStore::empty()));

    let events = drain_stream(
        engine.stream_query(QueryRequest::new(String::new()).with_strategy(StrategyKind::Adaptive)),
    )
    .await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], SseEvent::Error { .. }));
}

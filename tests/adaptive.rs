//! Adaptive retrieval: the confidence-driven escalation ladder.

mod common;

use std::sync::Arc;

use common::{MockLlm, ScriptedStore, evidence_json, hit, orchestrator};
use kallgrund::config::EngineConfig;
use kallgrund::orchestrator::QueryRequest;
use kallgrund::types::{ResponseMode, StrategyKind};
use kallgrund::vector_store::VectorHit;

fn weak_hits() -> Vec<VectorHit> {
    vec![
        hit("svag_1", "Motion A", "Ett dokument om något annat.", 0.2, "riksdagen", "mot"),
        hit("svag_2", "Motion B", "Ännu ett svagt träffat dokument.", 0.18, "riksdagen", "mot"),
        hit("svag_3", "Motion C", "Tredje svaga dokumentet.", 0.15, "riksdagen", "mot"),
    ]
}

fn strong_hits() -> Vec<VectorHit> {
    vec![
        hit(
            "stark_1",
            "Dataskyddslagen",
            "Kompletterande bestämmelser till GDPR.",
            0.82,
            "riksdagen",
            "sfs",
        ),
        hit(
            "stark_2",
            "GDPR Proposition",
            "Propositionen bakom dataskyddslagen.",
            0.5,
            "regeringen",
            "prop",
        ),
        hit(
            "stark_3",
            "SOU 2017:39",
            "Utredningen om dataskydd.",
            0.3,
            "riksdagen",
            "sou",
        ),
    ]
}

/// Step A scores too low, step B clears every trigger: the path is `[A, B]`
/// with no fallback.
#[tokio::test]
async fn escalation_stops_at_the_first_acceptable_step() {
    let llm = Arc::new(MockLlm::new());
    llm.push_generation(evidence_json(
        "Dataskyddslagen kompletterar GDPR [1].",
        "stark_1",
    ));
    // Paraphrase queues are empty, so each ladder step fuses the original
    // query alone: one store search per step.
    let store = Arc::new(ScriptedStore::sequence(
        vec![weak_hits(), strong_hits()],
        Vec::new(),
    ));
    let engine = orchestrator(EngineConfig::default(), llm, store);

    let result = engine
        .process_query(
            QueryRequest::new("Vad gäller enligt dataskyddslagen?")
                .with_mode(ResponseMode::Evidence)
                .with_strategy(StrategyKind::Adaptive),
        )
        .await
        .unwrap();

    assert!(!result.saknas_underlag);
    let retrieval = &result.metrics.retrieval;
    assert_eq!(
        retrieval.escalation_path.as_deref(),
        Some(["A".to_string(), "B".to_string()].as_slice())
    );
    assert_eq!(retrieval.final_step.as_deref(), Some("B"));
    assert_eq!(retrieval.fallback_triggered, Some(false));
    assert!(retrieval.top_score > 0.8);
}

/// A ladder that never clears the triggers exhausts into step D and the
/// refusal path.
#[tokio::test]
async fn exhausted_ladder_falls_back_to_refusal() {
    let llm = Arc::new(MockLlm::new());
    let store = Arc::new(ScriptedStore::always(weak_hits()));
    let config = EngineConfig::default();
    let template = config.evidence_refusal_template.clone();
    let engine = orchestrator(config, llm, store);

    let result = engine
        .process_query(
            QueryRequest::new("Vad gäller enligt dataskyddslagen?")
                .with_mode(ResponseMode::Evidence)
                .with_strategy(StrategyKind::Adaptive),
        )
        .await
        .unwrap();

    assert_eq!(result.answer, template);
    assert!(result.saknas_underlag);
    assert!(result.sources.is_empty());
    let retrieval = &result.metrics.retrieval;
    assert_eq!(
        retrieval.escalation_path.as_deref(),
        Some(
            ["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()].as_slice()
        )
    );
    assert_eq!(retrieval.final_step.as_deref(), Some("D"));
    assert_eq!(retrieval.fallback_triggered, Some(true));
}

/// The escalation path is always a monotone prefix of `A → B → C → D`:
/// no repeats, at most three escalations.
#[tokio::test]
async fn escalation_path_is_a_monotone_prefix() {
    for scripted in [
        vec![strong_hits()],
        vec![weak_hits(), strong_hits()],
        vec![weak_hits(), weak_hits(), strong_hits()],
        vec![weak_hits(), weak_hits(), weak_hits()],
    ] {
        let llm = Arc::new(MockLlm::new());
        llm.push_generation(evidence_json("Svar med stöd [1].", "stark_1"));
        let store = Arc::new(ScriptedStore::sequence(scripted, weak_hits()));
        let engine = orchestrator(EngineConfig::default(), llm, store);

        let result = engine
            .process_query(
                QueryRequest::new("Vad gäller enligt dataskyddslagen?")
                    .with_mode(ResponseMode::Evidence)
                    .with_strategy(StrategyKind::Adaptive),
            )
            .await
            .unwrap();

        let path = result
            .metrics
            .retrieval
            .escalation_path
            .clone()
            .expect("adaptive runs always record a path");
        let full = ["A", "B", "C", "D"];
        assert!(path.len() <= 4);
        for (step, expected) in path.iter().zip(full) {
            assert_eq!(step, expected);
        }
    }
}

/// A strong first step returns immediately: path `[A]`.
#[tokio::test]
async fn strong_first_step_skips_escalation() {
    let llm = Arc::new(MockLlm::new());
    llm.push_generation(evidence_json(
        "Dataskyddslagen kompletterar GDPR [1].",
        "stark_1",
    ));
    let store = Arc::new(ScriptedStore::always(strong_hits()));
    let engine = orchestrator(EngineConfig::default(), llm, store);

    let result = engine
        .process_query(
            QueryRequest::new("Vad gäller enligt dataskyddslagen?")
                .with_mode(ResponseMode::Evidence)
                .with_strategy(StrategyKind::Adaptive),
        )
        .await
        .unwrap();

    let retrieval = &result.metrics.retrieval;
    assert_eq!(
        retrieval.escalation_path.as_deref(),
        Some(["A".to_string()].as_slice())
    );
    assert_eq!(retrieval.fallback_triggered, Some(false));
}

/// An impossible must-include token keeps the hit rate at zero and forces
/// the ladder through every step.
#[tokio::test]
async fn impossible_must_include_escalates_fully() {
    let llm = Arc::new(MockLlm::new());
    let store = Arc::new(ScriptedStore::always(strong_hits()));
    let engine = orchestrator(EngineConfig::default(), llm, store);

    // 9999:999 appears nowhere in the corpus.
    let result = engine
        .process_query(
            QueryRequest::new("Vad gäller enligt 9999:999 om dataskydd?")
                .with_mode(ResponseMode::Evidence)
                .with_strategy(StrategyKind::Adaptive),
        )
        .await
        .unwrap();

    assert!(result.saknas_underlag);
    assert_eq!(
        result.metrics.retrieval.final_step.as_deref(),
        Some("D")
    );
}

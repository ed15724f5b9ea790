//! Property tests for the parsing and normalization layers.

use proptest::prelude::*;

use kallgrund::retrieval::Retriever;
use kallgrund::structured::{Citation, StructuredAnswer, StructuredOutputService, citation_markers};
use kallgrund::types::ResponseMode;
use kallgrund::vector_store::VectorHit;

fn arb_mode() -> impl Strategy<Value = ResponseMode> {
    prop_oneof![
        Just(ResponseMode::Chat),
        Just(ResponseMode::Assist),
        Just(ResponseMode::Evidence),
    ]
}

fn arb_citation() -> impl Strategy<Value = Citation> {
    (
        "[a-z0-9_]{1,12}",
        "[a-z0-9_]{0,12}",
        ".{0,40}",
        ".{0,10}",
    )
        .prop_map(|(doc_id, chunk_id, citat, loc)| Citation {
            doc_id,
            chunk_id,
            citat,
            loc,
        })
}

fn arb_answer() -> impl Strategy<Value = StructuredAnswer> {
    (
        arb_mode(),
        any::<bool>(),
        ".{0,200}",
        prop::collection::vec(arb_citation(), 0..4),
        prop::collection::vec(".{0,30}".prop_map(String::from), 0..3),
    )
        .prop_map(|(mode, saknas_underlag, svar, kallor, fakta_utan_kalla)| StructuredAnswer {
            mode,
            saknas_underlag,
            svar,
            kallor,
            fakta_utan_kalla,
            arbetsanteckning: None,
        })
}

proptest! {
    /// A serialized answer re-parses to the same logical object, even when
    /// wrapped the way models like to wrap JSON.
    #[test]
    fn structured_answer_round_trips(answer in arb_answer()) {
        let service = StructuredOutputService::new(true);
        let json = serde_json::to_string(&answer).unwrap();

        let reparsed = service.parse(&json, answer.mode).unwrap();
        prop_assert_eq!(&reparsed, &answer);

        let fenced = format!("```json\n{json}\n```");
        let reparsed_fenced = service.parse(&fenced, answer.mode).unwrap();
        prop_assert_eq!(&reparsed_fenced, &answer);
    }

    /// Marker extraction never panics and only reports markers that appear
    /// literally in the text.
    #[test]
    fn citation_marker_extraction_is_sound(text in ".{0,300}") {
        let markers = citation_markers(&text);
        for marker in markers {
            let needle = format!("[{marker}]");
            prop_assert!(text.contains(&needle));
        }
    }

    /// Mapped search results always carry scores in [0, 1].
    #[test]
    fn mapped_scores_stay_in_unit_interval(score in -10.0f32..10.0) {
        let hits = vec![VectorHit {
            id: "doc".to_string(),
            score,
            payload: serde_json::json!({"title": "T", "text": "x", "source": "s"}),
        }];
        let results = Retriever::to_results(hits, "test");
        prop_assert!(results[0].score >= 0.0);
        prop_assert!(results[0].score <= 1.0);
    }
}

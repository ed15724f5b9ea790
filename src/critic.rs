//! Critique and revision of candidate answers.
//!
//! The critic runs a fixed battery of constitutional checks over a parsed
//! candidate: mode echo, citation coverage, opinion language, speculation
//! under a refusal. Checks are deterministic; only [`CriticService::revise`]
//! calls the LLM, handing it the critic's findings and asking for a repaired
//! JSON answer. The orchestrator owns the critique→revise loop and its
//! bound.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::error::LlmError;
use crate::llm::{ChatParams, LlmGateway};
use crate::message::ChatMessage;
use crate::retrieval::SearchResult;
use crate::structured::{StructuredAnswer, citation_markers};
use crate::types::ResponseMode;

/// Opinion language banned from evidence answers.
const OPINION_MARKERS: &[&str] = &[
    "bra",
    "dåligt",
    "dålig",
    "rättvis",
    "rättvist",
    "orättvis",
    "orättvist",
    "bäst",
    "sämst",
    "borde",
    "tyvärr är det fel",
];

/// Speculation language banned when the material is declared insufficient.
const SPECULATION_MARKERS: &[&str] = &[
    "kommer att",
    "troligen",
    "förmodligen",
    "antagligen",
    "sannolikt",
    "kanske",
    "gissningsvis",
];

/// Verdict on a candidate answer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CriticResult {
    /// True when every check passed.
    pub ok: bool,
    /// Human-readable findings, one per failed check.
    pub errors: Vec<String>,
    /// Suggested remedy handed to the revision call.
    pub remedy: String,
    /// Wall-clock of the critique.
    pub latency_ms: u64,
}

impl CriticResult {
    fn passed(latency_ms: u64) -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            remedy: String::new(),
            latency_ms,
        }
    }
}

const REVISE_SYSTEM: &str = "Du reviderar ett JSON-svar som underkänts av en granskare. Åtgärda \
     felen utan att ändra innebörden i övrigt. Svara ENDAST med det \
     korrigerade JSON-objektet.";

/// Runs constitutional checks and requests revisions.
pub struct CriticService {
    llm: Arc<dyn LlmGateway>,
    critique_budget: Duration,
    revise_budget: Duration,
}

impl CriticService {
    /// Build the service over the shared gateway.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmGateway>, critique_budget: Duration, revise_budget: Duration) -> Self {
        Self {
            llm,
            critique_budget,
            revise_budget,
        }
    }

    /// Run all checks, in order, over a parsed candidate.
    #[must_use]
    pub fn critique(
        &self,
        candidate: &StructuredAnswer,
        expected_mode: ResponseMode,
        sources: &[SearchResult],
    ) -> CriticResult {
        let started = Instant::now();
        let mut errors = Vec::new();

        // 1. Mode echo.
        if candidate.mode != expected_mode {
            errors.push(format!(
                "mode {} avviker från klassificerat läge {}",
                candidate.mode, expected_mode
            ));
        }

        // 2. Citation coverage in evidence answers.
        if expected_mode == ResponseMode::Evidence && !candidate.saknas_underlag {
            let markers = citation_markers(&candidate.svar);
            if markers.is_empty() {
                errors.push("svaret saknar källhänvisningar [n]".to_string());
            }
            for marker in &markers {
                if *marker == 0 || *marker > candidate.kallor.len() {
                    errors.push(format!(
                        "hänvisningen [{marker}] pekar utanför kallor (längd {})",
                        candidate.kallor.len()
                    ));
                }
            }
            for citation in &candidate.kallor {
                let known = sources
                    .iter()
                    .any(|s| s.id == citation.doc_id || s.id == citation.chunk_id);
                if !known && !sources.is_empty() {
                    errors.push(format!(
                        "källan {} finns inte bland de hämtade dokumenten",
                        citation.doc_id
                    ));
                }
            }
            if !candidate.fakta_utan_kalla.is_empty() {
                errors.push("fakta utan källa är inte tillåtet i bevisläge".to_string());
            }
        }

        // 3. No opinion language in evidence answers.
        if expected_mode == ResponseMode::Evidence {
            let lowered = candidate.svar.to_lowercase();
            for marker in OPINION_MARKERS {
                if contains_word(&lowered, marker) {
                    errors.push(format!("värderande ord: \"{marker}\""));
                }
            }
        }

        // 4. No speculation when the material is declared insufficient.
        if candidate.saknas_underlag {
            let lowered = candidate.svar.to_lowercase();
            for marker in SPECULATION_MARKERS {
                if lowered.contains(marker) {
                    errors.push(format!("spekulation trots saknat underlag: \"{marker}\""));
                }
            }
            if !candidate.kallor.is_empty() {
                errors.push("saknas_underlag med källor angivna".to_string());
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        if errors.is_empty() {
            return CriticResult::passed(latency_ms);
        }
        let remedy = format!(
            "Åtgärda följande och returnera korrigerad JSON: {}",
            errors.join("; ")
        );
        tracing::debug!(?errors, "critique failed");
        CriticResult {
            ok: false,
            errors,
            remedy,
            latency_ms,
        }
    }

    /// Ask the LLM to repair a failed candidate. Returns the raw JSON text
    /// of the revision, to be re-parsed and re-critiqued by the caller.
    pub async fn revise(
        &self,
        candidate_json: &str,
        critique: &CriticResult,
    ) -> Result<String, LlmError> {
        let prompt = format!(
            "Underkänt svar:\n{candidate_json}\n\nGranskarens anmärkningar:\n{remedy}",
            remedy = critique.remedy
        );
        let budget_ms = self.revise_budget.as_millis() as u64;
        timeout(
            self.revise_budget,
            self.llm
                .chat(REVISE_SYSTEM, &[ChatMessage::user(&prompt)], &ChatParams::default()),
        )
        .await
        .map_err(|_| LlmError::Timeout { budget_ms })?
    }

    /// Budget for one critique pass.
    #[must_use]
    pub fn critique_budget(&self) -> Duration {
        self.critique_budget
    }
}

/// Whole-word containment, so "bra" does not fire inside "brand".
fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric() && c != 'å' && c != 'ä' && c != 'ö')
        .any(|token| token == word)
        || (word.contains(' ') && haystack.contains(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenStream;
    use crate::structured::Citation;

    struct OfflineLlm;

    #[async_trait::async_trait]
    impl LlmGateway for OfflineLlm {
        async fn chat(
            &self,
            _: &str,
            _: &[ChatMessage],
            _: &ChatParams,
        ) -> Result<String, LlmError> {
            Err(LlmError::Transport("offline".into()))
        }
        async fn chat_stream(
            &self,
            _: &str,
            _: &[ChatMessage],
            _: &ChatParams,
        ) -> Result<TokenStream, LlmError> {
            Err(LlmError::Transport("offline".into()))
        }
    }

    fn service() -> CriticService {
        CriticService::new(
            Arc::new(OfflineLlm),
            Duration::from_secs(10),
            Duration::from_secs(15),
        )
    }

    fn source(id: &str) -> SearchResult {
        SearchResult {
            id: id.to_string(),
            title: id.to_string(),
            snippet: "text".to_string(),
            score: 0.9,
            source: "test".to_string(),
            doc_type: None,
            date: None,
            retriever: "test".to_string(),
        }
    }

    fn cited_answer() -> StructuredAnswer {
        StructuredAnswer {
            mode: ResponseMode::Evidence,
            saknas_underlag: false,
            svar: "Folkmängden var 10 521 556 personer [1].".to_string(),
            kallor: vec![Citation {
                doc_id: "scb_1".to_string(),
                chunk_id: "chunk_1".to_string(),
                citat: "10 521 556".to_string(),
                loc: "p1".to_string(),
            }],
            fakta_utan_kalla: Vec::new(),
            arbetsanteckning: None,
        }
    }

    #[test]
    fn valid_evidence_answer_passes() {
        let result = service().critique(&cited_answer(), ResponseMode::Evidence, &[source("scb_1")]);
        assert!(result.ok, "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn uncited_evidence_answer_fails() {
        let mut answer = cited_answer();
        answer.svar = "Folkmängden var 10 521 556 personer.".to_string();
        let result = service().critique(&answer, ResponseMode::Evidence, &[source("scb_1")]);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.contains("källhänvisningar")));
    }

    #[test]
    fn marker_out_of_range_fails() {
        let mut answer = cited_answer();
        answer.svar = "Detta stöds av [3].".to_string();
        let result = service().critique(&answer, ResponseMode::Evidence, &[source("scb_1")]);
        assert!(!result.ok);
    }

    #[test]
    fn opinion_language_fails_in_evidence() {
        let mut answer = cited_answer();
        answer.svar = "Skatteförändringen är rättvis [1].".to_string();
        let result = service().critique(&answer, ResponseMode::Evidence, &[source("scb_1")]);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.contains("värderande")));
    }

    #[test]
    fn opinion_word_inside_longer_word_passes() {
        let mut answer = cited_answer();
        answer.svar = "Branden omfattas av lagen [1].".to_string();
        let result = service().critique(&answer, ResponseMode::Evidence, &[source("scb_1")]);
        assert!(result.ok, "errors: {:?}", result.errors);
    }

    #[test]
    fn speculation_under_refusal_fails() {
        let answer = StructuredAnswer {
            mode: ResponseMode::Evidence,
            saknas_underlag: true,
            svar: "Socialdemokraterna kommer att vinna valet.".to_string(),
            kallor: Vec::new(),
            fakta_utan_kalla: Vec::new(),
            arbetsanteckning: None,
        };
        let result = service().critique(&answer, ResponseMode::Evidence, &[]);
        assert!(!result.ok);
        assert!(result.errors.iter().any(|e| e.contains("spekulation")));
    }

    #[test]
    fn fakta_utan_kalla_fails_in_evidence() {
        let mut answer = cited_answer();
        answer.fakta_utan_kalla = vec!["en ociterad uppgift".to_string()];
        let result = service().critique(&answer, ResponseMode::Evidence, &[source("scb_1")]);
        assert!(!result.ok);
    }

    #[test]
    fn mode_mismatch_fails() {
        let answer = cited_answer();
        let result = service().critique(&answer, ResponseMode::Assist, &[source("scb_1")]);
        assert!(!result.ok);
    }

    #[test]
    fn assist_answers_may_skip_citations() {
        let answer = StructuredAnswer {
            mode: ResponseMode::Assist,
            saknas_underlag: false,
            svar: "En proposition är ett förslag från regeringen.".to_string(),
            kallor: Vec::new(),
            fakta_utan_kalla: vec!["förslag från regeringen".to_string()],
            arbetsanteckning: None,
        };
        let result = service().critique(&answer, ResponseMode::Assist, &[]);
        assert!(result.ok, "errors: {:?}", result.errors);
    }
}

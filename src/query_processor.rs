//! Query classification and conversational decontextualization.
//!
//! Every request starts here: the question is classified into `CHAT`,
//! `ASSIST`, or `EVIDENCE`, which fixes the generation parameters and the
//! citation contract for the rest of the pipeline. Classification is
//! lexicon-driven and deterministic; only decontextualization (rewriting a
//! follow-up question to stand alone) touches the LLM, and it fails closed
//! to the original text.

use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::timeout;

use crate::llm::{ChatParams, LlmGateway};
use crate::message::ChatMessage;
use crate::prompt;
use crate::types::ResponseMode;

/// SFS numbers like `2018:218`, the strongest evidence trigger.
static SFS_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4}:\d{1,4})\b").expect("valid regex"));

/// Greetings and pleasantries with no information intent.
const GREETINGS: &[&str] = &[
    "hej",
    "hejsan",
    "tjena",
    "hallå",
    "god morgon",
    "god kväll",
    "god dag",
    "tack",
    "tack så mycket",
    "trevlig helg",
    "hur mår du",
    "vem är du",
];

/// Swedish question words signalling information intent.
const QUESTION_WORDS: &[&str] = &[
    "vad", "vem", "hur", "när", "var", "varför", "vilken", "vilka", "vilket",
];

/// Phrases that demand a factual, citable answer.
const EVIDENCE_MARKERS: &[&str] = &[
    "enligt",
    "statistik",
    "folkmängd",
    "hur många",
    "hur mycket",
    "antal",
    "paragraf",
    "artikel",
    "lagen",
    "lagstöd",
    "förordning",
    "föreskrift",
    "vilket år",
    "när trädde",
    "rättslig grund",
];

/// Phrases that invite explanation or opinion: assist territory.
const ASSIST_MARKERS: &[&str] = &[
    "förklara",
    "beskriv",
    "vad tycker",
    "vad anser",
    "hur fungerar",
    "varför",
    "jämför",
    "sammanfatta",
    "resonera",
    "är det rättvist",
    "är det bra",
];

/// Deictic references that only make sense with the preceding turns.
const DEIXIS_MARKERS: &[&str] = &[
    "den där",
    "det där",
    "denna",
    "detta",
    "dessa",
    "samma",
    "den lagen",
    "det beslutet",
    "vad gäller då",
    "hur är det med",
    "och om",
    "vad sägs om",
    "gäller det",
    "där också",
];

/// Generation configuration derived from the response mode.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeConfig {
    /// Sampling parameters for the generation call.
    pub params: ChatParams,
    /// Which system prompt the generation uses.
    pub system_prompt_id: &'static str,
}

/// Outcome of classifying one question.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    /// The selected response mode.
    pub mode: ResponseMode,
    /// Tokens retrieval is expected to surface (SFS numbers).
    pub must_include: Vec<String>,
}

/// Classifies questions and rewrites follow-ups to stand alone.
pub struct QueryProcessor {
    llm: Arc<dyn LlmGateway>,
    decontextualize_budget: Duration,
}

impl QueryProcessor {
    /// Build the processor over the shared gateway.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmGateway>, decontextualize_budget: Duration) -> Self {
        Self {
            llm,
            decontextualize_budget,
        }
    }

    /// Classify `text`, honoring an explicit mode hint when present.
    #[must_use]
    pub fn classify(&self, text: &str, hint: Option<ResponseMode>) -> Classification {
        let must_include = must_include_tokens(text);
        if let Some(mode) = hint {
            return Classification { mode, must_include };
        }
        Classification {
            mode: classify_text(text),
            must_include,
        }
    }

    /// Generation parameters for a mode.
    #[must_use]
    pub fn mode_config(&self, mode: ResponseMode) -> ModeConfig {
        let params = match mode {
            ResponseMode::Chat => ChatParams {
                temperature: 0.7,
                max_tokens: 512,
            },
            ResponseMode::Assist => ChatParams {
                temperature: 0.4,
                max_tokens: 1024,
            },
            ResponseMode::Evidence => ChatParams {
                temperature: 0.3,
                max_tokens: 1536,
            },
        };
        ModeConfig {
            params,
            system_prompt_id: prompt::system_prompt_id(mode),
        }
    }

    /// Whether the question leans on the conversation to be understood.
    #[must_use]
    pub fn needs_decontextualization(&self, text: &str, history: &[ChatMessage]) -> bool {
        if history.is_empty() {
            return false;
        }
        let lowered = text.to_lowercase();
        DEIXIS_MARKERS.iter().any(|marker| lowered.contains(marker))
            || lowered.split_whitespace().count() <= 3
    }

    /// Rewrite a follow-up question to stand alone.
    ///
    /// Fails closed: any LLM trouble returns the original text.
    pub async fn decontextualize(&self, text: &str, history: &[ChatMessage]) -> String {
        let prompt_text = prompt::decontextualize_prompt(text, history);
        let reply = timeout(
            self.decontextualize_budget,
            self.llm
                .chat("", &[ChatMessage::user(&prompt_text)], &ChatParams::utility()),
        )
        .await;
        match reply {
            Ok(Ok(rewritten)) => {
                let rewritten = rewritten.trim();
                if rewritten.is_empty() {
                    text.to_string()
                } else {
                    tracing::debug!(original = text, rewritten, "question decontextualized");
                    rewritten.to_string()
                }
            }
            _ => {
                tracing::debug!("decontextualization unavailable, keeping original question");
                text.to_string()
            }
        }
    }
}

/// SFS numbers mentioned in the question.
#[must_use]
pub fn must_include_tokens(text: &str) -> Vec<String> {
    SFS_NUMBER
        .captures_iter(text)
        .map(|captures| captures[1].to_string())
        .collect()
}

fn classify_text(text: &str) -> ResponseMode {
    let lowered = text.trim().to_lowercase();

    let has_question_word = QUESTION_WORDS
        .iter()
        .any(|word| lowered.split_whitespace().any(|token| token.trim_matches(|c: char| !c.is_alphanumeric()) == *word));
    let has_sfs = SFS_NUMBER.is_match(&lowered);
    let is_greeting = GREETINGS.iter().any(|greeting| lowered.starts_with(greeting));

    if is_greeting && !has_question_word && !has_sfs && lowered.split_whitespace().count() <= 6 {
        return ResponseMode::Chat;
    }
    if has_sfs || EVIDENCE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ResponseMode::Evidence;
    }
    if ASSIST_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return ResponseMode::Assist;
    }
    if has_question_word || lowered.ends_with('?') {
        return ResponseMode::Assist;
    }
    ResponseMode::Chat
}

//! Terminology normalization and refusal enforcement.
//!
//! The last rewrite before an answer leaves the engine. A terminology map
//! replaces discouraged administrative terms with their approved
//! equivalents; a deny-list turns the whole answer into a refusal. Only the
//! visible answer text is touched — citations, structure, and sources pass
//! through untouched.

use serde::{Deserialize, Serialize};

/// Outcome status of a guardrail pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailStatus {
    /// Nothing matched; the text is unchanged.
    Unchanged,
    /// One or more terms were replaced.
    Corrected,
    /// A deny-listed term appeared; the answer must be replaced wholesale.
    Refused,
}

/// One applied terminology correction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermCorrection {
    /// The discouraged term as found.
    pub original: String,
    /// The approved replacement.
    pub replacement: String,
}

/// Result of running the guardrail over an answer text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuardrailResult {
    /// What happened.
    pub status: GuardrailStatus,
    /// The rewritten text (equal to the input when unchanged).
    pub corrected_text: String,
    /// Corrections applied, in order of first occurrence.
    pub corrections: Vec<TermCorrection>,
}

/// Terminology-normalizing guardrail.
pub struct GuardrailService {
    terminology: Vec<(String, String)>,
    deny_list: Vec<String>,
}

impl Default for GuardrailService {
    fn default() -> Self {
        Self::new(default_terminology(), Vec::new())
    }
}

/// The stock terminology map: discouraged term → approved equivalent.
///
/// Follows current Swedish administrative language guidelines.
fn default_terminology() -> Vec<(String, String)> {
    [
        ("handikappad", "person med funktionsnedsättning"),
        ("dement", "person med demenssjukdom"),
        ("missbrukare", "person med skadligt bruk"),
        ("hemlös", "person i hemlöshet"),
        ("u-land", "utvecklingsland"),
        ("städerska", "lokalvårdare"),
    ]
    .into_iter()
    .map(|(a, b)| (a.to_string(), b.to_string()))
    .collect()
}

impl GuardrailService {
    /// Build a guardrail with an explicit terminology map and deny-list.
    #[must_use]
    pub fn new(terminology: Vec<(String, String)>, deny_list: Vec<String>) -> Self {
        Self {
            terminology,
            deny_list,
        }
    }

    /// Run the guardrail over an answer text.
    pub fn validate_response(&self, svar: &str) -> GuardrailResult {
        let lowered = svar.to_lowercase();
        for denied in &self.deny_list {
            if lowered.contains(&denied.to_lowercase()) {
                tracing::warn!(term = %denied, "deny-listed term in answer, refusing");
                return GuardrailResult {
                    status: GuardrailStatus::Refused,
                    corrected_text: String::new(),
                    corrections: Vec::new(),
                };
            }
        }

        let mut corrected = svar.to_string();
        let mut corrections = Vec::new();
        for (original, replacement) in &self.terminology {
            let rewritten = replace_word_case_insensitive(&corrected, original, replacement);
            if rewritten != corrected {
                corrections.push(TermCorrection {
                    original: original.clone(),
                    replacement: replacement.clone(),
                });
                corrected = rewritten;
            }
        }

        if corrections.is_empty() {
            GuardrailResult {
                status: GuardrailStatus::Unchanged,
                corrected_text: svar.to_string(),
                corrections,
            }
        } else {
            tracing::debug!(count = corrections.len(), "terminology corrections applied");
            GuardrailResult {
                status: GuardrailStatus::Corrected,
                corrected_text: corrected,
                corrections,
            }
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, 'å' | 'ä' | 'ö' | 'Å' | 'Ä' | 'Ö')
}

/// Replace every whole-word, case-insensitive occurrence of `term`.
fn replace_word_case_insensitive(text: &str, term: &str, replacement: &str) -> String {
    let lowered_text = text.to_lowercase();
    let lowered_term = term.to_lowercase();
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;

    while let Some(found) = lowered_text[cursor..].find(&lowered_term) {
        let start = cursor + found;
        let end = start + lowered_term.len();

        let boundary_before = text[..start].chars().next_back().is_none_or(|c| !is_word_char(c));
        let boundary_after = text[end..].chars().next().is_none_or(|c| !is_word_char(c));

        output.push_str(&text[cursor..start]);
        if boundary_before && boundary_after {
            output.push_str(replacement);
        } else {
            output.push_str(&text[start..end]);
        }
        cursor = end;
    }
    output.push_str(&text[cursor..]);
    output
}

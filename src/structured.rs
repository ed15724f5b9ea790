//! Structured answer parsing and validation.
//!
//! The generation LLM is instructed to answer with a single JSON object.
//! Models wrap JSON in code fences, prepend prose, or append commentary, so
//! extraction locates the first `{` and scans for its balanced closing brace
//! (string- and escape-aware) before handing the slice to serde.
//!
//! Validation enforces the answer contract: the declared mode must echo the
//! classified mode, a refusal carries no sources, and an evidence answer may
//! only cite chunks that were actually retrieved. The internal
//! `arbetsanteckning` scratch field is kept for logging and stripped before
//! anything leaves the engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SchemaError;
use crate::retrieval::SearchResult;
use crate::types::ResponseMode;

/// One cited source inside a structured answer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Document id the citation points into.
    pub doc_id: String,
    /// Chunk id within the document.
    #[serde(default)]
    pub chunk_id: String,
    /// Quoted passage backing the claim.
    #[serde(default)]
    pub citat: String,
    /// Location hint (page, paragraph).
    #[serde(default)]
    pub loc: String,
}

/// Validated JSON-shaped answer from the generation LLM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    /// Response mode the model claims to answer in.
    pub mode: ResponseMode,
    /// True when the retrieved material cannot support an answer.
    pub saknas_underlag: bool,
    /// The visible answer text.
    pub svar: String,
    /// Cited sources, `[n]` markers in `svar` index into this list.
    #[serde(default)]
    pub kallor: Vec<Citation>,
    /// Claims the model could not back with a source.
    #[serde(default)]
    pub fakta_utan_kalla: Vec<String>,
    /// Internal scratch notes. Logged, never exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbetsanteckning: Option<String>,
}

impl StructuredAnswer {
    /// A refusal answer in the given mode.
    #[must_use]
    pub fn refusal(mode: ResponseMode, template: &str) -> Self {
        Self {
            mode,
            saknas_underlag: true,
            svar: template.to_string(),
            kallor: Vec::new(),
            fakta_utan_kalla: Vec::new(),
            arbetsanteckning: None,
        }
    }

    /// A direct chat answer with no sources.
    #[must_use]
    pub fn chat(svar: impl Into<String>) -> Self {
        Self {
            mode: ResponseMode::Chat,
            saknas_underlag: false,
            svar: svar.into(),
            kallor: Vec::new(),
            fakta_utan_kalla: Vec::new(),
            arbetsanteckning: None,
        }
    }
}

/// Strip a leading code fence (with optional language tag) and its closer.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    match body.rfind("```") {
        Some(idx) => body[..idx].trim(),
        None => body.trim(),
    }
}

/// Locate and parse the first balanced JSON object in `raw`.
///
/// Handles code fences, leading prose, and trailing commentary. Braces
/// inside string literals are ignored.
pub fn extract_json_object(raw: &str) -> Result<Value, SchemaError> {
    let text = strip_code_fence(raw);
    let start = text.find('{').ok_or(SchemaError::NoJson)?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return serde_json::from_str(&text[start..end])
                        .map_err(|err| SchemaError::InvalidJson(err.to_string()));
                }
            }
            _ => {}
        }
    }
    Err(SchemaError::NoJson)
}

/// Extract all `[n]` citation markers from an answer text, in order.
#[must_use]
pub fn citation_markers(svar: &str) -> Vec<usize> {
    let mut markers = Vec::new();
    let bytes = svar.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                let digits = &svar[i + 1..j];
                // "[07]" is not a citation marker; real markers have no
                // leading zeros.
                if !(digits.len() > 1 && digits.starts_with('0')) {
                    if let Ok(n) = digits.parse::<usize>() {
                        markers.push(n);
                    }
                }
                i = j;
            }
        }
        i += 1;
    }
    markers
}

/// Parses and validates model output against the answer contract.
pub struct StructuredOutputService {
    enabled: bool,
}

impl StructuredOutputService {
    /// Build the service. With `enabled = false`, model output is wrapped
    /// as plain prose instead of being parsed.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether JSON parsing is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Parse raw model output into a [`StructuredAnswer`].
    ///
    /// With parsing disabled, the raw text becomes the `svar` of an uncited
    /// answer in `mode`.
    pub fn parse(&self, raw: &str, mode: ResponseMode) -> Result<StructuredAnswer, SchemaError> {
        if !self.enabled {
            return Ok(StructuredAnswer {
                mode,
                saknas_underlag: false,
                svar: raw.trim().to_string(),
                kallor: Vec::new(),
                fakta_utan_kalla: Vec::new(),
                arbetsanteckning: None,
            });
        }
        let value = extract_json_object(raw)?;
        if let Some(note) = value.get("arbetsanteckning").and_then(Value::as_str) {
            tracing::debug!(note, "model attached an internal work note");
        }
        serde_json::from_value(value).map_err(|err| SchemaError::InvalidAnswer(err.to_string()))
    }

    /// Validate an answer against the classified mode and retrieved sources.
    pub fn validate(
        &self,
        answer: &StructuredAnswer,
        expected_mode: ResponseMode,
        sources: &[SearchResult],
    ) -> Result<(), SchemaError> {
        if answer.mode != expected_mode {
            return Err(SchemaError::ModeMismatch {
                expected: expected_mode.to_string(),
                got: answer.mode.to_string(),
            });
        }

        // Internal field names surfacing in the visible text is the
        // signature of an injection trying to smuggle scratch data out.
        let lowered = answer.svar.to_lowercase();
        if lowered.contains("arbetsanteckning") || lowered.contains("fakta_utan_kalla") {
            return Err(SchemaError::InvalidAnswer(
                "internal field name leaked into answer text".to_string(),
            ));
        }

        if answer.saknas_underlag {
            if !answer.kallor.is_empty() {
                return Err(SchemaError::InvalidAnswer(
                    "refusal must not carry sources".to_string(),
                ));
            }
            return Ok(());
        }

        if expected_mode == ResponseMode::Evidence {
            if answer.kallor.is_empty() {
                return Err(SchemaError::InvalidAnswer(
                    "evidence answer carries no sources".to_string(),
                ));
            }
            for citation in &answer.kallor {
                let known = sources.iter().any(|s| {
                    s.id == citation.doc_id
                        || s.id == citation.chunk_id
                        || citation.chunk_id.starts_with(&s.id)
                });
                if !known {
                    return Err(SchemaError::InvalidAnswer(format!(
                        "citation points at unretrieved document {}",
                        citation.doc_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Return a caller-safe copy of `value`: the `arbetsanteckning` field
    /// and every key starting with `_` are removed, recursively.
    #[must_use]
    pub fn strip_internal_note(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(key, _)| *key != "arbetsanteckning" && !key.starts_with('_'))
                    .map(|(key, inner)| (key.clone(), self.strip_internal_note(inner)))
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.strip_internal_note(v)).collect())
            }
            other => other.clone(),
        }
    }
}

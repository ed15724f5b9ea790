//! Prompt construction for the generation and utility LLM calls.
//!
//! Each response mode has its own system prompt; the generation prompt
//! numbers the retrieved snippets so the model can cite them as `[n]`.

use crate::message::ChatMessage;
use crate::retrieval::SearchResult;
use crate::types::ResponseMode;

/// System prompt id for chat mode.
pub const SYSTEM_CHAT: &str = "chat_v2";
/// System prompt id for assist mode.
pub const SYSTEM_ASSIST: &str = "assist_v2";
/// System prompt id for evidence mode.
pub const SYSTEM_EVIDENCE: &str = "evidence_v3";

const CHAT_PROMPT: &str = "Du är en vänlig svensk assistent för förvaltningsfrågor. Svara kort och \
     artigt på hälsningar och småprat. Ge inga faktapåståenden och inga \
     källhänvisningar.";

const ASSIST_PROMPT: &str = "Du är en svensk assistent för förvaltnings- och juridikfrågor. Använd de \
     numrerade utdragen som underlag och hänvisa med [n] där det går. \
     Resonerande ton är tillåten, men påståenden utan stöd i utdragen ska \
     listas i fakta_utan_kalla. Svara ENDAST med ett JSON-objekt: \
     {\"mode\": \"ASSIST\", \"saknas_underlag\": bool, \"svar\": \"...\", \
     \"kallor\": [{\"doc_id\": \"...\", \"chunk_id\": \"...\", \"citat\": \"...\", \
     \"loc\": \"...\"}], \"fakta_utan_kalla\": [\"...\"]}";

const EVIDENCE_PROMPT: &str = "Du är en saklig svensk assistent för förvaltnings- och juridikfrågor. \
     Varje faktapåstående MÅSTE ha en källhänvisning [n] till ett av de \
     numrerade utdragen. Spekulera aldrig. Uttryck aldrig åsikter eller \
     värderingar. Om utdragen inte räcker för att besvara frågan, sätt \
     saknas_underlag till true och lämna kallor tom. Svara ENDAST med ett \
     JSON-objekt: {\"mode\": \"EVIDENCE\", \"saknas_underlag\": bool, \
     \"svar\": \"...\", \"kallor\": [{\"doc_id\": \"...\", \"chunk_id\": \"...\", \
     \"citat\": \"...\", \"loc\": \"...\"}], \"fakta_utan_kalla\": []}";

/// Instruction prepended to the retry after a parse failure.
pub const STRICT_JSON_REMINDER: &str = "VIKTIGT: Ditt förra svar kunde inte tolkas. Svara med ETT giltigt \
     JSON-objekt och ingenting annat. Ingen löptext, inga kodstaket.";

/// Resolve a system prompt id to its text.
#[must_use]
pub fn system_prompt(id: &str) -> &'static str {
    match id {
        SYSTEM_CHAT => CHAT_PROMPT,
        SYSTEM_ASSIST => ASSIST_PROMPT,
        _ => EVIDENCE_PROMPT,
    }
}

/// System prompt id for a mode.
#[must_use]
pub fn system_prompt_id(mode: ResponseMode) -> &'static str {
    match mode {
        ResponseMode::Chat => SYSTEM_CHAT,
        ResponseMode::Assist => SYSTEM_ASSIST,
        ResponseMode::Evidence => SYSTEM_EVIDENCE,
    }
}

/// Build the numbered context block handed to the model.
#[must_use]
pub fn context_block(sources: &[SearchResult]) -> String {
    let mut block = String::new();
    for (index, source) in sources.iter().enumerate() {
        block.push_str(&format!(
            "[{n}] {title} ({origin}, id: {id})\n{snippet}\n\n",
            n = index + 1,
            title = source.title,
            origin = source.source,
            id = source.id,
            snippet = source.snippet,
        ));
    }
    block
}

/// Build the user-turn messages for a generation call.
///
/// History (when present) precedes the final user turn carrying the
/// question and context.
#[must_use]
pub fn generation_messages(
    question: &str,
    sources: &[SearchResult],
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = history.to_vec();
    let content = if sources.is_empty() {
        format!("Fråga: {question}")
    } else {
        format!(
            "Utdrag ur dokument:\n\n{context}Fråga: {question}",
            context = context_block(sources)
        )
    };
    messages.push(ChatMessage::user(&content));
    messages
}

/// Prompt asking the model to rewrite a follow-up question as standalone.
#[must_use]
pub fn decontextualize_prompt(question: &str, history: &[ChatMessage]) -> String {
    let mut transcript = String::new();
    for message in history {
        transcript.push_str(&format!("{}: {}\n", message.role, message.content));
    }
    format!(
        "Tidigare samtal:\n{transcript}\nSkriv om följande fråga så att den är \
         fristående och begriplig utan samtalet ovan. Behåll alla egennamn och \
         SFS-nummer. Svara endast med den omskrivna frågan.\n\nFråga: {question}"
    )
}

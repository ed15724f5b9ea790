//! OpenAI-compatible HTTP gateway.
//!
//! Speaks the `/chat/completions` dialect over `reqwest`, both one-shot and
//! with `stream: true` (SSE-framed `data:` lines). Works against vLLM,
//! llama.cpp, Ollama's compatibility layer, and the hosted providers that
//! share the wire format.

use async_stream::try_stream;
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{ChatParams, LlmGateway, StreamItem, StreamStats, TokenStream};
use crate::error::LlmError;
use crate::message::ChatMessage;

/// HTTP client for any OpenAI-compatible chat endpoint.
#[derive(Clone)]
pub struct HttpLlmGateway {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamUsage {
    #[serde(default)]
    completion_tokens: u32,
}

impl HttpLlmGateway {
    /// Create a gateway against `base_url` (e.g. `http://host:8000/v1`).
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
        }
    }

    /// Attach a bearer token for hosted providers.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request_body(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
        stream: bool,
    ) -> serde_json::Value {
        let mut wire: Vec<WireMessage<'_>> = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            wire.push(WireMessage {
                role: ChatMessage::SYSTEM,
                content: system,
            });
        }
        for message in messages {
            wire.push(WireMessage {
                role: &message.role,
                content: &message.content,
            });
        }
        json!({
            "model": self.model,
            "messages": wire,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": stream,
        })
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(LlmError::Provider {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait::async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn chat(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<String, LlmError> {
        let body = self.request_body(system, messages, params, false);
        let response = self
            .apply_auth(self.client.post(self.endpoint()).json(&body))
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        let response = Self::check_status(response).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Malformed(err.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Malformed("response carried no choices".to_string()))
    }

    async fn chat_stream(
        &self,
        system: &str,
        messages: &[ChatMessage],
        params: &ChatParams,
    ) -> Result<TokenStream, LlmError> {
        let body = self.request_body(system, messages, params, true);
        let response = self
            .apply_auth(self.client.post(self.endpoint()).json(&body))
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        let response = Self::check_status(response).await?;

        let model_fallback = self.model.clone();
        let stream = try_stream! {
            let start_time = Utc::now();
            let mut tokens_generated: u32 = 0;
            let mut model_used = model_fallback;
            let mut reported_tokens: Option<u32> = None;
            let mut buffer = String::new();
            let mut body = response.bytes_stream();

            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|err| LlmError::Transport(err.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited `data: <json>` lines.
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() {
                        continue;
                    }
                    if payload == "[DONE]" {
                        let stats = StreamStats {
                            tokens_generated: reported_tokens.unwrap_or(tokens_generated),
                            model_used: model_used.clone(),
                            start_time,
                            end_time: Utc::now(),
                        };
                        yield StreamItem::done(stats);
                        return;
                    }
                    let parsed: StreamChunk = serde_json::from_str(payload)
                        .map_err(|err| LlmError::Malformed(err.to_string()))?;
                    if let Some(model) = parsed.model {
                        model_used = model;
                    }
                    if let Some(usage) = parsed.usage {
                        reported_tokens = Some(usage.completion_tokens);
                    }
                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content {
                            if !content.is_empty() {
                                tokens_generated += 1;
                                yield StreamItem::token(content);
                            }
                        }
                        if choice.finish_reason.is_some() {
                            let stats = StreamStats {
                                tokens_generated: reported_tokens.unwrap_or(tokens_generated),
                                model_used: model_used.clone(),
                                start_time,
                                end_time: Utc::now(),
                            };
                            yield StreamItem::done(stats);
                            return;
                        }
                    }
                }
            }

            // Provider closed the connection without a terminator.
            Err(LlmError::Malformed(
                "stream ended without completion marker".to_string(),
            ))?;
        };

        Ok(Box::pin(stream))
    }
}

//! Streaming variant of the pipeline.
//!
//! [`Orchestrator::stream_query`] spawns a producer task that walks the same
//! pipeline as the blocking path but emits [`SseEvent`]s through a bounded
//! channel as it goes. The consumer side (usually the HTTP transport) drains
//! the channel and writes the wire frames.
//!
//! Ordering is enforced here, not trusted from below: exactly one
//! `metadata` first, then at most one `decontextualized`, then tokens in
//! arrival order, at most one `corrections`, and exactly one terminal
//! `done` or `error`. Cancelling the handle aborts every in-flight call and
//! closes the channel without a terminal event; partial results are
//! discarded.

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::{CallerSource, Orchestrator, QueryRequest, RetrievePhase};
use crate::error::PipelineError;
use crate::guardrail::GuardrailStatus;
use crate::retrieval::RetrievalMetrics;
use crate::sse::SseEvent;
use crate::structured::StructuredAnswer;
use crate::types::{EvidenceLevel, ResponseMode};

/// Channel capacity between producer and transport.
const EVENT_BUFFER: usize = 256;

/// A live streaming request.
pub struct StreamHandle {
    /// Event feed, strictly ordered per the module docs.
    pub events: flume::Receiver<SseEvent>,
    cancel: CancellationToken,
    join: tokio::task::JoinHandle<()>,
}

impl StreamHandle {
    /// Cooperatively cancel the request. In-flight sub-tasks stop at their
    /// next suspension point and no further events are emitted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the producer to finish.
    pub async fn join(self) {
        let _ = self.join.await;
    }

    /// The cancellation token tied to this request.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

struct Emitter {
    sender: flume::Sender<SseEvent>,
    cancel: CancellationToken,
    terminal_sent: bool,
}

impl Emitter {
    /// Send one event unless the stream is cancelled or already terminated.
    /// Returns false when emission is no longer possible.
    async fn emit(&mut self, event: SseEvent) -> bool {
        if self.terminal_sent || self.cancel.is_cancelled() {
            return false;
        }
        let terminal = event.is_terminal();
        tokio::select! {
            () = self.cancel.cancelled() => false,
            sent = self.sender.send_async(event) => {
                if sent.is_ok() && terminal {
                    self.terminal_sent = true;
                }
                sent.is_ok()
            }
        }
    }
}

impl Orchestrator {
    /// Process a query as an ordered event stream.
    ///
    /// Returns immediately; the pipeline runs on a spawned task. Dropping
    /// the receiver or calling [`StreamHandle::cancel`] stops the producer.
    pub fn stream_query(self: &Arc<Self>, request: QueryRequest) -> StreamHandle {
        let (sender, receiver) = flume::bounded(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let orchestrator = Arc::clone(self);
        let token = cancel.clone();
        let request_id = uuid::Uuid::new_v4();
        tracing::debug!(%request_id, strategy = %request.strategy, "streaming query started");

        let join = tokio::spawn(async move {
            let mut emitter = Emitter {
                sender,
                cancel: token.clone(),
                terminal_sent: false,
            };
            let total_budget = orchestrator.config.budgets.total();
            let outcome = tokio::select! {
                () = token.cancelled() => None,
                outcome = timeout(total_budget, orchestrator.stream_inner(request, &mut emitter)) => {
                    Some(outcome)
                }
            };
            match outcome {
                None => tracing::debug!("stream cancelled by caller"),
                Some(Err(_)) => {
                    let _ = emitter
                        .emit(SseEvent::Error {
                            message: "request exceeded total budget".to_string(),
                        })
                        .await;
                }
                Some(Ok(())) => {}
            }
        });

        StreamHandle {
            events: receiver,
            cancel,
            join,
        }
    }

    async fn stream_inner(&self, request: QueryRequest, emitter: &mut Emitter) {
        let started = Instant::now();
        if let Err(err) = request.validate() {
            let _ = emitter
                .emit(SseEvent::Error {
                    message: err.to_string(),
                })
                .await;
            return;
        }

        let mut steps: Vec<String> = Vec::new();
        let prepared = self.prepare(&request, &mut steps).await;

        // Phase 1: everything needed for the metadata event.
        let (sources, _retrieval_metrics, refused_early) = if prepared.mode == ResponseMode::Chat {
            (Vec::new(), RetrievalMetrics::default(), false)
        } else {
            match self.retrieve_phase(&prepared, &mut steps).await {
                RetrievePhase::Proceed { sources, metrics } => (sources, metrics, false),
                RetrievePhase::Refuse { metrics, reason } => {
                    tracing::debug!(%reason, "streaming request refused before generation");
                    (Vec::new(), metrics, true)
                }
            }
        };

        let evidence_level = if refused_early || prepared.mode == ResponseMode::Chat {
            EvidenceLevel::None
        } else {
            EvidenceLevel::grade(sources.first().map_or(0.0, |s| s.score), sources.len())
        };

        if !emitter
            .emit(SseEvent::Metadata {
                mode: if refused_early { ResponseMode::Evidence } else { prepared.mode },
                sources: if refused_early {
                    Vec::new()
                } else {
                    sources.iter().map(CallerSource::from).collect()
                },
                evidence_level,
            })
            .await
        {
            return;
        }

        if let Some(rewritten) = &prepared.rewritten {
            if !emitter
                .emit(SseEvent::Decontextualized {
                    original: request.question.clone(),
                    rewritten: rewritten.clone(),
                })
                .await
            {
                return;
            }
        }

        if refused_early {
            self.stream_refusal(emitter, started).await;
            return;
        }

        // Phase 2: token feed from the generation stream.
        let raw = match self.stream_generation(&prepared, &sources, emitter).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return, // cancelled mid-stream
            Err(err) => {
                let _ = emitter
                    .emit(SseEvent::Error {
                        message: err.to_string(),
                    })
                    .await;
                return;
            }
        };

        // Phase 3: validation and the terminal events.
        if prepared.mode == ResponseMode::Chat {
            let answer = StructuredAnswer::chat(raw.trim());
            self.stream_finish(answer, emitter, started).await;
            return;
        }

        let candidate = self
            .critic_phase(raw, &prepared, &sources, false, &mut steps)
            .await;
        if candidate.refused {
            self.stream_refusal(emitter, started).await;
            return;
        }
        self.stream_finish(candidate.answer, emitter, started).await;
    }

    /// Drive the generation stream, forwarding tokens. Returns the full
    /// concatenated output, or `None` when the stream was cancelled.
    async fn stream_generation(
        &self,
        prepared: &super::Prepared,
        sources: &[crate::retrieval::SearchResult],
        emitter: &mut Emitter,
    ) -> Result<Option<String>, PipelineError> {
        let system = crate::prompt::system_prompt(prepared.mode_config.system_prompt_id);
        let messages = crate::prompt::generation_messages(
            &prepared.effective_question,
            sources,
            &prepared.history,
        );
        let mut stream = self
            .llm
            .chat_stream(system, &messages, &prepared.mode_config.params)
            .await
            .map_err(PipelineError::Llm)?;

        let stall = self.config.budgets.stream_stall();
        let stall_ms = self.config.budgets.stream_stall_ms;
        let mut full = String::new();

        loop {
            let next = timeout(stall, stream.next())
                .await
                .map_err(|_| PipelineError::Llm(crate::error::LlmError::Stalled { stall_ms }))?;
            let Some(item) = next else {
                // Stream closed without a stats element; treat what we have
                // as complete.
                return Ok(Some(full));
            };
            let item = item.map_err(PipelineError::Llm)?;
            if !item.token.is_empty() {
                full.push_str(&item.token);
                if !emitter
                    .emit(SseEvent::Token {
                        content: item.token.clone(),
                    })
                    .await
                {
                    return Ok(None);
                }
            }
            if item.stats.is_some() {
                return Ok(Some(full));
            }
        }
    }

    /// Guardrail, optional corrections event, and `done`.
    async fn stream_finish(
        &self,
        answer: StructuredAnswer,
        emitter: &mut Emitter,
        started: Instant,
    ) {
        let guarded = self.guardrail.validate_response(&answer.svar);
        match guarded.status {
            GuardrailStatus::Refused => {
                self.stream_refusal(emitter, started).await;
            }
            GuardrailStatus::Corrected => {
                if !emitter
                    .emit(SseEvent::Corrections {
                        corrections: guarded.corrections,
                        corrected_text: guarded.corrected_text,
                    })
                    .await
                {
                    return;
                }
                let _ = emitter
                    .emit(SseEvent::Done {
                        total_time_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
            }
            GuardrailStatus::Unchanged => {
                let _ = emitter
                    .emit(SseEvent::Done {
                        total_time_ms: started.elapsed().as_millis() as u64,
                    })
                    .await;
            }
        }
    }

    /// Emit the refusal template as a single token, then `done`.
    async fn stream_refusal(&self, emitter: &mut Emitter, started: Instant) {
        if !emitter
            .emit(SseEvent::Token {
                content: self.config.evidence_refusal_template.clone(),
            })
            .await
        {
            return;
        }
        let _ = emitter
            .emit(SseEvent::Done {
                total_time_ms: started.elapsed().as_millis() as u64,
            })
            .await;
    }
}

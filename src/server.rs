//! HTTP surface: query, stream, and health endpoints.
//!
//! [`router`] returns an axum router over a shared [`Orchestrator`]:
//!
//! - `POST /api/agent/query` — blocking JSON answer
//! - `POST /api/agent/query/stream` — SSE token feed
//! - `GET  /api/health` — orchestrator and service status
//!
//! The retrieval strategy can be selected in the body or via the
//! `X-Retrieval-Strategy` header (the body wins). Client disconnects cancel
//! the underlying request.

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{InputError, PipelineError};
use crate::message::ChatMessage;
use crate::orchestrator::{CallerResponse, Orchestrator, QueryRequest};
use crate::sse;
use crate::types::{ResponseMode, StrategyKind};

/// Header selecting the retrieval strategy.
pub const STRATEGY_HEADER: &str = "x-retrieval-strategy";

/// Wire shape of a query request.
#[derive(Debug, Deserialize)]
pub struct AgentQueryRequest {
    /// The question, 1..=2000 characters.
    pub question: String,
    /// `auto`, `chat`, `assist`, or `evidence`.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Prior turns, at most 10.
    #[serde(default)]
    pub history: Vec<WireMessage>,
    /// Source budget, 1..=50.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Retrieval strategy label; falls back to the header, then the default.
    #[serde(default)]
    pub retrieval_strategy: Option<String>,
}

/// One history turn on the wire.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// Turn content.
    pub content: String,
}

fn default_mode() -> String {
    "auto".to_string()
}

fn default_k() -> usize {
    10
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    services: std::collections::BTreeMap<String, String>,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Build the router over a shared orchestrator.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/agent/query", post(query))
        .route("/api/agent/query/stream", post(query_stream))
        .with_state(orchestrator)
}

/// Translate the wire request into a pipeline request.
fn to_query_request(
    request: AgentQueryRequest,
    headers: &HeaderMap,
) -> Result<QueryRequest, InputError> {
    let mode = match request.mode.to_ascii_lowercase().as_str() {
        "auto" => None,
        other => Some(ResponseMode::parse_hint(other).ok_or(InputError::UnknownValue {
            field: "mode",
            value: other.to_string(),
        })?),
    };

    let strategy_label = request.retrieval_strategy.or_else(|| {
        headers
            .get(STRATEGY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    });
    let strategy = match strategy_label {
        Some(label) => label.parse::<StrategyKind>().map_err(|err| InputError::UnknownValue {
            field: "retrieval_strategy",
            value: err.0,
        })?,
        None => StrategyKind::default(),
    };

    let history: Vec<ChatMessage> = request
        .history
        .into_iter()
        .map(|message| ChatMessage::new(&message.role, &message.content))
        .collect();

    let mut query = QueryRequest::new(request.question)
        .with_history(history)
        .with_k(request.k)
        .with_strategy(strategy);
    query.mode = mode;
    Ok(query)
}

async fn health(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let services: std::collections::BTreeMap<String, String> =
        orchestrator.status().into_iter().collect();
    let degraded = services.values().any(|status| status == "error");
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "healthy" }.to_string(),
        services,
        timestamp: Utc::now().to_rfc3339(),
    })
}

async fn query(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(request): Json<AgentQueryRequest>,
) -> Response {
    let query = match to_query_request(request, &headers) {
        Ok(query) => query,
        Err(err) => return client_error(err),
    };
    match orchestrator.process_query(query).await {
        Ok(result) => {
            let response: CallerResponse = result.to_response();
            Json(response).into_response()
        }
        Err(err) if err.is_client_error() => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                error: err.to_string(),
            }),
        )
            .into_response(),
        Err(PipelineError::Cancelled) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            tracing::error!(error = %err, "query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "internal error".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn query_stream(
    State(orchestrator): State<Arc<Orchestrator>>,
    headers: HeaderMap,
    Json(request): Json<AgentQueryRequest>,
) -> Response {
    let query = match to_query_request(request, &headers) {
        Ok(query) => query,
        Err(err) => return client_error(err),
    };

    let handle = orchestrator.stream_query(query);
    let events = handle.events.clone();
    let guard = CancelOnDrop(handle.cancellation_token());

    let body_stream = async_stream::stream! {
        let _guard = guard;
        while let Ok(event) = events.recv_async().await {
            match sse::encode(&event) {
                Ok(frame) => yield Ok::<String, Infallible>(frame),
                Err(err) => {
                    tracing::error!(error = %err, "failed to encode SSE event");
                    break;
                }
            }
            if event.is_terminal() {
                break;
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn client_error(err: InputError) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

/// Cancels the streaming request when the transport drops the body.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

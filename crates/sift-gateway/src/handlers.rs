use std::convert::Infallible;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::{Deserialize, Serialize};
use sift_core::{ChatRequest, StreamEvent};
use sift_index::StoreStatus;
use sift_llm::{LlmProvider, Message};
use tokio_stream::StreamExt;

use crate::error::ApiError;
use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
pub(crate) struct EmbedRequest {
    #[serde(default)]
    pub texts: Vec<String>,
}

#[derive(Serialize)]
pub(crate) struct EmbedResponse {
    vectors: Vec<Vec<f32>>,
}

#[derive(Deserialize)]
pub(crate) struct ChatStreamRequest {
    pub messages: Vec<Message>,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
    /// Signed so that a negative value is a validation error rather than a
    /// deserialization failure.
    #[serde(default)]
    pub k: Option<i64>,
}

fn default_use_rag() -> bool {
    true
}

#[derive(Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    index: StoreStatus,
    provider: String,
    uptime_secs: u64,
}

pub(crate) async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn status_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
) -> impl IntoResponse {
    Json(StatusResponse {
        index: state.app.store.status(),
        provider: state.app.provider.name().to_owned(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

pub(crate) async fn embed_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    payload: Result<Json<EmbedRequest>, JsonRejection>,
) -> Result<Json<EmbedResponse>, ApiError> {
    let Json(payload) = payload?;
    if payload.texts.is_empty() {
        return Ok(Json(EmbedResponse {
            vectors: Vec::new(),
        }));
    }

    let vectors = state.app.provider.embed(&payload.texts).await.map_err(|e| {
        tracing::warn!("embedding request failed: {e}");
        ApiError::unavailable(format!("embedding provider unavailable: {e}"))
    })?;
    Ok(Json(EmbedResponse { vectors }))
}

pub(crate) async fn chat_stream_handler<P: LlmProvider + 'static>(
    State(state): State<AppState<P>>,
    payload: Result<Json<ChatStreamRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(payload) = payload?;
    let k = match payload.k {
        None => state.default_k,
        Some(k) => usize::try_from(k)
            .map_err(|_| ApiError::bad_request(format!("k must be >= 0, got {k}")))?,
    };

    let request = ChatRequest {
        messages: payload.messages,
        use_rag: payload.use_rag,
        k,
    };
    let stream = state.app.orchestrator.start(request).await?;
    tracing::debug!(sources = stream.sources().len(), "chat stream started");

    let events = stream.map(|event| Ok::<_, Infallible>(to_sse(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Multi-line payloads become several `data:` lines; carriage returns are
/// folded into line feeds first since SSE treats them as line breaks too.
fn to_sse(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Token(token) => Event::default().event("message").data(normalize(&token)),
        StreamEvent::Error(message) => Event::default()
            .event("error")
            .data(normalize(&message)),
        StreamEvent::Done => Event::default().event("done").data("[DONE]"),
    }
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

use axum::Router;
use axum::routing::{get, post};
use sift_llm::LlmProvider;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{chat_stream_handler, embed_handler, health_handler, status_handler};
use super::server::AppState;

pub fn build_router<P: LlmProvider + 'static>(state: AppState<P>, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler::<P>))
        .route("/embed", post(embed_handler::<P>))
        .route("/chat/stream", post(chat_stream_handler::<P>))
        .layer(RequestBodyLimitLayer::new(max_body_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

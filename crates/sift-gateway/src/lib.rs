//! HTTP gateway: health, embeddings, index status and SSE chat streaming.

mod error;
mod handlers;
mod router;
mod server;

pub use error::GatewayError;
pub use router::build_router;
pub use server::{AppState, GatewayServer};

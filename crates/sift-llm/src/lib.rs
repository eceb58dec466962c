//! Provider capability for sift: batched embeddings and streamed generation.
//!
//! Backends are selected at runtime through [`any::AnyProvider`]; the `mock`
//! feature adds a deterministic provider used by tests and offline demos.

pub mod any;
pub mod error;
pub(crate) mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub(crate) mod retry;
pub(crate) mod sse;

pub use any::AnyProvider;
pub use error::LlmError;
pub use provider::{ChatStream, LlmProvider, Message, Role};

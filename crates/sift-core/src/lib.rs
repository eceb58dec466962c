//! Configuration, prompt assembly and the streaming chat orchestrator.

pub mod bootstrap;
pub mod config;
pub mod orchestrator;
pub mod prompt;

pub use config::Config;
pub use orchestrator::{
    ChatRequest, GenerationStream, OrchestratorError, OrchestratorSettings, Phase, StreamEvent,
    StreamOrchestrator,
};
pub use prompt::{PromptTemplate, assemble_prompt};

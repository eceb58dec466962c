//! Per-request pipeline: validate, retrieve, assemble the prompt, then stream
//! generation to the caller.
//!
//! Generation runs in a spawned task that forwards tokens through a bounded
//! channel. The task stops, dropping the upstream provider stream, as soon as
//! the receiving side goes away, `cancel()` is called, or the timeout fires.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use sift_index::{IndexError, RetrievalStore, RetrievedChunk};
use sift_llm::{LlmProvider, Message, Role};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::prompt::{PromptTemplate, assemble_prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Retrieving,
    Prompting,
    Generating,
    Done,
    Cancelled,
    Failed,
}

impl Phase {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }
}

/// Item of the outward stream. `Done` and `Error` are always last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Token(String),
    Error(String),
    Done,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("retrieval failed: {0}")]
    Retrieval(#[from] IndexError),
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub use_rag: bool,
    pub k: usize,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_k: usize,
    pub template: PromptTemplate,
    pub generation_timeout: Duration,
    pub buffer: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_k: 20,
            template: PromptTemplate::default(),
            generation_timeout: Duration::from_secs(300),
            buffer: 32,
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_k: config.chat.max_k,
            template: PromptTemplate::from(&config.chat),
            generation_timeout: Duration::from_secs(config.chat.generation_timeout_secs),
            buffer: config.chat.stream_buffer,
        }
    }
}

pub struct StreamOrchestrator<P> {
    store: Arc<RetrievalStore<P>>,
    provider: Arc<P>,
    settings: OrchestratorSettings,
}

impl<P: LlmProvider + 'static> StreamOrchestrator<P> {
    #[must_use]
    pub fn new(
        store: Arc<RetrievalStore<P>>,
        provider: Arc<P>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RetrievalStore<P>> {
        &self.store
    }

    #[must_use]
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// The question to retrieve for and the effective `k`.
    fn validate<'a>(
        &self,
        request: &'a ChatRequest,
    ) -> Result<(&'a str, usize), OrchestratorError> {
        if request.messages.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "messages must not be empty".into(),
            ));
        }
        let Some(question) = request.messages.iter().rev().find(|m| m.role == Role::User) else {
            return Err(OrchestratorError::InvalidRequest(
                "conversation has no user message".into(),
            ));
        };
        let k = request.k.min(self.settings.max_k);
        if k < request.k {
            tracing::debug!(requested = request.k, k, "clamped k to the configured maximum");
        }
        Ok((&question.content, k))
    }

    /// Run retrieval and prompt assembly, then start generation.
    ///
    /// Dropping the returned future before it resolves abandons the request
    /// during retrieval; nothing is generated.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` before any work is done, or `Retrieval` if
    /// RAG was requested and the store could not answer.
    pub async fn start(&self, request: ChatRequest) -> Result<GenerationStream, OrchestratorError> {
        let (phase_tx, phase_rx) = watch::channel(Phase::Init);
        let (question, k) = self.validate(&request)?;

        let sources = if request.use_rag {
            phase_tx.send_replace(Phase::Retrieving);
            self.store.retrieve(question, k).await?
        } else {
            Vec::new()
        };

        phase_tx.send_replace(Phase::Prompting);
        let prompt = assemble_prompt(
            &self.settings.template,
            &sources,
            &request.messages,
            request.use_rag,
        );
        tracing::debug!(
            messages = prompt.len(),
            chunks = sources.len(),
            use_rag = request.use_rag,
            "prompt assembled"
        );

        let (tx, rx) = mpsc::channel(self.settings.buffer.max(1));
        let cancel = CancellationToken::new();
        phase_tx.send_replace(Phase::Generating);

        tokio::spawn(drive(
            Arc::clone(&self.provider),
            prompt,
            tx,
            cancel.clone(),
            phase_tx,
            self.settings.generation_timeout,
        ));

        Ok(GenerationStream {
            events: ReceiverStream::new(rx),
            phase: phase_rx,
            cancel,
            sources,
        })
    }
}

/// Outward token stream of one request. Finite and not restartable; dropping
/// it cancels generation.
pub struct GenerationStream {
    events: ReceiverStream<StreamEvent>,
    phase: watch::Receiver<Phase>,
    cancel: CancellationToken,
    sources: Vec<RetrievedChunk>,
}

impl GenerationStream {
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// A receiver that keeps observing the phase after the stream is dropped.
    #[must_use]
    pub fn phase_watch(&self) -> watch::Receiver<Phase> {
        self.phase.clone()
    }

    /// Chunks the prompt was built from, best first.
    #[must_use]
    pub fn sources(&self) -> &[RetrievedChunk] {
        &self.sources
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for GenerationStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

const TIMEOUT_ERROR_GRACE: Duration = Duration::from_secs(5);

enum Outcome {
    Completed(usize),
    Failed(String),
    Cancelled(&'static str),
    TimedOut,
}

async fn drive<P: LlmProvider>(
    provider: Arc<P>,
    prompt: Vec<Message>,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    phase: watch::Sender<Phase>,
    timeout: Duration,
) {
    let started = Instant::now();
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => Outcome::Cancelled("cancel requested"),
        () = tx.closed() => Outcome::Cancelled("consumer went away"),
        () = tokio::time::sleep(timeout) => Outcome::TimedOut,
        outcome = forward(provider.as_ref(), &prompt, &tx) => outcome,
    };
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Outcome::Completed(tokens) => {
            if tx.send(StreamEvent::Done).await.is_ok() {
                tracing::info!(tokens, elapsed_ms, "generation finished");
                phase.send_replace(Phase::Done);
            } else {
                tracing::info!(tokens, elapsed_ms, "consumer went away before completion");
                phase.send_replace(Phase::Cancelled);
            }
        }
        Outcome::Failed(message) => {
            tracing::warn!(elapsed_ms, "generation failed: {message}");
            let _ = tx.send(StreamEvent::Error(message)).await;
            phase.send_replace(Phase::Failed);
        }
        Outcome::Cancelled(reason) => {
            tracing::info!(elapsed_ms, reason, "generation cancelled");
            phase.send_replace(Phase::Cancelled);
        }
        Outcome::TimedOut => {
            tracing::warn!(elapsed_ms, "generation timed out");
            // The consumer may be behind a full buffer; give it a bounded
            // window to drain before the error is dropped.
            let delivered = tokio::select! {
                biased;
                () = cancel.cancelled() => false,
                sent = tokio::time::timeout(
                    TIMEOUT_ERROR_GRACE,
                    tx.send(StreamEvent::Error("generation timed out".into())),
                ) => matches!(sent, Ok(Ok(()))),
            };
            if !delivered {
                tracing::debug!("timeout error was not delivered");
            }
            phase.send_replace(Phase::Cancelled);
        }
    }
}

async fn forward<P: LlmProvider>(
    provider: &P,
    prompt: &[Message],
    tx: &mpsc::Sender<StreamEvent>,
) -> Outcome {
    let mut upstream = match provider.generate_stream(prompt).await {
        Ok(stream) => stream,
        Err(e) => return Outcome::Failed(e.to_string()),
    };

    let mut tokens = 0usize;
    while let Some(item) = upstream.next().await {
        match item {
            Ok(token) => {
                if tx.send(StreamEvent::Token(token)).await.is_err() {
                    return Outcome::Cancelled("consumer went away");
                }
                tokens += 1;
            }
            Err(e) => return Outcome::Failed(e.to_string()),
        }
    }
    Outcome::Completed(tokens)
}

//! Deterministic provider for tests and offline runs.
//!
//! Embeddings are feature-hashed bags of lowercase words, so texts sharing
//! words score higher under inner product. Generation replays a scripted
//! response word by word.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message};

/// Shared counters, cloned together with the provider.
#[derive(Debug, Default)]
pub struct MockCounters {
    pub embed_calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
    pub generate_calls: AtomicUsize,
    pub tokens_pulled: AtomicUsize,
    pub open_streams: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct MockProvider {
    pub dim: usize,
    /// Reported by `embedding_model`; changing it does not change the vectors.
    pub embedding_model: String,
    /// Keep `dim` out of `embedding_dim`, like a backend that only learns its
    /// dimension from a real call.
    pub hide_dim: bool,
    pub response: String,
    pub fail_embed: bool,
    pub fail_generate: bool,
    /// Yield an error item after this many tokens.
    pub fail_after: Option<usize>,
    /// Produce tokens forever until the consumer stops pulling.
    pub endless: bool,
    /// Milliseconds to sleep before each token.
    pub token_delay_ms: u64,
    /// Milliseconds to sleep before answering an embedding call.
    pub embed_delay_ms: u64,
    pub counters: Arc<MockCounters>,
    last_prompt: Arc<Mutex<Vec<Message>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            dim: 64,
            embedding_model: "hashed-words".into(),
            hide_dim: false,
            response: "mock response".into(),
            fail_embed: false,
            fail_generate: false,
            fail_after: None,
            endless: false,
            token_delay_ms: 0,
            embed_delay_ms: 0,
            counters: Arc::new(MockCounters::default()),
            last_prompt: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    #[must_use]
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    #[must_use]
    pub fn with_hidden_dim(mut self) -> Self {
        self.hide_dim = true;
        self
    }

    #[must_use]
    pub fn failing_embed(mut self) -> Self {
        self.fail_embed = true;
        self
    }

    #[must_use]
    pub fn failing_generate(mut self) -> Self {
        self.fail_generate = true;
        self
    }

    #[must_use]
    pub fn with_fail_after(mut self, tokens: usize) -> Self {
        self.fail_after = Some(tokens);
        self
    }

    #[must_use]
    pub fn endless(mut self) -> Self {
        self.endless = true;
        self
    }

    #[must_use]
    pub fn with_token_delay(mut self, ms: u64) -> Self {
        self.token_delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_embed_delay(mut self, ms: u64) -> Self {
        self.embed_delay_ms = ms;
        self
    }

    /// The conversation passed to the most recent `generate_stream` call.
    #[must_use]
    pub fn last_prompt(&self) -> Vec<Message> {
        self.last_prompt
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl LlmProvider for MockProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.counters.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.embed_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.embed_delay_ms)).await;
        }
        if self.fail_embed {
            return Err(LlmError::Unavailable);
        }
        self.counters
            .texts_embedded
            .fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_embedding(t, self.dim)).collect())
    }

    async fn generate_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        self.counters.generate_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_prompt.lock() {
            *guard = messages.to_vec();
        }
        if self.fail_generate {
            return Err(LlmError::Other("mock generation error".into()));
        }

        self.counters.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(ScriptedStream {
            tokens: split_tokens(&self.response),
            endless: self.endless,
            fail_after: self.fail_after,
            emitted: 0,
            finished: false,
            delay: Duration::from_millis(self.token_delay_ms),
            sleep: None,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn embedding_dim(&self) -> Option<usize> {
        (!self.hide_dim).then_some(self.dim)
    }

    fn embedding_model(&self) -> Option<&str> {
        Some(&self.embedding_model)
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

/// Split a response into word tokens that keep their leading whitespace, so
/// concatenating the tokens reproduces the response exactly.
fn split_tokens(response: &str) -> VecDeque<String> {
    let mut tokens = VecDeque::new();
    let mut current = String::new();
    for ch in response.chars() {
        if ch.is_whitespace() && !current.trim().is_empty() {
            tokens.push_back(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push_back(current);
    }
    tokens
}

/// Feature-hashed bag-of-words vector, L2-normalized.
#[must_use]
pub fn hash_embedding(text: &str, dim: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dim];
    if dim == 0 {
        return vector;
    }

    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let hash = blake3::hash(word.to_lowercase().as_bytes());
        let bytes = hash.as_bytes();
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&bytes[..8]);
        #[allow(clippy::cast_possible_truncation)]
        let idx = (u64::from_le_bytes(bucket) % dim as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign;
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

struct ScriptedStream {
    tokens: VecDeque<String>,
    endless: bool,
    fail_after: Option<usize>,
    emitted: usize,
    finished: bool,
    delay: Duration,
    sleep: Option<Pin<Box<tokio::time::Sleep>>>,
    counters: Arc<MockCounters>,
}

impl Stream for ScriptedStream {
    type Item = Result<String, LlmError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if !self.delay.is_zero() {
            let delay = self.delay;
            let sleep = self
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep(delay)));
            if sleep.as_mut().poll(cx).is_pending() {
                return Poll::Pending;
            }
            self.sleep = None;
        }

        if self.fail_after == Some(self.emitted) {
            self.finished = true;
            return Poll::Ready(Some(Err(LlmError::Other("mock stream interrupted".into()))));
        }

        let next = if self.endless {
            Some(format!("tok{} ", self.emitted))
        } else {
            self.tokens.pop_front()
        };

        match next {
            Some(token) => {
                self.emitted += 1;
                self.counters.tokens_pulled.fetch_add(1, Ordering::SeqCst);
                Poll::Ready(Some(Ok(token)))
            }
            None => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.counters.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use tokio_stream::StreamExt;

    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn hash_embedding_is_deterministic_and_normalized() {
        let a = hash_embedding("Project RAG Homework demo.", 32);
        let b = hash_embedding("Project RAG Homework demo.", 32);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher() {
        let doc = hash_embedding("the demo of retrieval", 256);
        let related = hash_embedding("demo", 256);
        let unrelated = hash_embedding("zebra", 256);
        assert!(dot(&doc, &related) > dot(&doc, &unrelated));
    }

    #[test]
    fn empty_text_is_zero_vector() {
        assert!(hash_embedding("  ", 8).iter().all(|x| *x == 0.0));
        assert!(hash_embedding("x", 0).is_empty());
    }

    #[test]
    fn split_tokens_roundtrips_text() {
        let tokens = split_tokens("Hello  brave new\nworld");
        let joined: String = tokens.iter().map(String::as_str).collect();
        assert_eq!(joined, "Hello  brave new\nworld");
        assert_eq!(tokens.len(), 4);
    }

    #[tokio::test]
    async fn embed_counts_calls() {
        let p = MockProvider::new(16);
        let vectors = p.embed(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(p.counters.embed_calls.load(Ordering::SeqCst), 1);
        assert_eq!(p.counters.texts_embedded.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_embed_errors() {
        let p = MockProvider::new(4).failing_embed();
        assert!(p.embed(&["a".into()]).await.is_err());
    }

    #[tokio::test]
    async fn stream_replays_response() {
        let p = MockProvider::new(4).with_response("one two three");
        let mut stream = p.generate_stream(&[Message::user("q")]).await.unwrap();
        let mut out = String::new();
        while let Some(tok) = stream.next().await {
            out.push_str(&tok.unwrap());
        }
        assert_eq!(out, "one two three");
        assert_eq!(p.last_prompt(), vec![Message::user("q")]);
        drop(stream);
        assert_eq!(p.counters.open_streams.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stream_fails_after_n_tokens() {
        let p = MockProvider::new(4)
            .with_response("a b c d")
            .with_fail_after(2);
        let items: Vec<_> = p
            .generate_stream(&[Message::user("q")])
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn endless_stream_counts_pulls() {
        let p = MockProvider::new(4).endless();
        let mut stream = p.generate_stream(&[Message::user("q")]).await.unwrap();
        for _ in 0..5 {
            stream.next().await.unwrap().unwrap();
        }
        assert_eq!(p.counters.tokens_pulled.load(Ordering::SeqCst), 5);
    }
}

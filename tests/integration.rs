use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use http_body_util::BodyExt;
use sift_core::bootstrap::{App, build_app};
use sift_core::{ChatRequest, Config, Phase, StreamEvent};
use sift_gateway::{AppState, build_router};
use sift_index::Lifecycle;
use sift_llm::Message;
use sift_llm::mock::MockProvider;
use tokio_stream::StreamExt;
use tower::ServiceExt;

// -- Helpers --

fn config(root: &Path) -> Config {
    let mut config = Config::default();
    config.corpus.data_dir = root.join("data");
    config.index.index_path = root.join(".sift/index.bin");
    config.index.metadata_path = root.join(".sift/index.meta.json");
    config
}

fn write_corpus(root: &Path, files: &[(&str, &str)]) {
    let data = root.join("data");
    std::fs::create_dir_all(&data).unwrap();
    for (name, text) in files {
        std::fs::write(data.join(name), text).unwrap();
    }
}

fn app(root: &Path, provider: MockProvider) -> App<MockProvider> {
    build_app(&config(root), provider).unwrap()
}

fn router(app: &App<MockProvider>) -> axum::Router {
    build_router(AppState::new(app.clone(), 3), 1_048_576)
}

fn chat_request(body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat/stream")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

// -- Retrieval --

#[tokio::test]
async fn single_document_corpus_is_retrieved() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("notes.txt", "Project RAG Homework demo.")]);
    let app = app(dir.path(), MockProvider::new(64));

    let hits = app.store.retrieve("demo", 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].text.contains("Project RAG Homework demo."));
    assert!(hits[0].source_path.ends_with("notes.txt"));
    assert_eq!(app.store.lifecycle(), Lifecycle::Ready);
}

#[tokio::test]
async fn index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(
        dir.path(),
        &[("a.md", "Rust ownership rules."), ("b.txt", "Tokio runtime notes.")],
    );

    let first = app(dir.path(), MockProvider::new(32));
    let before = first.store.retrieve("ownership", 2).await.unwrap();
    assert_eq!(first.store.rebuild_count(), 1);
    assert!(dir.path().join(".sift/index.bin").exists());
    assert!(dir.path().join(".sift/index.meta.json").exists());

    let provider = MockProvider::new(32);
    let second = app(dir.path(), provider.clone());
    let after = second.store.retrieve("ownership", 2).await.unwrap();
    assert_eq!(second.store.rebuild_count(), 0);
    assert_eq!(before, after);
    // Only the query itself is embedded on a warm start.
    assert_eq!(provider.counters.texts_embedded.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn embedding_dimension_change_rebuilds() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("a.txt", "some text")]);

    app(dir.path(), MockProvider::new(16))
        .store
        .ensure_ready()
        .await
        .unwrap();

    let resized = app(dir.path(), MockProvider::new(24));
    let snapshot = resized.store.ensure_ready().await.unwrap();
    assert_eq!(snapshot.dim(), 24);
    assert_eq!(resized.store.rebuild_count(), 1);
}

#[tokio::test]
async fn concurrent_first_requests_build_once() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("a.txt", "alpha"), ("b.txt", "beta")]);
    let app = app(dir.path(), MockProvider::new(16).with_embed_delay(20));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&app.store);
        handles.push(tokio::spawn(async move { store.retrieve("alpha", 1).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().len(), 1);
    }
    assert_eq!(app.store.rebuild_count(), 1);
    assert_eq!(app.store.retrieve_count(), 8);
}

// -- HTTP surface --

#[tokio::test]
async fn embed_endpoint_returns_configured_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), MockProvider::new(48));
    let req = Request::builder()
        .method("POST")
        .uri("/embed")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"texts":["hello world"]}"#))
        .unwrap();

    let resp = router(&app).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let vectors = json["vectors"].as_array().unwrap();
    assert_eq!(vectors.len(), 1);
    assert_eq!(vectors[0].as_array().unwrap().len(), 48);
}

#[tokio::test]
async fn chat_without_rag_never_touches_index() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("a.txt", "content")]);
    let provider = MockProvider::new(16).with_response("plain answer");
    let app = app(dir.path(), provider.clone());

    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "hello"}],
        "use_rag": false,
        "k": 3
    });
    let resp = router(&app).oneshot(chat_request(&body)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    assert!(text.contains("data: plain\n"));
    assert!(text.contains("event: done\ndata: [DONE]"));
    assert_eq!(app.store.retrieve_count(), 0);
    assert_eq!(app.store.lifecycle(), Lifecycle::Uninitialized);
    assert_eq!(provider.counters.embed_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn chat_with_rag_grounds_prompt_in_corpus() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("notes.txt", "Project RAG Homework demo.")]);
    let provider = MockProvider::new(64).with_response("It is a homework demo.");
    let app = app(dir.path(), provider.clone());

    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "demo"}],
        "k": 1
    });
    let resp = router(&app).oneshot(chat_request(&body)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.ends_with("event: done\ndata: [DONE]\n\n"));

    let prompt = provider.last_prompt();
    let question = &prompt.last().unwrap().content;
    assert!(question.contains("notes.txt]\nProject RAG Homework demo."));
    assert!(question.contains("Project RAG Homework demo."));
    assert_eq!(app.store.retrieve_count(), 1);
}

#[tokio::test]
async fn client_disconnect_stops_generation() {
    let dir = tempfile::tempdir().unwrap();
    let provider = MockProvider::new(16).endless().with_token_delay(5);
    let counters = Arc::clone(&provider.counters);
    let app = app(dir.path(), provider);

    let body = serde_json::json!({
        "messages": [{"role": "user", "content": "go on forever"}],
        "use_rag": false
    });
    let resp = router(&app).oneshot(chat_request(&body)).await.unwrap();
    let mut body = resp.into_body();
    for _ in 0..3 {
        let frame = body.frame().await.unwrap().unwrap();
        assert!(frame.is_data());
    }
    assert!(counters.open_streams.load(Ordering::SeqCst) > 0);
    drop(body);

    tokio::time::timeout(Duration::from_secs(2), async {
        while counters.open_streams.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("upstream generation was not released");

    let pulled = counters.tokens_pulled.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(counters.tokens_pulled.load(Ordering::SeqCst), pulled);
}

// -- Orchestrator --

#[tokio::test]
async fn orchestrator_reports_cancelled_after_drop() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path(), MockProvider::new(16).endless().with_token_delay(5));

    let mut stream = app
        .orchestrator
        .start(ChatRequest {
            messages: vec![Message::user("stream please")],
            use_rag: false,
            k: 0,
        })
        .await
        .unwrap();
    let mut phase = stream.phase_watch();
    assert!(matches!(stream.next().await, Some(StreamEvent::Token(_))));
    drop(stream);

    tokio::time::timeout(
        Duration::from_secs(2),
        phase.wait_for(|p| *p == Phase::Cancelled),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn rag_with_zero_k_sends_empty_context() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("a.txt", "ignored text")]);
    let provider = MockProvider::new(16);
    let app = app(dir.path(), provider.clone());

    let stream = app
        .orchestrator
        .start(ChatRequest {
            messages: vec![Message::user("q")],
            use_rag: true,
            k: 0,
        })
        .await
        .unwrap();
    assert!(stream.sources().is_empty());
    let events: Vec<_> = stream.collect().await;
    assert_eq!(events.last(), Some(&StreamEvent::Done));
    assert!(!provider.last_prompt()[1].content.contains("ignored text"));
}

use async_trait::async_trait;
use hexagon::completer::{Completer, Message, Role};
use hexagon::error::{BoxError, Error};
use hexagon::replay::{
    Cassette, RecordingCompleter, RecordingRetriever, RecordingTool, ReplayCompleter,
    ReplayMode, ReplayRetriever, ReplayTool, SessionRecorder,
};
use hexagon::retriever::{Document, Retriever};
use hexagon::tool::{Tool, ToolMetadata, ToolResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

struct CountingCompleter {
    reply: String,
    calls: AtomicUsize,
}

impl CountingCompleter {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Completer for CountingCompleter {
    async fn complete(&self, _messages: &[Message]) -> Result<Message, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Message::new(Role::Assistant, &self.reply))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }
}

fn shared_cassette(name: &str) -> Arc<Mutex<Cassette>> {
    Arc::new(Mutex::new(Cassette::new(name)))
}

#[tokio::test]
async fn record_then_strict_replay_round_trips() {
    let cassette = shared_cassette("round-trip");
    let live = Arc::new(CountingCompleter::new("Hi"));

    let recorder = RecordingCompleter::new(live.clone(), cassette.clone());
    let recorded = recorder.complete(&[Message::user("Hello")]).await.unwrap();
    assert_eq!(recorded.content.as_ref(), "Hi");
    assert_eq!(cassette.lock().await.len(), 1);

    let replayer = ReplayCompleter::new("mock-model", cassette.clone(), ReplayMode::Strict);
    let replayed = replayer.complete(&[Message::user("Hello")]).await.unwrap();
    assert_eq!(replayed.content.as_ref(), "Hi");
    assert_eq!(replayer.hits(), 1);
    assert_eq!(replayer.misses(), 0);
    // The live backend was only hit during recording.
    assert_eq!(live.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn strict_replay_misses_fail_and_fallback_delegates() {
    let cassette = shared_cassette("misses");
    RecordingCompleter::new(Arc::new(CountingCompleter::new("Hi")), cassette.clone())
        .complete(&[Message::user("Hello")])
        .await
        .unwrap();

    // Strict mode: unknown request is a replay miss.
    let strict = ReplayCompleter::new("mock-model", cassette.clone(), ReplayMode::Strict);
    let err = strict
        .complete(&[Message::user("Something else")])
        .await
        .unwrap_err();
    let err = err.downcast::<Error>().unwrap();
    assert!(matches!(*err, Error::ReplayMiss { .. }));
    assert_eq!(strict.misses(), 1);

    // Fallback mode: the live completer answers instead.
    let fallback_backend = Arc::new(CountingCompleter::new("live answer"));
    let fallback = ReplayCompleter::new("mock-model", cassette, ReplayMode::Fallback)
        .with_fallback(fallback_backend.clone());
    let answer = fallback
        .complete(&[Message::user("Something else")])
        .await
        .unwrap();
    assert_eq!(answer.content.as_ref(), "live answer");
    assert_eq!(fallback.misses(), 1);
    assert_eq!(fallback_backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recorded_errors_replay_as_errors() {
    struct FailingCompleter;

    #[async_trait]
    impl Completer for FailingCompleter {
        async fn complete(&self, _messages: &[Message]) -> Result<Message, BoxError> {
            Err("rate limited".into())
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    let cassette = shared_cassette("errors");
    let recorder = RecordingCompleter::new(Arc::new(FailingCompleter), cassette.clone());
    assert!(recorder.complete(&[Message::user("Hello")]).await.is_err());

    let replayer = ReplayCompleter::new("mock-model", cassette, ReplayMode::Strict);
    let err = replayer.complete(&[Message::user("Hello")]).await.unwrap_err();
    assert!(err.to_string().contains("rate limited"));
    assert_eq!(replayer.hits(), 1);
}

#[tokio::test]
async fn first_recorded_interaction_wins_on_collision() {
    let cassette = shared_cassette("collisions");
    let first = RecordingCompleter::new(Arc::new(CountingCompleter::new("first")), cassette.clone());
    first.complete(&[Message::user("Hello")]).await.unwrap();
    let second =
        RecordingCompleter::new(Arc::new(CountingCompleter::new("second")), cassette.clone());
    second.complete(&[Message::user("Hello")]).await.unwrap();
    assert_eq!(cassette.lock().await.len(), 2);

    let replayer = ReplayCompleter::new("mock-model", cassette, ReplayMode::Strict);
    let replayed = replayer.complete(&[Message::user("Hello")]).await.unwrap();
    assert_eq!(replayed.content.as_ref(), "first");
}

#[tokio::test]
async fn cassettes_survive_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cassette.json");

    let cassette = shared_cassette("persisted");
    RecordingCompleter::new(Arc::new(CountingCompleter::new("Hi")), cassette.clone())
        .complete(&[Message::user("Hello")])
        .await
        .unwrap();
    cassette.lock().await.save(&path).unwrap();

    let loaded = Cassette::load(&path).unwrap();
    assert_eq!(loaded.name, "persisted");
    assert_eq!(loaded.len(), 1);

    let replayer = ReplayCompleter::new(
        "mock-model",
        Arc::new(Mutex::new(loaded)),
        ReplayMode::Strict,
    );
    let replayed = replayer.complete(&[Message::user("Hello")]).await.unwrap();
    assert_eq!(replayed.content.as_ref(), "Hi");
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::new("echo", "Echoes its input")
    }

    async fn execute(&self, parameters: serde_json::Value) -> Result<ToolResult, BoxError> {
        Ok(ToolResult::success(serde_json::json!({ "echo": parameters })))
    }
}

#[tokio::test]
async fn tool_interactions_record_and_replay() {
    let cassette = shared_cassette("tools");
    let recorder = RecordingTool::new(Arc::new(EchoTool), cassette.clone());
    let params = serde_json::json!({"text": "ping"});
    let live = recorder.execute(params.clone()).await.unwrap();
    assert!(live.success);

    let replayer = ReplayTool::new(EchoTool.metadata(), cassette, ReplayMode::Strict);
    let replayed = replayer.execute(params).await.unwrap();
    assert!(replayed.success);
    assert_eq!(replayed.output, live.output);
    assert_eq!(replayer.hits(), 1);

    let miss = replayer.execute(serde_json::json!({"text": "pong"})).await;
    assert!(miss.is_err());
    assert_eq!(replayer.misses(), 1);
}

struct FixtureRetriever;

#[async_trait]
impl Retriever for FixtureRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Document>, BoxError> {
        Ok((0..top_k)
            .map(|i| Document::new(format!("d{}", i), format!("{} result {}", query, i)))
            .collect())
    }
}

#[tokio::test]
async fn retrieval_interactions_record_and_replay() {
    let cassette = shared_cassette("rag");
    let recorder = RecordingRetriever::new(Arc::new(FixtureRetriever), cassette.clone());
    let live = recorder.retrieve("rust", 2).await.unwrap();
    assert_eq!(live.len(), 2);

    let replayer = ReplayRetriever::new(cassette, ReplayMode::Strict);
    let replayed = replayer.retrieve("rust", 2).await.unwrap();
    assert_eq!(replayed.len(), 2);
    assert_eq!(replayed[0].id, live[0].id);
    assert_eq!(replayed[0].content, live[0].content);

    // A different top_k is a different request.
    assert!(replayer.retrieve("rust", 3).await.is_err());
}

#[tokio::test]
async fn session_recorder_saves_non_empty_streams() {
    let dir = tempfile::tempdir().unwrap();
    let session = SessionRecorder::new("demo");

    let completer = RecordingCompleter::new(
        Arc::new(CountingCompleter::new("Hi")),
        session.llm_cassette(),
    );
    completer.complete(&[Message::user("Hello")]).await.unwrap();

    let retriever = RecordingRetriever::new(Arc::new(FixtureRetriever), session.rag_cassette());
    retriever.retrieve("rust", 1).await.unwrap();

    session
        .record_event("turn", serde_json::json!({"query": "Hello"}))
        .await;
    session.save_all(dir.path()).await.unwrap();

    assert!(dir.path().join("demo-llm.json").is_file());
    assert!(dir.path().join("demo-rag.json").is_file());
    assert!(dir.path().join("demo-events.json").is_file());
    // No tool traffic was recorded, so no tool file is written.
    assert!(!dir.path().join("demo-tool.json").exists());
}

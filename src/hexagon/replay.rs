//! Record/replay harness for external interactions.
//!
//! Any [`Completer`], [`Tool`], or [`Retriever`] can be wrapped in a
//! recording decorator that captures each interaction into a [`Cassette`],
//! keyed by the request fingerprint. A replay decorator later serves those
//! recordings back — strictly (unknown requests fail with a replay miss) or
//! with a live fallback — which makes agent flows reproducible in tests
//! without network access.
//!
//! # Example
//!
//! ```rust,no_run
//! use hexagon::replay::{Cassette, RecordingCompleter, ReplayCompleter, ReplayMode};
//! use hexagon::completer::{Completer, Message, Role};
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//!
//! # async fn example(live: Arc<dyn Completer>) -> Result<(), hexagon::BoxError> {
//! let cassette = Arc::new(Mutex::new(Cassette::new("smoke")));
//!
//! // Record once against the live backend...
//! let recorder = RecordingCompleter::new(live, cassette.clone());
//! recorder.complete(&[Message::user("Hello")]).await?;
//!
//! // ...then replay forever, no backend needed.
//! let replayer = ReplayCompleter::new("gpt-4.1", cassette, ReplayMode::Strict);
//! let replayed = replayer.complete(&[Message::user("Hello")]).await?;
//! println!("{}", replayed.content);
//! # Ok(())
//! # }
//! ```

use crate::completer::{Completer, Message, Role};
use crate::error::{BoxError, Error, Result};
use crate::fingerprint::{fingerprint_value, request_value};
use crate::retriever::{Document, Retriever};
use crate::tool::{Tool, ToolMetadata, ToolResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One captured request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub request: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub request_hash: String,
}

/// A named sequence of interactions, serializable to JSON.
///
/// Within one cassette an interaction is retrieved by `request_hash`; on
/// hash collision the first recorded match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cassette {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cassette {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            interactions: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an interaction for `request`, returning its hash.
    pub fn record(
        &mut self,
        request: Value,
        response: Option<Value>,
        error: Option<String>,
        duration_ms: u64,
    ) -> String {
        let request_hash = fingerprint_value(&request);
        self.interactions.push(Interaction {
            id: Uuid::new_v4().to_string(),
            request,
            response,
            error,
            duration_ms,
            timestamp: Utc::now(),
            request_hash: request_hash.clone(),
        });
        self.updated_at = Utc::now();
        request_hash
    }

    /// First interaction recorded under `request_hash`, if any.
    pub fn find(&self, request_hash: &str) -> Option<&Interaction> {
        self.interactions
            .iter()
            .find(|i| i.request_hash == request_hash)
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Persist as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(self).map_err(|err| Error::Parse {
            what: format!("cassette '{}'", self.name),
            message: err.to_string(),
        })?;
        std::fs::write(path, body).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|err| Error::Parse {
            what: path.display().to_string(),
            message: err.to_string(),
        })
    }
}

/// What a replay decorator does when no recording matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Return [`Error::ReplayMiss`].
    Strict,
    /// Delegate to the configured fallback caller.
    Fallback,
}

// ── Completer decorators ──────────────────────────────────────────────────

/// Records every completion into a shared cassette, passing results through
/// unchanged.
pub struct RecordingCompleter {
    inner: Arc<dyn Completer>,
    cassette: Arc<Mutex<Cassette>>,
}

impl RecordingCompleter {
    pub fn new(inner: Arc<dyn Completer>, cassette: Arc<Mutex<Cassette>>) -> Self {
        Self { inner, cassette }
    }
}

#[async_trait]
impl Completer for RecordingCompleter {
    async fn complete(&self, messages: &[Message]) -> std::result::Result<Message, BoxError> {
        let request = request_value(self.inner.model_name(), messages);
        let started = Instant::now();
        let outcome = self.inner.complete(messages).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (response, error) = match &outcome {
            Ok(message) => (
                Some(serde_json::json!({
                    "role": message.role.as_str(),
                    "content": message.content.as_ref(),
                })),
                None,
            ),
            Err(err) => (None, Some(err.to_string())),
        };
        self.cassette
            .lock()
            .await
            .record(request, response, error, duration_ms);
        outcome
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

/// Serves recorded completions from a cassette.
pub struct ReplayCompleter {
    model: String,
    cassette: Arc<Mutex<Cassette>>,
    fallback: Option<Arc<dyn Completer>>,
    mode: ReplayMode,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReplayCompleter {
    pub fn new(
        model: impl Into<String>,
        cassette: Arc<Mutex<Cassette>>,
        mode: ReplayMode,
    ) -> Self {
        Self {
            model: model.into(),
            cassette,
            fallback: None,
            mode,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Completer>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completer for ReplayCompleter {
    async fn complete(&self, messages: &[Message]) -> std::result::Result<Message, BoxError> {
        let fingerprint = fingerprint_value(&request_value(&self.model, messages));
        let recorded = {
            let cassette = self.cassette.lock().await;
            cassette.find(&fingerprint).cloned()
        };

        match recorded {
            Some(interaction) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                if let Some(error) = interaction.error {
                    return Err(error.into());
                }
                let response = interaction
                    .response
                    .ok_or_else(|| Error::ReplayMiss {
                        fingerprint: fingerprint.clone(),
                    })?;
                let content = response
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(Message::new(Role::Assistant, content))
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                match (self.mode, &self.fallback) {
                    (ReplayMode::Fallback, Some(fallback)) => fallback.complete(messages).await,
                    _ => Err(Box::new(Error::ReplayMiss { fingerprint })),
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ── Tool decorators ───────────────────────────────────────────────────────

fn tool_request(name: &str, parameters: &Value) -> Value {
    serde_json::json!({ "tool": name, "parameters": parameters })
}

fn tool_response(result: &ToolResult) -> Value {
    serde_json::json!({
        "success": result.success,
        "output": result.output,
        "error": result.error,
    })
}

/// Records every tool execution into a shared cassette.
pub struct RecordingTool {
    inner: Arc<dyn Tool>,
    cassette: Arc<Mutex<Cassette>>,
}

impl RecordingTool {
    pub fn new(inner: Arc<dyn Tool>, cassette: Arc<Mutex<Cassette>>) -> Self {
        Self { inner, cassette }
    }
}

#[async_trait]
impl Tool for RecordingTool {
    fn metadata(&self) -> ToolMetadata {
        self.inner.metadata()
    }

    async fn execute(&self, parameters: Value) -> std::result::Result<ToolResult, BoxError> {
        let request = tool_request(&self.inner.metadata().name, &parameters);
        let started = Instant::now();
        let outcome = self.inner.execute(parameters).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (response, error) = match &outcome {
            Ok(result) => (Some(tool_response(result)), None),
            Err(err) => (None, Some(err.to_string())),
        };
        self.cassette
            .lock()
            .await
            .record(request, response, error, duration_ms);
        outcome
    }
}

/// Serves recorded tool results from a cassette.
pub struct ReplayTool {
    metadata: ToolMetadata,
    cassette: Arc<Mutex<Cassette>>,
    fallback: Option<Arc<dyn Tool>>,
    mode: ReplayMode,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReplayTool {
    pub fn new(metadata: ToolMetadata, cassette: Arc<Mutex<Cassette>>, mode: ReplayMode) -> Self {
        Self {
            metadata,
            cassette,
            fallback: None,
            mode,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Tool>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for ReplayTool {
    fn metadata(&self) -> ToolMetadata {
        self.metadata.clone()
    }

    async fn execute(&self, parameters: Value) -> std::result::Result<ToolResult, BoxError> {
        let request = tool_request(&self.metadata.name, &parameters);
        let fingerprint = fingerprint_value(&request);
        let recorded = {
            let cassette = self.cassette.lock().await;
            cassette.find(&fingerprint).cloned()
        };

        match recorded {
            Some(interaction) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                if let Some(error) = interaction.error {
                    return Err(error.into());
                }
                let response = interaction.response.unwrap_or(Value::Null);
                Ok(ToolResult {
                    success: response
                        .get("success")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    output: response.get("output").cloned().unwrap_or(Value::Null),
                    error: response
                        .get("error")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                match (self.mode, &self.fallback) {
                    (ReplayMode::Fallback, Some(fallback)) => fallback.execute(parameters).await,
                    _ => Err(Box::new(Error::ReplayMiss { fingerprint })),
                }
            }
        }
    }
}

// ── Retriever decorators ──────────────────────────────────────────────────

fn retriever_request(query: &str, top_k: usize) -> Value {
    serde_json::json!({ "query": query, "top_k": top_k })
}

/// Records every retrieval into a shared cassette.
pub struct RecordingRetriever {
    inner: Arc<dyn Retriever>,
    cassette: Arc<Mutex<Cassette>>,
}

impl RecordingRetriever {
    pub fn new(inner: Arc<dyn Retriever>, cassette: Arc<Mutex<Cassette>>) -> Self {
        Self { inner, cassette }
    }
}

#[async_trait]
impl Retriever for RecordingRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<Document>, BoxError> {
        let request = retriever_request(query, top_k);
        let started = Instant::now();
        let outcome = self.inner.retrieve(query, top_k).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (response, error) = match &outcome {
            Ok(docs) => (serde_json::to_value(docs).ok(), None),
            Err(err) => (None, Some(err.to_string())),
        };
        self.cassette
            .lock()
            .await
            .record(request, response, error, duration_ms);
        outcome
    }
}

/// Serves recorded retrievals from a cassette.
pub struct ReplayRetriever {
    cassette: Arc<Mutex<Cassette>>,
    fallback: Option<Arc<dyn Retriever>>,
    mode: ReplayMode,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReplayRetriever {
    pub fn new(cassette: Arc<Mutex<Cassette>>, mode: ReplayMode) -> Self {
        Self {
            cassette,
            fallback: None,
            mode,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn Retriever>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for ReplayRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<Document>, BoxError> {
        let fingerprint = fingerprint_value(&retriever_request(query, top_k));
        let recorded = {
            let cassette = self.cassette.lock().await;
            cassette.find(&fingerprint).cloned()
        };

        match recorded {
            Some(interaction) => {
                self.hits.fetch_add(1, Ordering::SeqCst);
                if let Some(error) = interaction.error {
                    return Err(error.into());
                }
                let response = interaction.response.unwrap_or(Value::Null);
                let docs: Vec<Document> =
                    serde_json::from_value(response).map_err(|err| Box::new(Error::Parse {
                        what: "recorded retrieval".to_string(),
                        message: err.to_string(),
                    }) as BoxError)?;
                Ok(docs)
            }
            None => {
                self.misses.fetch_add(1, Ordering::SeqCst);
                match (self.mode, &self.fallback) {
                    (ReplayMode::Fallback, Some(fallback)) => {
                        fallback.retrieve(query, top_k).await
                    }
                    _ => Err(Box::new(Error::ReplayMiss { fingerprint })),
                }
            }
        }
    }
}

// ── Session recording ─────────────────────────────────────────────────────

/// One entry on the session timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub detail: Value,
}

/// Aggregates three parallel cassettes — LLM, tool, and retrieval traffic —
/// plus an append-only event timeline, for capturing a whole agent session.
pub struct SessionRecorder {
    name: String,
    llm: Arc<Mutex<Cassette>>,
    tool: Arc<Mutex<Cassette>>,
    rag: Arc<Mutex<Cassette>>,
    events: Mutex<Vec<SessionEvent>>,
}

impl SessionRecorder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            llm: Arc::new(Mutex::new(Cassette::new(format!("{}-llm", name)))),
            tool: Arc::new(Mutex::new(Cassette::new(format!("{}-tool", name)))),
            rag: Arc::new(Mutex::new(Cassette::new(format!("{}-rag", name)))),
            events: Mutex::new(Vec::new()),
            name,
        }
    }

    /// The LLM cassette, for wrapping completers.
    pub fn llm_cassette(&self) -> Arc<Mutex<Cassette>> {
        self.llm.clone()
    }

    /// The tool cassette, for wrapping tools.
    pub fn tool_cassette(&self) -> Arc<Mutex<Cassette>> {
        self.tool.clone()
    }

    /// The retrieval cassette, for wrapping retrievers.
    pub fn rag_cassette(&self) -> Arc<Mutex<Cassette>> {
        self.rag.clone()
    }

    /// Append a timeline event.
    pub async fn record_event(&self, kind: impl Into<String>, detail: Value) {
        self.events.lock().await.push(SessionEvent {
            timestamp: Utc::now(),
            kind: kind.into(),
            detail,
        });
    }

    /// Write each non-empty stream to its own file under `dir`:
    /// `<name>-llm.json`, `<name>-tool.json`, `<name>-rag.json`, and
    /// `<name>-events.json`.
    pub async fn save_all(&self, dir: &Path) -> Result<()> {
        for (suffix, cassette) in [("llm", &self.llm), ("tool", &self.tool), ("rag", &self.rag)] {
            let cassette = cassette.lock().await;
            if cassette.is_empty() {
                continue;
            }
            let path = dir.join(format!("{}-{}.json", self.name, suffix));
            cassette.save(&path)?;
        }

        let events = self.events.lock().await;
        if !events.is_empty() {
            let path = dir.join(format!("{}-events.json", self.name));
            let body =
                serde_json::to_string_pretty(&*events).map_err(|err| Error::Parse {
                    what: "session events".to_string(),
                    message: err.to_string(),
                })?;
            std::fs::write(&path, body).map_err(|source| Error::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

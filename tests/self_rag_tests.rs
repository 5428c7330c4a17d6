use async_trait::async_trait;
use hexagon::completer::{Completer, Message, Role};
use hexagon::error::BoxError;
use hexagon::retriever::{Document, Retriever};
use hexagon::self_rag::{Critic, SelfRag, SelfRagConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct SequentialMockCompleter {
    responses: Vec<String>,
    call_count: AtomicUsize,
}

impl SequentialMockCompleter {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: responses.into_iter().map(str::to_string).collect(),
            call_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Completer for SequentialMockCompleter {
    async fn complete(&self, _messages: &[Message]) -> Result<Message, BoxError> {
        let index = self.call_count.fetch_add(1, Ordering::SeqCst);
        let response = self
            .responses
            .get(index)
            .or_else(|| self.responses.last())
            .ok_or("missing mock response")?;
        Ok(Message::new(Role::Assistant, response))
    }
}

struct FixtureRetriever {
    docs: Vec<Document>,
    calls: AtomicUsize,
}

impl FixtureRetriever {
    fn new(docs: Vec<Document>) -> Self {
        Self {
            docs,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Retriever for FixtureRetriever {
    async fn retrieve(&self, _query: &str, top_k: usize) -> Result<Vec<Document>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.docs.iter().take(top_k).cloned().collect())
    }
}

/// A critic scripted per axis.
struct ScriptedCritic {
    needs: Result<(bool, f64), String>,
    relevance: Vec<f64>,
    faithfulness: Vec<f64>,
    completeness: Vec<f64>,
    faithfulness_calls: AtomicUsize,
    completeness_calls: AtomicUsize,
}

impl ScriptedCritic {
    fn new(needs: bool) -> Self {
        Self {
            needs: Ok((needs, 0.9)),
            relevance: vec![1.0],
            faithfulness: vec![1.0],
            completeness: vec![1.0],
            faithfulness_calls: AtomicUsize::new(0),
            completeness_calls: AtomicUsize::new(0),
        }
    }

    fn pick(scores: &[f64], call: usize) -> f64 {
        scores.get(call).or(scores.last()).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl Critic for ScriptedCritic {
    async fn needs_retrieval(&self, _query: &str) -> Result<(bool, f64), BoxError> {
        self.needs.clone().map_err(|e| e.into())
    }

    async fn is_relevant(
        &self,
        _query: &str,
        doc: &Document,
    ) -> Result<(bool, f64), BoxError> {
        let index: usize = doc.id.trim_start_matches('d').parse().unwrap_or(0);
        let score = Self::pick(&self.relevance, index);
        Ok((score >= 0.5, score))
    }

    async fn is_faithful(&self, _answer: &str, _docs: &[Document]) -> Result<f64, BoxError> {
        let call = self.faithfulness_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::pick(&self.faithfulness, call))
    }

    async fn is_complete(&self, _query: &str, _answer: &str) -> Result<f64, BoxError> {
        let call = self.completeness_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::pick(&self.completeness, call))
    }
}

fn docs() -> Vec<Document> {
    vec![
        Document::new("d0", "rust ownership rules"),
        Document::new("d1", "unrelated cooking recipe"),
    ]
}

#[tokio::test]
async fn returns_immediately_when_thresholds_are_met() {
    let completer = Arc::new(SequentialMockCompleter::new(vec!["a fine answer"]));
    let retriever = Arc::new(FixtureRetriever::new(docs()));
    let critic = Arc::new(ScriptedCritic::new(true));

    let rag = SelfRag::new(completer, retriever.clone(), critic);
    let response = rag.run("what is ownership?").await.unwrap();

    assert_eq!(response.answer, "a fine answer");
    assert_eq!(response.attempt, 1);
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn irrelevant_documents_are_filtered() {
    let completer = Arc::new(SequentialMockCompleter::new(vec!["answer"]));
    let retriever = Arc::new(FixtureRetriever::new(docs()));
    let mut critic = ScriptedCritic::new(true);
    // d0 relevant, d1 not.
    critic.relevance = vec![0.9, 0.1];

    let rag = SelfRag::new(completer, retriever, Arc::new(critic));
    let response = rag.run("ownership?").await.unwrap();

    assert_eq!(response.documents.len(), 1);
    assert_eq!(response.documents[0].id, "d0");
}

#[tokio::test]
async fn skips_retrieval_when_critic_says_no() {
    let completer = Arc::new(SequentialMockCompleter::new(vec!["from memory"]));
    let retriever = Arc::new(FixtureRetriever::new(docs()));
    let critic = Arc::new(ScriptedCritic::new(false));

    let rag = SelfRag::new(completer, retriever.clone(), critic);
    let response = rag.run("2+2?").await.unwrap();

    assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
    assert!(response.documents.is_empty());
    // No documents used, so faithfulness defaults to perfect.
    assert_eq!(response.faithfulness, 1.0);
}

#[tokio::test]
async fn critic_failure_defaults_to_retrieval() {
    let completer = Arc::new(SequentialMockCompleter::new(vec!["answer"]));
    let retriever = Arc::new(FixtureRetriever::new(docs()));
    let mut critic = ScriptedCritic::new(true);
    critic.needs = Err("critic offline".to_string());

    let rag = SelfRag::new(completer, retriever.clone(), Arc::new(critic));
    rag.run("anything").await.unwrap();
    assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn best_attempt_is_returned_when_thresholds_never_pass() {
    let completer = Arc::new(SequentialMockCompleter::new(vec![
        "attempt one",
        "attempt two",
        "attempt three",
    ]));
    let retriever = Arc::new(FixtureRetriever::new(docs()));
    let mut critic = ScriptedCritic::new(true);
    // Completeness stays below the 0.7 threshold; the middle attempt is best.
    critic.completeness = vec![0.3, 0.6, 0.4];

    let rag = SelfRag::new(completer, retriever, Arc::new(critic)).with_config(SelfRagConfig {
        max_retries: 3,
        ..SelfRagConfig::default()
    });
    let response = rag.run("hard question").await.unwrap();

    assert_eq!(response.answer, "attempt two");
    assert_eq!(response.attempt, 2);
    assert!(response.completeness < 0.7);
}

#[tokio::test]
async fn errors_only_when_every_attempt_errors() {
    struct BrokenCompleter;

    #[async_trait]
    impl Completer for BrokenCompleter {
        async fn complete(&self, _messages: &[Message]) -> Result<Message, BoxError> {
            Err("model down".into())
        }
    }

    let retriever = Arc::new(FixtureRetriever::new(docs()));
    let critic = Arc::new(ScriptedCritic::new(false));
    let rag = SelfRag::new(Arc::new(BrokenCompleter), retriever, critic);

    let err = rag.run("q").await.unwrap_err();
    assert!(err.to_string().contains("model down"));
}

//! End-to-end tests of the query pipeline over the in-memory backends.
//!
//! A scripted generator stands in for the language model so that runs,
//! failures, and topic labelling are deterministic.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use litreview_core::context::Scope;
use litreview_core::embedding::HashingEmbedder;
use litreview_core::engine::{EngineSettings, NoReport, QueryEngine};
use litreview_core::error::{Error, Result};
use litreview_core::index::memory::InMemoryVectorIndex;
use litreview_core::index::{KeyFilter, VectorIndex};
use litreview_core::llm::{ChatMessage, GenerationParams, Generator};
use litreview_core::models::{BibliographyItem, Passage, Project, SearchHit};
use litreview_core::prompt::{Prompt, PromptKind};
use litreview_core::store::memory::InMemoryRecordStore;
use litreview_core::store::RecordStore;
use litreview_core::topics::cluster::NOISE;
use litreview_core::topics::{TopicAggregator, TopicSettings};

// ─── Test doubles ───────────────────────────────────────────────────

type Script = dyn Fn(usize, &[ChatMessage]) -> Result<String> + Send + Sync;

/// Generator whose answer is computed from the call number and messages.
struct ScriptedGenerator {
    script: Box<Script>,
    calls: AtomicUsize,
    last_user: Mutex<String>,
}

impl ScriptedGenerator {
    fn new(script: impl Fn(usize, &[ChatMessage]) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            last_user: Mutex::new(String::new()),
        }
    }

    fn answering(answer: &'static str) -> Self {
        Self::new(move |_, _| Ok(answer.to_string()))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_user(&self) -> String {
        self.last_user.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = messages.iter().find(|m| m.role == "user") {
            *self.last_user.lock().unwrap() = user.content.clone();
        }
        (self.script)(n, messages)
    }
}

/// Index wrapper that counts searches.
struct CountingIndex {
    inner: InMemoryVectorIndex,
    searches: AtomicUsize,
}

#[async_trait]
impl VectorIndex for CountingIndex {
    async fn add(&self, item_key: &str, passages: &[Passage]) -> Result<()> {
        self.inner.add(item_key, passages).await
    }

    async fn keys(&self) -> Result<BTreeSet<String>> {
        self.inner.keys().await
    }

    async fn contains(&self, item_key: &str) -> Result<bool> {
        self.inner.contains(item_key).await
    }

    async fn count(&self, item_key: &str) -> Result<usize> {
        self.inner.count(item_key).await
    }

    async fn search(&self, query: &str, k: usize, filter: Option<&KeyFilter>) -> Result<Vec<SearchHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query, k, filter).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

struct Fixture {
    store: Arc<InMemoryRecordStore>,
    index: Arc<CountingIndex>,
    project: Project,
}

impl Fixture {
    fn engine(&self, generator: Option<Arc<dyn Generator>>) -> QueryEngine {
        QueryEngine::new(
            self.store.clone(),
            self.index.clone(),
            generator,
            EngineSettings {
                chunk_size: 200,
                chunk_overlap: 40,
                k: 4,
                ..EngineSettings::default()
            },
        )
    }

    fn searches(&self) -> usize {
        self.index.searches.load(Ordering::SeqCst)
    }
}

const TEXTS: &[(&str, &str, &str)] = &[
    (
        "a1",
        "Coral reefs under heat stress",
        "Coral reefs bleach when ocean temperatures rise. Bleaching events were recorded across \
         the reef in three consecutive summers.\n\nRecovery of coral cover was slow.",
    ),
    (
        "a2",
        "Feedback in programming courses",
        "Students in an introductory programming course received automated feedback. \
         Feedback frequency correlated with course completion.",
    ),
    (
        "a3",
        "Urban heat islands",
        "City districts with little vegetation showed higher night temperatures. Tree planting \
         reduced the urban heat island effect.",
    ),
];

async fn fixture() -> Fixture {
    let store = Arc::new(InMemoryRecordStore::new());
    let index = Arc::new(CountingIndex {
        inner: InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(128))),
        searches: AtomicUsize::new(0),
    });

    let mut keys = Vec::new();
    for (key, title, text) in TEXTS {
        store
            .upsert_item(&BibliographyItem::new(*key).with_title(*title).with_text(*text))
            .await
            .unwrap();
        keys.push(key.to_string());
    }
    store
        .upsert_item(&BibliographyItem::new("no-text").with_title("Abstract only"))
        .await
        .unwrap();

    let fixture = Fixture {
        store,
        index,
        project: Project::new("review"),
    };
    fixture.store.create_project(&fixture.project).await.unwrap();
    fixture
        .store
        .add_items_to_project(&fixture.project.id, &keys)
        .await
        .unwrap();
    fixture
        .engine(None)
        .update_index(false, &NoReport)
        .await
        .unwrap();
    fixture
}

fn yes_no() -> Prompt {
    Prompt::new("Is the study empirical?", PromptKind::YesNo)
}

// ─── Indexing ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_update_index_skips_indexed_and_textless_items() {
    let fx = fixture().await;
    let engine = fx.engine(None);

    let again = engine.update_index(false, &NoReport).await.unwrap();
    assert_eq!(again.indexed, 0);
    assert_eq!(again.already_indexed, 3);
    assert_eq!(again.without_text, 1);

    let before = fx.index.count("a1").await.unwrap();
    let redo = engine.update_index(true, &NoReport).await.unwrap();
    assert_eq!(redo.indexed, 3);
    assert_eq!(fx.index.count("a1").await.unwrap(), before);
}

#[tokio::test]
async fn test_index_item_twice_is_a_no_op() {
    let fx = fixture().await;
    let engine = fx.engine(None);
    let item = fx.store.get_item("a1").await.unwrap().unwrap();
    let before = fx.index.count("a1").await.unwrap();

    let outcome = engine.index_item(&item).await.unwrap();
    assert_eq!(outcome, litreview_core::engine::IndexOutcome::AlreadyIndexed);
    assert_eq!(fx.index.count("a1").await.unwrap(), before);
}

// ─── Retrieval ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_search_prefilters_scope() {
    let fx = fixture().await;
    let engine = fx.engine(None);

    let hits = engine
        .search("coral reef bleaching", &Scope::Item("a2".into()), 5)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.item_key == "a2"));

    let all = engine
        .search("coral reef bleaching", &Scope::All, 1)
        .await
        .unwrap();
    assert_eq!(all[0].item_key, "a1");
}

#[tokio::test]
async fn test_context_only_contains_the_answered_item() {
    let fx = fixture().await;
    let generator = Arc::new(ScriptedGenerator::answering("Yes."));
    let engine = fx.engine(Some(generator.clone()));
    let prompt = Prompt::new("Does heat cause coral bleaching?", PromptKind::YesNo);
    let query = engine
        .create_query(&fx.project.id, "heat", &prompt, false)
        .await
        .unwrap();

    engine
        .run_query(&query.id, Some(&["a2".to_string()][..]), &NoReport)
        .await
        .unwrap();
    let user = generator.last_user();
    assert!(user.starts_with("Question: Does heat cause coral bleaching?"));
    assert!(user.contains("title: Feedback in programming courses"));
    assert!(user.contains("automated feedback"));
    assert!(!user.contains("Coral reefs bleach"));
}

// ─── Execution ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_twice_stores_one_response() {
    let fx = fixture().await;
    let generator = Arc::new(ScriptedGenerator::new(|n, _| Ok(format!("Yes, call {n}"))));
    let engine = fx.engine(Some(generator.clone()));
    let query = engine
        .create_query(&fx.project.id, "empirical", &yes_no(), false)
        .await
        .unwrap();

    let first = engine.run_query(&query.id, None, &NoReport).await.unwrap();
    assert_eq!((first.total, first.answered, first.skipped), (3, 3, 0));
    let stored = fx.store.get_response(&query.id, "a1").await.unwrap().unwrap();

    let second = engine.run_query(&query.id, None, &NoReport).await.unwrap();
    assert_eq!((second.answered, second.skipped), (0, 3));
    assert_eq!(generator.calls(), 3);

    let responses = fx.store.responses_for_query(&query.id).await.unwrap();
    assert_eq!(responses.len(), 3);
    let again = fx.store.get_response(&query.id, "a1").await.unwrap().unwrap();
    assert_eq!(again.text, stored.text);
}

#[tokio::test]
async fn test_failed_batch_keeps_committed_responses() {
    let fx = fixture().await;
    let failing = Arc::new(ScriptedGenerator::new(|n, _| {
        if n < 2 {
            Ok("No.".to_string())
        } else {
            Err(Error::generation(None, "rate limited"))
        }
    }));
    let engine = fx.engine(Some(failing));
    let query = engine
        .create_query(&fx.project.id, "empirical", &yes_no(), false)
        .await
        .unwrap();

    let err = engine.run_query(&query.id, None, &NoReport).await.unwrap_err();
    match err {
        Error::Generation { item_key, .. } => assert_eq!(item_key.as_deref(), Some("a3")),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(fx.store.responses_for_query(&query.id).await.unwrap().len(), 2);

    let healthy = Arc::new(ScriptedGenerator::answering("Yes."));
    let resumed = fx
        .engine(Some(healthy.clone()))
        .run_query(&query.id, None, &NoReport)
        .await
        .unwrap();
    assert_eq!((resumed.answered, resumed.skipped), (1, 2));
    assert_eq!(healthy.calls(), 1);
}

#[tokio::test]
async fn test_missing_generator_fails_before_retrieval() {
    let fx = fixture().await;
    let engine = fx.engine(None);
    let query = engine
        .create_query(&fx.project.id, "empirical", &yes_no(), false)
        .await
        .unwrap();

    let err = engine.run_query(&query.id, None, &NoReport).await.unwrap_err();
    assert!(matches!(err, Error::MissingCapability(_)));
    let err = engine
        .rag(&yes_no(), &Scope::All, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingCapability(_)));

    assert_eq!(fx.searches(), 0);
    assert!(fx.store.responses_for_query(&query.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_include_restricts_and_validates_scope() {
    let fx = fixture().await;
    let engine = fx.engine(Some(Arc::new(ScriptedGenerator::answering("Yes."))));
    let query = engine
        .create_query(&fx.project.id, "empirical", &yes_no(), false)
        .await
        .unwrap();

    let include = vec!["a3".to_string()];
    let summary = engine
        .run_query(&query.id, Some(include.as_slice()), &NoReport)
        .await
        .unwrap();
    assert_eq!((summary.total, summary.answered), (1, 1));

    let outsider = vec!["no-text".to_string()];
    let err = engine
        .run_query(&query.id, Some(outsider.as_slice()), &NoReport)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidScope(_)));
}

#[tokio::test]
async fn test_update_prompt_clears_responses() {
    let fx = fixture().await;
    let engine = fx.engine(Some(Arc::new(ScriptedGenerator::answering("Yes."))));
    let query = engine
        .create_query(&fx.project.id, "empirical", &yes_no(), false)
        .await
        .unwrap();
    engine.run_query(&query.id, None, &NoReport).await.unwrap();

    assert!(!engine.update_prompt(&query.id, &yes_no()).await.unwrap());
    assert_eq!(fx.store.responses_for_query(&query.id).await.unwrap().len(), 3);

    let changed = yes_no().with_concept("Empirical means based on collected data.");
    assert!(engine.update_prompt(&query.id, &changed).await.unwrap());
    assert!(fx.store.responses_for_query(&query.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_query_validates_template() {
    let fx = fixture().await;
    let engine = fx.engine(None);
    let broken = Prompt::new(
        "Which design?",
        PromptKind::Options {
            options: Vec::new(),
        },
    );
    let err = engine
        .create_query(&fx.project.id, "design", &broken, false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidPrompt(_)));
    assert!(fx.store.list_queries(&fx.project.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_test_query_does_not_persist_by_default() {
    let fx = fixture().await;
    let engine = fx.engine(Some(Arc::new(ScriptedGenerator::answering("Yes, clearly."))));
    let query = engine
        .create_query(&fx.project.id, "empirical", &yes_no(), false)
        .await
        .unwrap();
    let mut rng = StdRng::seed_from_u64(7);

    let run = engine.test_query(&query.id, false, &mut rng).await.unwrap();
    assert!(!run.persisted);
    assert_eq!(run.value, Some(litreview_core::prompt::PromptValue::Bool(true)));
    assert!(fx.store.responses_for_query(&query.id).await.unwrap().is_empty());

    let kept = engine.test_query(&query.id, true, &mut rng).await.unwrap();
    assert!(kept.persisted);
    assert_eq!(fx.store.responses_for_query(&query.id).await.unwrap().len(), 1);

    let runs = engine.test_project(&fx.project.id, &mut rng).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(fx.store.responses_for_query(&query.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_filter_keys_by_parsed_value() {
    let fx = fixture().await;
    let generator = ScriptedGenerator::new(|_, messages| {
        let user = &messages[1].content;
        Ok(if user.contains("Coral reefs") { "Yes." } else { "No." }.to_string())
    });
    let engine = fx.engine(Some(Arc::new(generator)));
    let query = engine
        .create_query(&fx.project.id, "reefs", &yes_no(), false)
        .await
        .unwrap();
    engine.run_query(&query.id, None, &NoReport).await.unwrap();

    assert_eq!(engine.filter_keys(&query.id, "yes").await.unwrap(), vec!["a1"]);
    assert_eq!(engine.filter_keys(&query.id, "no").await.unwrap(), vec!["a2", "a3"]);
}

// ─── Topics ─────────────────────────────────────────────────────────

const REEF_ANSWERS: &[&str] = &[
    "coral reef bleaching ocean",
    "reef bleaching coral ocean warming",
    "coral reef ocean bleaching",
    "ocean coral reef bleaching events",
];
const COURSE_ANSWERS: &[&str] = &[
    "programming course student feedback",
    "student feedback programming course",
    "course feedback student programming",
    "programming student course feedback loops",
];

#[tokio::test]
async fn test_topics_over_stored_responses() {
    let store = Arc::new(InMemoryRecordStore::new());
    let project = Project::new("topics");
    store.create_project(&project).await.unwrap();

    let answers: Vec<&str> = REEF_ANSWERS.iter().chain(COURSE_ANSWERS).copied().collect();
    let mut keys = Vec::new();
    for (i, answer) in answers.iter().enumerate() {
        let key = format!("item{i}");
        store
            .upsert_item(&BibliographyItem::new(&key).with_title(format!("T{i}")).with_text(*answer))
            .await
            .unwrap();
        keys.push(key);
    }
    store.add_items_to_project(&project.id, &keys).await.unwrap();

    let generator = Arc::new(ScriptedGenerator::new(|_, messages| {
        if messages[0].content.contains("find a label") {
            return Ok(r#"{"0": "Reef bleaching", "1": "Course feedback"}"#.to_string());
        }
        let user = &messages[1].content;
        let answer = user
            .rsplit("\n\n")
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        Ok(answer)
    }));
    let index = Arc::new(CountingIndex {
        inner: InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(64))),
        searches: AtomicUsize::new(0),
    });
    let engine = QueryEngine::new(
        store.clone(),
        index,
        Some(generator.clone()),
        EngineSettings::default(),
    );
    engine.update_index(false, &NoReport).await.unwrap();
    let query = engine
        .create_query(
            &project.id,
            "theme",
            &Prompt::new("What is the main theme?", PromptKind::open()),
            false,
        )
        .await
        .unwrap();
    engine.run_query(&query.id, None, &NoReport).await.unwrap();

    let aggregator = TopicAggregator::new(Arc::new(HashingEmbedder::new(64)), Some(generator));
    let settings = TopicSettings {
        min_cluster_size: 3,
        n_components: 64,
        ..TopicSettings::default()
    };
    let model = aggregator
        .fit_query(store.as_ref(), &query.id, &settings)
        .await
        .unwrap();

    assert_eq!(model.assignments.len(), 8);
    assert!(model.assignments.iter().all(|a| a.topic != NOISE));
    assert_eq!(model.topics.len(), 2);
    let reef = model
        .assignments
        .iter()
        .find(|a| a.unit.item_key == "item0")
        .unwrap()
        .topic;
    for a in &model.assignments {
        let is_reef = a.unit.item_key.as_str() < "item4";
        assert_eq!(a.topic == reef, is_reef, "{}", a.unit);
    }
    let labels: BTreeSet<&str> = model.topics.iter().map(|t| t.label.as_str()).collect();
    assert!(labels.contains("Reef bleaching"));
    assert!(labels.contains("Course feedback"));

    let rerun = aggregator
        .fit_query(store.as_ref(), &query.id, &settings)
        .await
        .unwrap();
    let first: Vec<i64> = model.assignments.iter().map(|a| a.topic).collect();
    let second: Vec<i64> = rerun.assignments.iter().map(|a| a.topic).collect();
    assert_eq!(first, second);
}

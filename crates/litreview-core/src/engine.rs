//! Retrieval-augmented query execution.
//!
//! [`QueryEngine`] ties the record store, the vector index, and an
//! optional generator together:
//!
//! - **Ingestion**: [`index_item`](QueryEngine::index_item) and
//!   [`update_index`](QueryEngine::update_index) chunk item text and add
//!   it to the index; already indexed items are skipped.
//! - **Execution**: [`run_query`](QueryEngine::run_query) answers a query
//!   for every project item that has no response yet, committing each
//!   response on its own. A failure aborts the batch but keeps everything
//!   committed before it.
//! - **Iteration**: [`test_query`](QueryEngine::test_query) answers for one
//!   random item without persisting unless asked to.
//!
//! Every operation that needs the generator checks for it before doing
//! any retrieval work and fails with [`Error::MissingCapability`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, strip_references};
use crate::context::{AssembledContext, ContextAssembler, ContextRequest, PassageOrder, Scope};
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::llm::{GenerationParams, Generator};
use crate::models::{BibliographyItem, Project, Query, Response, SearchHit};
use crate::prompt::{Prompt, PromptValue};
use crate::store::RecordStore;

/// Tunables for chunking, retrieval, and generation.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub strip_references: bool,
    /// Passages retrieved per prompt.
    pub k: usize,
    pub order: PassageOrder,
    pub include_metadata: bool,
    pub generation: GenerationParams,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            chunk_overlap: 256,
            strip_references: true,
            k: 10,
            order: PassageOrder::Position,
            include_metadata: true,
            generation: GenerationParams::default(),
        }
    }
}

/// What happened to one item of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOutcome {
    Answered,
    /// A response already existed.
    Skipped,
    Indexed,
    AlreadyIndexed,
    NoText,
}

/// Progress event emitted during batch operations.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        label: String,
        total: usize,
    },
    Item {
        label: String,
        n: usize,
        total: usize,
        item_key: String,
        outcome: ItemOutcome,
    },
    Finished {
        label: String,
        done: usize,
        skipped: usize,
    },
}

/// Receives batch progress. Implementations must not block for long.
pub trait BatchReporter: Send + Sync {
    fn report(&self, event: BatchEvent);
}

/// Reporter that drops every event.
pub struct NoReport;

impl BatchReporter for NoReport {
    fn report(&self, _event: BatchEvent) {}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub answered: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub indexed: usize,
    pub already_indexed: usize,
    pub without_text: usize,
    pub passages: usize,
}

/// Result of [`QueryEngine::index_item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { passages: usize },
    AlreadyIndexed,
    NoText,
}

/// An answer produced outside a batch.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub context: String,
    pub value: Option<PromptValue>,
}

/// Result of a single-item test run.
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub response: Response,
    pub value: Option<PromptValue>,
    pub persisted: bool,
}

/// A stored response with its parsed value.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedResponse {
    #[serde(flatten)]
    pub response: Response,
    pub value: Option<PromptValue>,
}

pub struct QueryEngine {
    store: Arc<dyn RecordStore>,
    index: Arc<dyn VectorIndex>,
    generator: Option<Arc<dyn Generator>>,
    settings: EngineSettings,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<dyn VectorIndex>,
        generator: Option<Arc<dyn Generator>>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            index,
            generator,
            settings,
        }
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn generator(&self) -> Option<&Arc<dyn Generator>> {
        self.generator.as_ref()
    }

    fn require_generator(&self) -> Result<&dyn Generator> {
        self.generator.as_deref().ok_or_else(|| {
            Error::MissingCapability("no language model configured for generation".into())
        })
    }

    // ---- projects and queries ----

    pub async fn create_project(&self, name: &str, exists_ok: bool) -> Result<Project> {
        if let Some(existing) = self.store.get_project(name).await? {
            if exists_ok {
                return Ok(existing);
            }
            return Err(Error::InvalidScope(format!("project already exists: {name}")));
        }
        let project = Project::new(name);
        self.store.create_project(&project).await?;
        info!(project = %name, "Created project");
        Ok(project)
    }

    /// Resolve a project by name.
    pub async fn project(&self, name: &str) -> Result<Project> {
        self.store
            .get_project(name)
            .await?
            .ok_or_else(|| Error::InvalidScope(format!("project not found: {name}")))
    }

    /// Add every item of a collection to a project. Returns the number of keys added.
    pub async fn add_collection_to_project(
        &self,
        project_id: &str,
        collection: &str,
    ) -> Result<usize> {
        let keys = self.store.collection_item_keys(collection).await?;
        if keys.is_empty() {
            return Err(Error::InvalidScope(format!(
                "collection is empty or unknown: {collection}"
            )));
        }
        self.store.add_items_to_project(project_id, &keys).await?;
        Ok(keys.len())
    }

    /// Create a query, or return the existing one when `exists_ok` is set.
    ///
    /// An existing query keeps its prompt; a differing prompt is logged.
    pub async fn create_query(
        &self,
        project_id: &str,
        name: &str,
        prompt: &Prompt,
        exists_ok: bool,
    ) -> Result<Query> {
        prompt.render_system_instruction()?;
        let spec = prompt.to_spec()?;

        if let Some(existing) = self.store.get_query(project_id, name).await? {
            if !exists_ok {
                return Err(Error::InvalidScope(format!("query already exists: {name}")));
            }
            if existing.prompt != spec {
                warn!(
                    query = %name,
                    "Existing query has a different prompt; keeping the stored prompt (use update to replace it)"
                );
            }
            return Ok(existing);
        }

        if self.store.get_project_by_id(project_id).await?.is_none() {
            return Err(Error::InvalidScope(format!("project not found: {project_id}")));
        }
        let query = Query::new(project_id, name, spec);
        self.store.create_query(&query).await?;
        info!(query = %name, prompt_type = prompt.type_tag(), "Created query");
        Ok(query)
    }

    /// Resolve a query by project and name.
    pub async fn query(&self, project_id: &str, name: &str) -> Result<Query> {
        self.store
            .get_query(project_id, name)
            .await?
            .ok_or_else(|| Error::InvalidScope(format!("query not found: {name}")))
    }

    async fn query_by_id(&self, query_id: &str) -> Result<Query> {
        self.store
            .get_query_by_id(query_id)
            .await?
            .ok_or_else(|| Error::InvalidScope(format!("query not found: {query_id}")))
    }

    /// Replace a query's prompt, clearing its responses.
    ///
    /// Returns false (and keeps responses) when the prompt is unchanged.
    pub async fn update_prompt(&self, query_id: &str, prompt: &Prompt) -> Result<bool> {
        prompt.render_system_instruction()?;
        let spec = prompt.to_spec()?;
        let query = self.query_by_id(query_id).await?;
        if query.prompt == spec {
            return Ok(false);
        }
        self.store.update_query_prompt(query_id, &spec).await?;
        info!(query = %query.name, "Updated prompt and cleared responses");
        Ok(true)
    }

    pub async fn clear_responses(&self, query_id: &str) -> Result<usize> {
        self.query_by_id(query_id).await?;
        self.store.clear_responses(query_id).await
    }

    // ---- indexing ----

    /// Chunk and index one item.
    pub async fn index_item(&self, item: &BibliographyItem) -> Result<IndexOutcome> {
        let Some(text) = item.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(IndexOutcome::NoText);
        };
        let text = if self.settings.strip_references {
            strip_references(text)
        } else {
            text
        };
        let passages = chunk_text(text, self.settings.chunk_size, self.settings.chunk_overlap);
        if passages.is_empty() {
            return Ok(IndexOutcome::NoText);
        }

        let start = Instant::now();
        match self.index.add(&item.key, &passages).await {
            Ok(()) => {
                debug!(
                    item_key = %item.key,
                    chunk_count = passages.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Indexed item"
                );
                Ok(IndexOutcome::Indexed {
                    passages: passages.len(),
                })
            }
            Err(e) if e.is_already_indexed() => Ok(IndexOutcome::AlreadyIndexed),
            Err(e) => Err(e),
        }
    }

    /// Index every stored item that is not indexed yet.
    ///
    /// With `redo`, the index is cleared and rebuilt first.
    pub async fn update_index(&self, redo: bool, reporter: &dyn BatchReporter) -> Result<IndexSummary> {
        if redo {
            self.index.clear().await?;
            info!("Cleared vector index for rebuild");
        }
        let indexed: BTreeSet<String> = self.index.keys().await?;
        let items = self.store.list_items().await?;
        let label = "index".to_string();
        let total = items.len();
        reporter.report(BatchEvent::Started {
            label: label.clone(),
            total,
        });

        let mut summary = IndexSummary::default();
        for (i, item) in items.iter().enumerate() {
            let outcome = if indexed.contains(&item.key) {
                IndexOutcome::AlreadyIndexed
            } else {
                self.index_item(item).await?
            };
            let item_outcome = match outcome {
                IndexOutcome::Indexed { passages } => {
                    summary.indexed += 1;
                    summary.passages += passages;
                    ItemOutcome::Indexed
                }
                IndexOutcome::AlreadyIndexed => {
                    summary.already_indexed += 1;
                    ItemOutcome::AlreadyIndexed
                }
                IndexOutcome::NoText => {
                    summary.without_text += 1;
                    ItemOutcome::NoText
                }
            };
            reporter.report(BatchEvent::Item {
                label: label.clone(),
                n: i + 1,
                total,
                item_key: item.key.clone(),
                outcome: item_outcome,
            });
        }

        reporter.report(BatchEvent::Finished {
            label,
            done: summary.indexed,
            skipped: summary.already_indexed + summary.without_text,
        });
        info!(
            indexed = summary.indexed,
            already_indexed = summary.already_indexed,
            without_text = summary.without_text,
            "Index update complete"
        );
        Ok(summary)
    }

    // ---- retrieval ----

    /// Raw similarity search.
    pub async fn search(&self, phrase: &str, scope: &Scope, k: usize) -> Result<Vec<SearchHit>> {
        self.index.search(phrase, k, scope.filter().as_ref()).await
    }

    async fn assemble(
        &self,
        prompt: &Prompt,
        scope: &Scope,
        preamble: &[(String, String)],
    ) -> Result<AssembledContext> {
        let assembler = ContextAssembler::new(self.index.as_ref(), self.store.as_ref());
        assembler
            .assemble(&ContextRequest {
                search_phrase: prompt.search_phrase(),
                scope,
                k: self.settings.k,
                order: self.settings.order,
                include_metadata: self.settings.include_metadata,
                preamble,
            })
            .await
    }

    /// Answer a prompt over an arbitrary scope without storing anything.
    pub async fn rag(
        &self,
        prompt: &Prompt,
        scope: &Scope,
        preamble: &[(String, String)],
    ) -> Result<RagAnswer> {
        let generator = self.require_generator()?;
        prompt.render_system_instruction()?;

        let context = self.assemble(prompt, scope, preamble).await?;
        let messages = prompt.build_messages(&context.text)?;
        let answer = generator
            .generate(&messages, &self.settings.generation)
            .await
            .map_err(|e| with_item_key(e, None))?;
        Ok(RagAnswer {
            value: prompt.parse_value(&answer),
            answer,
            context: context.text,
        })
    }

    /// Produce (but do not store) the response of `query` for one item.
    async fn answer_item(
        &self,
        generator: &dyn Generator,
        prompt: &Prompt,
        query: &Query,
        item_key: &str,
    ) -> Result<Response> {
        let item = self
            .store
            .get_item(item_key)
            .await?
            .ok_or_else(|| Error::InvalidScope(format!("item not found: {item_key}")))?;
        let preamble: Vec<(String, String)> = item
            .title
            .iter()
            .map(|t| ("title".to_string(), t.clone()))
            .collect();

        let context = self
            .assemble(prompt, &Scope::Item(item_key.to_string()), &preamble)
            .await?;
        let messages = prompt.build_messages(&context.text)?;

        let start = Instant::now();
        let answer = generator
            .generate(&messages, &self.settings.generation)
            .await
            .map_err(|e| with_item_key(e, Some(item_key)))?;
        debug!(
            query = %query.name,
            item_key = %item_key,
            passages = context.hits.len(),
            response_len = answer.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generated response"
        );
        Ok(Response::new(&query.id, item_key, answer, context.text))
    }

    async fn target_keys(&self, query: &Query, include: Option<&[String]>) -> Result<Vec<String>> {
        let keys = self.store.project_item_keys(&query.project_id).await?;
        let Some(include) = include else {
            return Ok(keys);
        };
        let members: BTreeSet<&String> = keys.iter().collect();
        if let Some(missing) = include.iter().find(|k| !members.contains(k)) {
            return Err(Error::InvalidScope(format!(
                "item {missing} is not part of the project"
            )));
        }
        let wanted: BTreeSet<&String> = include.iter().collect();
        Ok(keys.iter().filter(|k| wanted.contains(k)).cloned().collect())
    }

    /// Answer a query for every unanswered item of its project.
    ///
    /// `include` restricts the run to a subset of the project's items.
    /// Each response is committed as soon as it is produced; an error
    /// aborts the remaining items and is returned to the caller.
    pub async fn run_query(
        &self,
        query_id: &str,
        include: Option<&[String]>,
        reporter: &dyn BatchReporter,
    ) -> Result<RunSummary> {
        let generator = self.require_generator()?;
        let query = self.query_by_id(query_id).await?;
        let prompt = Prompt::from_spec(&query.prompt)?;
        prompt.render_system_instruction()?;

        let keys = self.target_keys(&query, include).await?;
        let total = keys.len();
        let label = format!("query {}", query.name);
        reporter.report(BatchEvent::Started {
            label: label.clone(),
            total,
        });

        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        for (i, key) in keys.iter().enumerate() {
            let outcome = if self.store.get_response(&query.id, key).await?.is_some() {
                ItemOutcome::Skipped
            } else {
                let response = self.answer_item(generator, &prompt, &query, key).await?;
                if self.store.insert_response(&response).await? {
                    ItemOutcome::Answered
                } else {
                    ItemOutcome::Skipped
                }
            };
            match outcome {
                ItemOutcome::Answered => summary.answered += 1,
                _ => summary.skipped += 1,
            }
            reporter.report(BatchEvent::Item {
                label: label.clone(),
                n: i + 1,
                total,
                item_key: key.clone(),
                outcome,
            });
        }

        reporter.report(BatchEvent::Finished {
            label,
            done: summary.answered,
            skipped: summary.skipped,
        });
        info!(
            query = %query.name,
            total = summary.total,
            answered = summary.answered,
            skipped = summary.skipped,
            "Query run complete"
        );
        Ok(summary)
    }

    /// Run every query of a project, one query after another.
    pub async fn run_project(
        &self,
        project_id: &str,
        include: Option<&[String]>,
        reporter: &dyn BatchReporter,
    ) -> Result<Vec<(String, RunSummary)>> {
        self.require_generator()?;
        let queries = self.store.list_queries(project_id).await?;
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            let summary = self.run_query(&query.id, include, reporter).await?;
            results.push((query.name, summary));
        }
        Ok(results)
    }

    /// Answer a query for one randomly chosen project item.
    ///
    /// The response is stored only when `persist` is set and the item has
    /// no response yet.
    pub async fn test_query<R: Rng + ?Sized>(
        &self,
        query_id: &str,
        persist: bool,
        rng: &mut R,
    ) -> Result<TestRun> {
        let generator = self.require_generator()?;
        let query = self.query_by_id(query_id).await?;
        let prompt = Prompt::from_spec(&query.prompt)?;
        prompt.render_system_instruction()?;

        let keys = self.store.project_item_keys(&query.project_id).await?;
        let key = keys
            .choose(rng)
            .cloned()
            .ok_or_else(|| Error::InvalidScope("project has no items to sample from".into()))?;

        self.test_item(generator, &query, &prompt, &key, persist).await
    }

    async fn test_item(
        &self,
        generator: &dyn Generator,
        query: &Query,
        prompt: &Prompt,
        item_key: &str,
        persist: bool,
    ) -> Result<TestRun> {
        let response = self.answer_item(generator, prompt, query, item_key).await?;
        let persisted = persist && self.store.insert_response(&response).await?;
        Ok(TestRun {
            value: prompt.parse_value(&response.text),
            response,
            persisted,
        })
    }

    /// Answer every query of a project for one randomly chosen item, without storing.
    pub async fn test_project<R: Rng + ?Sized>(
        &self,
        project_id: &str,
        rng: &mut R,
    ) -> Result<Vec<(Query, TestRun)>> {
        let generator = self.require_generator()?;
        let keys = self.store.project_item_keys(project_id).await?;
        let key = keys
            .choose(rng)
            .cloned()
            .ok_or_else(|| Error::InvalidScope("project has no items to sample from".into()))?;

        let mut runs = Vec::new();
        for query in self.store.list_queries(project_id).await? {
            let prompt = Prompt::from_spec(&query.prompt)?;
            let run = self.test_item(generator, &query, &prompt, &key, false).await?;
            runs.push((query, run));
        }
        Ok(runs)
    }

    // ---- responses ----

    /// Stored responses of a query with their parsed values.
    pub async fn responses(&self, query_id: &str) -> Result<Vec<ParsedResponse>> {
        let query = self.query_by_id(query_id).await?;
        let prompt = Prompt::from_spec(&query.prompt)?;
        Ok(self
            .store
            .responses_for_query(query_id)
            .await?
            .into_iter()
            .map(|response| ParsedResponse {
                value: prompt.parse_value(&response.text),
                response,
            })
            .collect())
    }

    /// Keys of items whose parsed answer equals `expected`.
    pub async fn filter_keys(&self, query_id: &str, expected: &str) -> Result<Vec<String>> {
        Ok(self
            .responses(query_id)
            .await?
            .into_iter()
            .filter(|r| r.value.as_ref().is_some_and(|v| v.matches_filter(expected)))
            .map(|r| r.response.item_key)
            .collect())
    }
}

/// Attach the item key to a generation failure; other errors become one.
fn with_item_key(e: Error, item_key: Option<&str>) -> Error {
    match e {
        Error::Generation { message, .. } => Error::Generation {
            item_key: item_key.map(str::to_string),
            message,
        },
        other => Error::generation(item_key, other),
    }
}

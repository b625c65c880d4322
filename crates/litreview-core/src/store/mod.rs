//! Record store abstraction.
//!
//! The [`RecordStore`] trait covers the keyed records the pipeline needs:
//! bibliographic items, collections, projects, queries, and responses,
//! with their many-to-many relations expressed as explicit membership
//! operations rather than object graphs.
//!
//! # Invariants implementations must hold
//!
//! - At most one [`Response`] per `(query_id, item_key)`;
//!   [`insert_response`](RecordStore::insert_response) never overwrites.
//! - [`update_query_prompt`](RecordStore::update_query_prompt) clears the
//!   query's responses in the same unit of work.
//! - [`delete_project`](RecordStore::delete_project) removes the project's
//!   queries and responses, never its items.
//! - Query names are unique within a project.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{BibliographyItem, Project, PromptSpec, Query, Response};

#[async_trait]
pub trait RecordStore: Send + Sync {
    // ---- items ----

    /// Insert an item or update its metadata by key.
    ///
    /// Once an item has non-empty text, the text is kept: later upserts
    /// only change metadata, so passages and responses stay consistent.
    async fn upsert_item(&self, item: &BibliographyItem) -> Result<()>;

    async fn get_item(&self, key: &str) -> Result<Option<BibliographyItem>>;

    /// All items ordered by key.
    async fn list_items(&self) -> Result<Vec<BibliographyItem>>;

    // ---- collections ----

    async fn add_items_to_collection(&self, collection: &str, keys: &[String]) -> Result<()>;

    /// Item keys in a collection, ordered by key. Unknown collections are empty.
    async fn collection_item_keys(&self, collection: &str) -> Result<Vec<String>>;

    async fn list_collections(&self) -> Result<Vec<String>>;

    // ---- projects ----

    /// Fails with [`Error::InvalidScope`](crate::error::Error::InvalidScope)
    /// if the name is taken.
    async fn create_project(&self, project: &Project) -> Result<()>;

    async fn get_project(&self, name: &str) -> Result<Option<Project>>;

    async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    /// Remove a project with its queries and responses. Returns false if absent.
    async fn delete_project(&self, project_id: &str) -> Result<bool>;

    /// Add existing items to a project. Unknown keys fail with `InvalidScope`.
    async fn add_items_to_project(&self, project_id: &str, keys: &[String]) -> Result<()>;

    async fn remove_items_from_project(&self, project_id: &str, keys: &[String]) -> Result<()>;

    /// Item keys of a project, ordered by key.
    async fn project_item_keys(&self, project_id: &str) -> Result<Vec<String>>;

    // ---- queries ----

    /// Fails with `InvalidScope` if the project already has a query with this name.
    async fn create_query(&self, query: &Query) -> Result<()>;

    async fn get_query(&self, project_id: &str, name: &str) -> Result<Option<Query>>;

    async fn get_query_by_id(&self, id: &str) -> Result<Option<Query>>;

    async fn list_queries(&self, project_id: &str) -> Result<Vec<Query>>;

    /// Replace a query's prompt and drop all of its responses atomically.
    async fn update_query_prompt(&self, query_id: &str, prompt: &PromptSpec) -> Result<()>;

    /// Remove a query with its responses. Returns false if absent.
    async fn delete_query(&self, query_id: &str) -> Result<bool>;

    // ---- responses ----

    /// Store a response unless one exists for the pair. Returns whether it was inserted.
    async fn insert_response(&self, response: &Response) -> Result<bool>;

    async fn get_response(&self, query_id: &str, item_key: &str) -> Result<Option<Response>>;

    /// Responses of a query ordered by item key.
    async fn responses_for_query(&self, query_id: &str) -> Result<Vec<Response>>;

    /// Drop all responses of a query. Returns how many were removed.
    async fn clear_responses(&self, query_id: &str) -> Result<usize>;
}

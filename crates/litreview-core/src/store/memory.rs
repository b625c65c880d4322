//! In-memory [`RecordStore`] for tests and embedding in other tools.
//!
//! All state sits behind one `std::sync::RwLock`, so every trait method
//! is a single atomic unit of work.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{BibliographyItem, Project, PromptSpec, Query, Response};

use super::RecordStore;

#[derive(Default)]
struct State {
    items: BTreeMap<String, BibliographyItem>,
    collections: BTreeMap<String, BTreeSet<String>>,
    projects: BTreeMap<String, Project>,
    project_items: BTreeMap<String, BTreeSet<String>>,
    queries: BTreeMap<String, Query>,
    /// (query_id, item_key) -> response
    responses: BTreeMap<(String, String), Response>,
}

impl State {
    fn drop_responses(&mut self, query_id: &str) -> usize {
        let before = self.responses.len();
        self.responses.retain(|(q, _), _| q != query_id);
        before - self.responses.len()
    }
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    state: RwLock<State>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| Error::Storage("record store lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| Error::Storage("record store lock poisoned".into()))
    }
}

fn unknown_project(id: &str) -> Error {
    Error::InvalidScope(format!("project not found: {id}"))
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert_item(&self, item: &BibliographyItem) -> Result<()> {
        let mut state = self.write()?;
        let mut item = item.clone();
        if let Some(existing) = state.items.get(&item.key) {
            if existing.has_text() {
                item.text = existing.text.clone();
            }
        }
        state.items.insert(item.key.clone(), item);
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<BibliographyItem>> {
        Ok(self.read()?.items.get(key).cloned())
    }

    async fn list_items(&self) -> Result<Vec<BibliographyItem>> {
        Ok(self.read()?.items.values().cloned().collect())
    }

    async fn add_items_to_collection(&self, collection: &str, keys: &[String]) -> Result<()> {
        let mut state = self.write()?;
        if let Some(missing) = keys.iter().find(|k| !state.items.contains_key(*k)) {
            return Err(Error::InvalidScope(format!("item not found: {missing}")));
        }
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(keys.iter().cloned());
        Ok(())
    }

    async fn collection_item_keys(&self, collection: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .collections
            .get(collection)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.read()?.collections.keys().cloned().collect())
    }

    async fn create_project(&self, project: &Project) -> Result<()> {
        let mut state = self.write()?;
        if state.projects.values().any(|p| p.name == project.name) {
            return Err(Error::InvalidScope(format!(
                "project already exists: {}",
                project.name
            )));
        }
        state.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        Ok(self
            .read()?
            .projects
            .values()
            .find(|p| p.name == name)
            .cloned())
    }

    async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.read()?.projects.get(id).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = self.read()?.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        if state.projects.remove(project_id).is_none() {
            return Ok(false);
        }
        state.project_items.remove(project_id);
        let query_ids: Vec<String> = state
            .queries
            .values()
            .filter(|q| q.project_id == project_id)
            .map(|q| q.id.clone())
            .collect();
        for id in &query_ids {
            state.queries.remove(id);
            state.drop_responses(id);
        }
        Ok(true)
    }

    async fn add_items_to_project(&self, project_id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.write()?;
        if !state.projects.contains_key(project_id) {
            return Err(unknown_project(project_id));
        }
        if let Some(missing) = keys.iter().find(|k| !state.items.contains_key(*k)) {
            return Err(Error::InvalidScope(format!("item not found: {missing}")));
        }
        state
            .project_items
            .entry(project_id.to_string())
            .or_default()
            .extend(keys.iter().cloned());
        Ok(())
    }

    async fn remove_items_from_project(&self, project_id: &str, keys: &[String]) -> Result<()> {
        let mut state = self.write()?;
        if !state.projects.contains_key(project_id) {
            return Err(unknown_project(project_id));
        }
        if let Some(members) = state.project_items.get_mut(project_id) {
            for k in keys {
                members.remove(k);
            }
        }
        Ok(())
    }

    async fn project_item_keys(&self, project_id: &str) -> Result<Vec<String>> {
        let state = self.read()?;
        if !state.projects.contains_key(project_id) {
            return Err(unknown_project(project_id));
        }
        Ok(state
            .project_items
            .get(project_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_query(&self, query: &Query) -> Result<()> {
        let mut state = self.write()?;
        if !state.projects.contains_key(&query.project_id) {
            return Err(unknown_project(&query.project_id));
        }
        if state
            .queries
            .values()
            .any(|q| q.project_id == query.project_id && q.name == query.name)
        {
            return Err(Error::InvalidScope(format!(
                "query already exists: {}",
                query.name
            )));
        }
        state.queries.insert(query.id.clone(), query.clone());
        Ok(())
    }

    async fn get_query(&self, project_id: &str, name: &str) -> Result<Option<Query>> {
        Ok(self
            .read()?
            .queries
            .values()
            .find(|q| q.project_id == project_id && q.name == name)
            .cloned())
    }

    async fn get_query_by_id(&self, id: &str) -> Result<Option<Query>> {
        Ok(self.read()?.queries.get(id).cloned())
    }

    async fn list_queries(&self, project_id: &str) -> Result<Vec<Query>> {
        let mut queries: Vec<Query> = self
            .read()?
            .queries
            .values()
            .filter(|q| q.project_id == project_id)
            .cloned()
            .collect();
        queries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(queries)
    }

    async fn update_query_prompt(&self, query_id: &str, prompt: &PromptSpec) -> Result<()> {
        let mut state = self.write()?;
        let query = state
            .queries
            .get_mut(query_id)
            .ok_or_else(|| Error::InvalidScope(format!("query not found: {query_id}")))?;
        query.prompt = prompt.clone();
        state.drop_responses(query_id);
        Ok(())
    }

    async fn delete_query(&self, query_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        if state.queries.remove(query_id).is_none() {
            return Ok(false);
        }
        state.drop_responses(query_id);
        Ok(true)
    }

    async fn insert_response(&self, response: &Response) -> Result<bool> {
        let mut state = self.write()?;
        if !state.queries.contains_key(&response.query_id) {
            return Err(Error::InvalidScope(format!(
                "query not found: {}",
                response.query_id
            )));
        }
        let key = (response.query_id.clone(), response.item_key.clone());
        if state.responses.contains_key(&key) {
            return Ok(false);
        }
        state.responses.insert(key, response.clone());
        Ok(true)
    }

    async fn get_response(&self, query_id: &str, item_key: &str) -> Result<Option<Response>> {
        Ok(self
            .read()?
            .responses
            .get(&(query_id.to_string(), item_key.to_string()))
            .cloned())
    }

    async fn responses_for_query(&self, query_id: &str) -> Result<Vec<Response>> {
        Ok(self
            .read()?
            .responses
            .iter()
            .filter(|((q, _), _)| q == query_id)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn clear_responses(&self, query_id: &str) -> Result<usize> {
        Ok(self.write()?.drop_responses(query_id))
    }
}

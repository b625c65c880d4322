//! Export a project's answers as JSON.
//!
//! Produces one record per project item with its bibliographic metadata and,
//! per query, the raw answer and its parsed value. This is the table a
//! reviewer loads into a spreadsheet or notebook.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use litreview_core::engine::QueryEngine;
use litreview_core::prompt::PromptValue;

use crate::app::App;
use crate::config::Config;
use crate::get::format_ts_iso;

#[derive(Debug, Serialize)]
pub struct ExportData {
    pub project: String,
    pub exported_at: String,
    pub queries: Vec<ExportQuery>,
    pub items: Vec<ExportItem>,
}

#[derive(Debug, Serialize)]
pub struct ExportQuery {
    pub name: String,
    pub question: String,
    pub prompt_type: String,
}

#[derive(Debug, Serialize)]
pub struct ExportItem {
    pub key: String,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub authors: Vec<String>,
    pub doi: Option<String>,
    /// Keyed by query name. Items without a response for a query are absent.
    pub responses: BTreeMap<String, ExportAnswer>,
}

#[derive(Debug, Serialize)]
pub struct ExportAnswer {
    pub answer: String,
    pub value: Option<PromptValue>,
}

pub async fn export_project(engine: &QueryEngine, project: &str) -> Result<ExportData> {
    let project = engine.project(project).await?;
    let store = engine.store();
    let queries = store.list_queries(&project.id).await?;

    let mut answers: BTreeMap<String, BTreeMap<String, ExportAnswer>> = BTreeMap::new();
    for query in &queries {
        for parsed in engine.responses(&query.id).await? {
            answers
                .entry(parsed.response.item_key.clone())
                .or_default()
                .insert(
                    query.name.clone(),
                    ExportAnswer {
                        answer: parsed.response.text,
                        value: parsed.value,
                    },
                );
        }
    }

    let mut items = Vec::new();
    for key in store.project_item_keys(&project.id).await? {
        let Some(item) = store.get_item(&key).await? else {
            continue;
        };
        items.push(ExportItem {
            responses: answers.remove(&key).unwrap_or_default(),
            key: item.key,
            title: item.title,
            year: item.year,
            authors: item.authors,
            doi: item.doi,
        });
    }

    Ok(ExportData {
        project: project.name,
        exported_at: format_ts_iso(chrono::Utc::now().timestamp()),
        queries: queries
            .into_iter()
            .map(|q| ExportQuery {
                name: q.name,
                question: q.prompt.question,
                prompt_type: q.prompt.prompt_type,
            })
            .collect(),
        items,
    })
}

/// Export a project as JSON.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(config: &Config, project: &str, output: Option<&Path>) -> Result<()> {
    let app = App::open(config).await?;
    let data = export_project(app.engine(), project).await;
    app.close().await;
    let data = data?;

    let json = serde_json::to_string_pretty(&data)?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "Exported {} items, {} queries to {}",
                data.items.len(),
                data.queries.len(),
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use litreview_core::embedding::HashingEmbedder;
    use litreview_core::engine::EngineSettings;
    use litreview_core::index::memory::InMemoryVectorIndex;
    use litreview_core::models::{BibliographyItem, Response};
    use litreview_core::prompt::{Prompt, PromptKind};
    use litreview_core::store::memory::InMemoryRecordStore;

    #[tokio::test]
    async fn test_export_joins_items_and_answers() {
        let engine = QueryEngine::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(32)))),
            None,
            EngineSettings::default(),
        );
        let store = engine.store();
        store
            .upsert_item(&BibliographyItem::new("a").with_title("Paper A"))
            .await
            .unwrap();
        store.upsert_item(&BibliographyItem::new("b")).await.unwrap();

        let project = engine.create_project("review", false).await.unwrap();
        store
            .add_items_to_project(&project.id, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let query = engine
            .create_query(
                &project.id,
                "empirical",
                &Prompt::new("Is the study empirical?", PromptKind::YesNo),
                false,
            )
            .await
            .unwrap();
        store
            .insert_response(&Response::new(&query.id, "a", "Yes".into(), "ctx".into()))
            .await
            .unwrap();

        let data = export_project(&engine, "review").await.unwrap();
        assert_eq!(data.queries.len(), 1);
        assert_eq!(data.items.len(), 2);
        let a = &data.items[0];
        assert_eq!(a.title.as_deref(), Some("Paper A"));
        assert_eq!(a.responses["empirical"].answer, "Yes");
        assert_eq!(a.responses["empirical"].value, Some(PromptValue::Bool(true)));
        assert!(data.items[1].responses.is_empty());

        assert!(export_project(&engine, "missing").await.is_err());
    }
}

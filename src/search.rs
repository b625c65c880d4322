//! `litrev search`: raw similarity search over indexed passages.
//!
//! Useful for checking what context a prompt will retrieve before running
//! it over a whole project.

use anyhow::Result;
use serde::Serialize;

use litreview_core::context::Scope;
use litreview_core::engine::QueryEngine;

use crate::app::App;
use crate::config::Config;

const EXCERPT_CHARS: usize = 240;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub item_key: String,
    pub title: Option<String>,
    pub passage: usize,
    pub score: f32,
    pub text: String,
}

pub async fn search(
    engine: &QueryEngine,
    phrase: &str,
    project: Option<&str>,
    item: Option<&str>,
    k: usize,
) -> Result<Vec<SearchResult>> {
    if phrase.trim().is_empty() {
        return Ok(Vec::new());
    }
    let scope = match (project, item) {
        (_, Some(item)) => Scope::Item(item.to_string()),
        (Some(project), None) => {
            let project = engine.project(project).await?;
            Scope::Items(engine.store().project_item_keys(&project.id).await?)
        }
        (None, None) => Scope::All,
    };

    let hits = engine.search(phrase, &scope, k).await?;
    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        let title = engine
            .store()
            .get_item(&hit.item_key)
            .await?
            .and_then(|i| i.title);
        results.push(SearchResult {
            item_key: hit.item_key,
            title,
            passage: hit.sequence_index,
            score: hit.score,
            text: hit.text,
        });
    }
    Ok(results)
}

pub async fn run_search(
    config: &Config,
    phrase: &str,
    project: Option<&str>,
    item: Option<&str>,
    k: Option<usize>,
    json: bool,
) -> Result<()> {
    let app = App::open(config).await?;
    let k = k.unwrap_or(config.retrieval.k);
    let results = search(app.engine(), phrase, project, item, k).await;
    app.close().await;
    let results = results?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            result.item_key,
            result.title.as_deref().unwrap_or("(untitled)")
        );
        println!("    passage: {}", result.passage);
        println!("    excerpt: \"{}\"", excerpt(&result.text));
        println!();
    }
    Ok(())
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat.to_string();
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use litreview_core::embedding::HashingEmbedder;
    use litreview_core::engine::EngineSettings;
    use litreview_core::index::memory::InMemoryVectorIndex;
    use litreview_core::models::BibliographyItem;
    use litreview_core::store::memory::InMemoryRecordStore;

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("a\nb "), "a b");
        let long = "x".repeat(500);
        let e = excerpt(&long);
        assert!(e.ends_with("..."));
        assert_eq!(e.chars().count(), EXCERPT_CHARS + 3);
    }

    #[tokio::test]
    async fn test_search_scopes() {
        let engine = QueryEngine::new(
            Arc::new(InMemoryRecordStore::new()),
            Arc::new(InMemoryVectorIndex::new(Arc::new(HashingEmbedder::new(128)))),
            None,
            EngineSettings::default(),
        );
        let reef = BibliographyItem::new("reef")
            .with_title("Reefs")
            .with_text("Coral reefs bleach under heat stress.");
        let course = BibliographyItem::new("course")
            .with_text("Students in a programming course received feedback.");
        for item in [&reef, &course] {
            engine.store().upsert_item(item).await.unwrap();
            engine.index_item(item).await.unwrap();
        }
        let project = engine.create_project("teaching", false).await.unwrap();
        engine
            .store()
            .add_items_to_project(&project.id, &["course".to_string()])
            .await
            .unwrap();

        let all = search(&engine, "coral bleaching", None, None, 5).await.unwrap();
        assert_eq!(all[0].item_key, "reef");
        assert_eq!(all[0].title.as_deref(), Some("Reefs"));

        let scoped = search(&engine, "coral bleaching", Some("teaching"), None, 5)
            .await
            .unwrap();
        assert!(scoped.iter().all(|r| r.item_key == "course"));

        assert!(search(&engine, "  ", None, None, 5).await.unwrap().is_empty());
    }
}

//! `litrev project` subcommands.
//!
//! A project is a named set of items plus the queries asked about them.
//! Deleting a project drops its queries and responses; items stay.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use litreview_core::engine::RunSummary;

use crate::app::App;
use crate::config::Config;
use crate::get::format_ts_iso;
use crate::progress::ProgressMode;

pub(crate) fn rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

pub(crate) fn print_summary(label: &str, summary: &RunSummary) {
    println!("{}", label);
    println!("  items: {}", summary.total);
    println!("  answered: {}", summary.answered);
    println!("  skipped (already answered): {}", summary.skipped);
}

pub async fn run_create(config: &Config, name: &str, exists_ok: bool) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.engine().create_project(name, exists_ok).await;
    app.close().await;
    let project = project?;
    println!("project {} ({})", project.name, project.id);
    println!("ok");
    Ok(())
}

pub async fn run_delete(config: &Config, name: &str) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(name).await?;
    let deleted = app.engine().store().delete_project(&project.id).await?;
    app.close().await;
    if !deleted {
        bail!("project not found: {}", name);
    }
    println!("deleted project {} (items are kept)", name);
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let store = app.engine().store();
    let projects = store.list_projects().await?;
    if projects.is_empty() {
        println!("No projects.");
        app.close().await;
        return Ok(());
    }

    println!("{:<24} {:>6} {:>8}  CREATED", "PROJECT", "ITEMS", "QUERIES");
    for project in &projects {
        let items = store.project_item_keys(&project.id).await?.len();
        let queries = store.list_queries(&project.id).await?.len();
        println!(
            "{:<24} {:>6} {:>8}  {}",
            project.name,
            items,
            queries,
            format_ts_iso(project.created_at)
        );
    }
    app.close().await;
    Ok(())
}

pub async fn run_items(config: &Config, name: &str) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(name).await?;
    let store = app.engine().store();
    let keys = store.project_item_keys(&project.id).await?;
    for key in &keys {
        let title = store
            .get_item(key)
            .await?
            .and_then(|i| i.title)
            .unwrap_or_default();
        println!("{:<24} {}", key, title);
    }
    println!();
    println!("{} items in {}", keys.len(), project.name);
    app.close().await;
    Ok(())
}

pub async fn run_add_items(config: &Config, name: &str, keys: &[String]) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(name).await?;
    let result = app
        .engine()
        .store()
        .add_items_to_project(&project.id, keys)
        .await;
    app.close().await;
    result?;
    println!("added {} items to {}", keys.len(), name);
    Ok(())
}

pub async fn run_remove_items(config: &Config, name: &str, keys: &[String]) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(name).await?;
    let result = app
        .engine()
        .store()
        .remove_items_from_project(&project.id, keys)
        .await;
    app.close().await;
    result?;
    println!("removed {} items from {}", keys.len(), name);
    Ok(())
}

pub async fn run_add_collection(config: &Config, name: &str, collection: &str) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(name).await?;
    let added = app
        .engine()
        .add_collection_to_project(&project.id, collection)
        .await;
    app.close().await;
    println!("added {} items of collection {} to {}", added?, collection, name);
    Ok(())
}

/// Answer every query of the project for every (or every included) item.
pub async fn run_run(
    config: &Config,
    name: &str,
    include: &[String],
    progress: ProgressMode,
) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(name).await?;
    let reporter = progress.reporter();
    let include = (!include.is_empty()).then_some(include);

    let results = app
        .engine()
        .run_project(&project.id, include, reporter.as_ref())
        .await;
    app.close().await;

    let results = results?;
    if results.is_empty() {
        println!("project {} has no queries", name);
        return Ok(());
    }
    for (query, summary) in &results {
        print_summary(&format!("query {}", query), summary);
    }
    println!("ok");
    Ok(())
}

/// Answer every query for one random item without storing anything.
pub async fn run_test(config: &Config, name: &str, seed: Option<u64>) -> Result<()> {
    let app = App::open(config).await?;
    let project = app.project(name).await?;
    let mut rng = rng(seed);
    let runs = app.engine().test_project(&project.id, &mut rng).await;
    app.close().await;

    for (query, run) in runs? {
        println!("--- {} [{}] ---", query.name, run.response.item_key);
        println!("{}", run.response.text);
        match &run.value {
            Some(value) => println!("parsed: {}", serde_json::to_string(value)?),
            None => println!("parsed: (no valid value)"),
        }
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let a: u64 = rng(Some(7)).gen();
        let b: u64 = rng(Some(7)).gen();
        assert_eq!(a, b);
    }
}

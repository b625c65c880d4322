//! Item lookup and listing.
//!
//! `litrev get <key>` prints one bibliographic item with its index status
//! and the projects it belongs to; `litrev items` lists every stored item.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::Row;

use litreview_core::models::BibliographyItem;

use crate::app::App;
use crate::config::Config;

/// An item as shown by `litrev get`.
#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    #[serde(flatten)]
    pub item: BibliographyItem,
    pub updated_at: String, // ISO8601
    pub passages: usize,
    pub projects: Vec<String>,
}

pub async fn get_item(app: &App, key: &str) -> Result<ItemResponse> {
    let Some(item) = app.engine().store().get_item(key).await? else {
        bail!("item not found: {}", key);
    };

    let updated_at: i64 = sqlx::query_scalar("SELECT updated_at FROM items WHERE key = ?")
        .bind(key)
        .fetch_one(app.pool())
        .await?;
    let project_rows = sqlx::query(
        r#"
        SELECT p.name FROM projects p
        JOIN item_project ip ON ip.project_id = p.id
        WHERE ip.item_key = ?
        ORDER BY p.name
        "#,
    )
    .bind(key)
    .fetch_all(app.pool())
    .await?;
    let passages = app.engine().index().count(key).await?;

    Ok(ItemResponse {
        item,
        updated_at: format_ts_iso(updated_at),
        passages,
        projects: project_rows.iter().map(|r| r.get("name")).collect(),
    })
}

pub async fn run_get(config: &Config, key: &str) -> Result<()> {
    let app = App::open(config).await?;
    let resp = get_item(&app, key).await;
    app.close().await;
    let resp = resp?;
    let item = &resp.item;

    println!("--- Item ---");
    println!("key:          {}", item.key);
    println!(
        "title:        {}",
        item.title.as_deref().unwrap_or("(untitled)")
    );
    if !item.authors.is_empty() {
        println!("authors:      {}", item.authors.join("; "));
    }
    if let Some(year) = item.year {
        println!("year:         {}", year);
    }
    if let Some(ref doi) = item.doi {
        println!("doi:          {}", doi);
    }
    if let Some(ref isbn) = item.isbn {
        println!("isbn:         {}", isbn);
    }
    if !item.keywords.is_empty() {
        println!("keywords:     {}", item.keywords.join(", "));
    }
    println!("updated_at:   {}", resp.updated_at);
    println!(
        "projects:     {}",
        if resp.projects.is_empty() {
            "(none)".to_string()
        } else {
            resp.projects.join(", ")
        }
    );
    println!(
        "full text:    {}",
        match item.text.as_deref() {
            Some(t) if !t.trim().is_empty() => format!("{} chars", t.chars().count()),
            _ => "(none)".to_string(),
        }
    );
    println!("passages:     {}", resp.passages);

    if let Some(ref abstract_text) = item.abstract_text {
        println!();
        println!("--- Abstract ---");
        println!("{}", abstract_text);
    }

    Ok(())
}

pub async fn run_items(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let items = app.engine().store().list_items().await?;
    let indexed = app.engine().index().keys().await?;
    app.close().await;

    if items.is_empty() {
        println!("No items. Import some with `litrev import <file>`.");
        return Ok(());
    }

    println!("{:<24} {:>5} {:>8}  TITLE", "KEY", "YEAR", "INDEXED");
    for item in &items {
        println!(
            "{:<24} {:>5} {:>8}  {}",
            item.key,
            item.year.map(|y| y.to_string()).unwrap_or_default(),
            if indexed.contains(&item.key) { "yes" } else { "no" },
            item.title.as_deref().unwrap_or("")
        );
    }
    println!();
    println!("{} items", items.len());
    Ok(())
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
        assert_eq!(format_ts_iso(1_600_000_000), "2020-09-13T12:26:40Z");
    }

    #[tokio::test]
    async fn test_get_item_reports_projects_and_passages() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("get.sqlite");
        config.embedding.provider = "hashing".into();
        let app = App::open(&config).await.unwrap();

        let item = BibliographyItem::new("smith2020")
            .with_title("Reefs")
            .with_text("Coral reefs bleach under heat stress.");
        app.engine().store().upsert_item(&item).await.unwrap();
        let project = app.engine().create_project("review", false).await.unwrap();
        app.engine()
            .store()
            .add_items_to_project(&project.id, &["smith2020".to_string()])
            .await
            .unwrap();
        app.engine().index_item(&item).await.unwrap();

        let resp = get_item(&app, "smith2020").await.unwrap();
        assert_eq!(resp.projects, vec!["review".to_string()]);
        assert!(resp.passages >= 1);
        assert!(resp.updated_at.ends_with('Z'));

        assert!(get_item(&app, "nobody").await.is_err());
        app.close().await;
    }
}

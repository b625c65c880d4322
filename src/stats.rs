//! Database statistics.
//!
//! `litrev stats` summarizes what is stored: item and passage counts,
//! index coverage, the embedding models in the index, and a per-project
//! breakdown of queries and responses.

use anyhow::Result;
use sqlx::Row;

use crate::app::App;
use crate::config::Config;

struct ProjectStats {
    name: String,
    item_count: i64,
    query_count: i64,
    response_count: i64,
}

pub async fn run_stats(config: &Config) -> Result<()> {
    let app = App::open(config).await?;
    let pool = app.pool();

    let total_items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(pool)
        .await?;
    let with_text: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE text IS NOT NULL AND TRIM(text) <> ''")
            .fetch_one(pool)
            .await?;
    let indexed_items: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT item_key) FROM passages")
        .fetch_one(pool)
        .await?;
    let total_passages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages")
        .fetch_one(pool)
        .await?;
    let collections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
        .fetch_one(pool)
        .await?;

    let model_rows = sqlx::query(
        "SELECT model, COUNT(*) AS n FROM passages GROUP BY model ORDER BY n DESC",
    )
    .fetch_all(pool)
    .await?;

    let project_rows = sqlx::query(
        r#"
        SELECT
            p.name,
            (SELECT COUNT(*) FROM item_project ip WHERE ip.project_id = p.id) AS item_count,
            (SELECT COUNT(*) FROM queries q WHERE q.project_id = p.id) AS query_count,
            (SELECT COUNT(*) FROM responses r JOIN queries q ON q.id = r.query_id
               WHERE q.project_id = p.id) AS response_count
        FROM projects p
        ORDER BY p.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let projects: Vec<ProjectStats> = project_rows
        .iter()
        .map(|row| ProjectStats {
            name: row.get("name"),
            item_count: row.get("item_count"),
            query_count: row.get("query_count"),
            response_count: row.get("response_count"),
        })
        .collect();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("litrev — Database Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Items:       {} ({} with full text)", total_items, with_text);
    println!("  Collections: {}", collections);
    println!(
        "  Indexed:     {} / {} ({}%)",
        indexed_items,
        with_text,
        percent(indexed_items, with_text)
    );
    println!("  Passages:    {}", total_passages);
    println!(
        "  Embedder:    {} ({} dims)",
        app.embedder().model_name(),
        app.embedder().dims()
    );
    if let Some(generator) = app.generator() {
        println!("  Generator:   {}", generator.model_name());
    }

    if model_rows.len() > 1 {
        println!();
        println!("  Index holds passages from several models; run `litrev index --redo`:");
        for row in &model_rows {
            let model: String = row.get("model");
            let n: i64 = row.get("n");
            println!("    {:<32} {:>8}", model, n);
        }
    }

    if !projects.is_empty() {
        println!();
        println!("  By project:");
        println!(
            "  {:<24} {:>6} {:>8} {:>10}",
            "PROJECT", "ITEMS", "QUERIES", "RESPONSES"
        );
        println!("  {}", "-".repeat(52));
        for p in &projects {
            println!(
                "  {:<24} {:>6} {:>8} {:>10}",
                p.name, p.item_count, p.query_count, p.response_count
            );
        }
    }

    println!();

    app.close().await;
    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

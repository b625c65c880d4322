//! Idempotent schema creation.
//!
//! Every statement uses `IF NOT EXISTS`, so `litrev init` can run any
//! number of times against the same database.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        key TEXT PRIMARY KEY,
        title TEXT,
        year INTEGER,
        authors_json TEXT NOT NULL DEFAULT '[]',
        doi TEXT,
        isbn TEXT,
        abstract TEXT,
        keywords_json TEXT NOT NULL DEFAULT '[]',
        text TEXT,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS collections (
        name TEXT PRIMARY KEY
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS item_collection (
        collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
        item_key TEXT NOT NULL REFERENCES items(key) ON DELETE CASCADE,
        PRIMARY KEY (collection, item_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS item_project (
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        item_key TEXT NOT NULL REFERENCES items(key) ON DELETE CASCADE,
        PRIMARY KEY (project_id, item_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS queries (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        question TEXT NOT NULL,
        prompt_type TEXT NOT NULL,
        params_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        UNIQUE(project_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS responses (
        query_id TEXT NOT NULL REFERENCES queries(id) ON DELETE CASCADE,
        item_key TEXT NOT NULL,
        text TEXT NOT NULL,
        context TEXT NOT NULL DEFAULT '',
        created_at INTEGER NOT NULL,
        PRIMARY KEY (query_id, item_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS passages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        item_key TEXT NOT NULL,
        seq INTEGER NOT NULL,
        start_char INTEGER NOT NULL,
        end_char INTEGER NOT NULL,
        text TEXT NOT NULL,
        model TEXT NOT NULL,
        embedding BLOB NOT NULL,
        UNIQUE(item_key, seq)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_passages_item_key ON passages(item_key)",
    "CREATE INDEX IF NOT EXISTS idx_item_project_item ON item_project(item_key)",
    "CREATE INDEX IF NOT EXISTS idx_queries_project ON queries(project_id)",
];

/// Connect to the configured database and create the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

//! SQLite-backed [`RecordStore`].
//!
//! Maps each trait operation onto the schema created by
//! [`migrate`](crate::migrate). Multi-statement operations (cascading
//! deletes, prompt updates) run in one transaction so that a failure
//! never leaves a query without its responses cleared or a project half
//! deleted.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use litreview_core::error::{Error, Result};
use litreview_core::models::{BibliographyItem, Project, PromptSpec, Query, Response};
use litreview_core::store::RecordStore;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> Error {
    Error::storage(e)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

fn item_from_row(row: &SqliteRow) -> Result<BibliographyItem> {
    let authors_json: String = row.get("authors_json");
    let keywords_json: String = row.get("keywords_json");
    Ok(BibliographyItem {
        key: row.get("key"),
        title: row.get("title"),
        year: row.get::<Option<i64>, _>("year").map(|y| y as i32),
        authors: serde_json::from_str(&authors_json)?,
        doi: row.get("doi"),
        isbn: row.get("isbn"),
        abstract_text: row.get("abstract"),
        keywords: serde_json::from_str(&keywords_json)?,
        text: row.get("text"),
    })
}

fn project_from_row(row: &SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

fn query_from_row(row: &SqliteRow) -> Query {
    Query {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        prompt: PromptSpec {
            question: row.get("question"),
            prompt_type: row.get("prompt_type"),
            params_json: row.get("params_json"),
        },
        created_at: row.get("created_at"),
    }
}

fn response_from_row(row: &SqliteRow) -> Response {
    Response {
        query_id: row.get("query_id"),
        item_key: row.get("item_key"),
        text: row.get("text"),
        context: row.get("context"),
        created_at: row.get("created_at"),
    }
}

const ITEM_COLUMNS: &str =
    "key, title, year, authors_json, doi, isbn, abstract, keywords_json, text";
const QUERY_COLUMNS: &str =
    "id, project_id, name, question, prompt_type, params_json, created_at";

impl SqliteRecordStore {
    async fn project_exists(&self, project_id: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM projects WHERE id = ?")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(found.is_some())
    }

    async fn first_missing_item(&self, keys: &[String]) -> Result<Option<String>> {
        for key in keys {
            let found: Option<String> = sqlx::query_scalar("SELECT key FROM items WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            if found.is_none() {
                return Ok(Some(key.clone()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert_item(&self, item: &BibliographyItem) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO items (key, title, year, authors_json, doi, isbn, abstract,
                               keywords_json, text, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                title = excluded.title,
                year = excluded.year,
                authors_json = excluded.authors_json,
                doi = excluded.doi,
                isbn = excluded.isbn,
                abstract = excluded.abstract,
                keywords_json = excluded.keywords_json,
                text = CASE
                    WHEN items.text IS NOT NULL AND TRIM(items.text) <> '' THEN items.text
                    ELSE excluded.text
                END,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.key)
        .bind(&item.title)
        .bind(item.year.map(i64::from))
        .bind(serde_json::to_string(&item.authors)?)
        .bind(&item.doi)
        .bind(&item.isbn)
        .bind(&item.abstract_text)
        .bind(serde_json::to_string(&item.keywords)?)
        .bind(&item.text)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_item(&self, key: &str) -> Result<Option<BibliographyItem>> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE key = ?"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn list_items(&self) -> Result<Vec<BibliographyItem>> {
        let rows = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY key"))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(item_from_row).collect()
    }

    async fn add_items_to_collection(&self, collection: &str, keys: &[String]) -> Result<()> {
        if let Some(missing) = self.first_missing_item(keys).await? {
            return Err(Error::InvalidScope(format!("item not found: {missing}")));
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("INSERT INTO collections (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(collection)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        for key in keys {
            sqlx::query(
                "INSERT INTO item_collection (collection, item_key) VALUES (?, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(collection)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn collection_item_keys(&self, collection: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT item_key FROM item_collection WHERE collection = ? ORDER BY item_key",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn create_project(&self, project: &Project) -> Result<()> {
        let result = sqlx::query("INSERT INTO projects (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&project.id)
            .bind(&project.name)
            .bind(project.created_at)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::InvalidScope(format!(
                "project already exists: {}",
                project.name
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, created_at FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(project_from_row))
    }

    async fn get_project_by_id(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, created_at FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(project_from_row))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "DELETE FROM responses WHERE query_id IN (SELECT id FROM queries WHERE project_id = ?)",
        )
        .bind(project_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        sqlx::query("DELETE FROM queries WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("DELETE FROM item_project WHERE project_id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let deleted = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        tx.commit().await.map_err(db_err)?;
        Ok(deleted > 0)
    }

    async fn add_items_to_project(&self, project_id: &str, keys: &[String]) -> Result<()> {
        if !self.project_exists(project_id).await? {
            return Err(Error::InvalidScope(format!("project not found: {project_id}")));
        }
        if let Some(missing) = self.first_missing_item(keys).await? {
            return Err(Error::InvalidScope(format!("item not found: {missing}")));
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for key in keys {
            sqlx::query(
                "INSERT INTO item_project (project_id, item_key) VALUES (?, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(project_id)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn remove_items_from_project(&self, project_id: &str, keys: &[String]) -> Result<()> {
        if !self.project_exists(project_id).await? {
            return Err(Error::InvalidScope(format!("project not found: {project_id}")));
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for key in keys {
            sqlx::query("DELETE FROM item_project WHERE project_id = ? AND item_key = ?")
                .bind(project_id)
                .bind(key)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn project_item_keys(&self, project_id: &str) -> Result<Vec<String>> {
        if !self.project_exists(project_id).await? {
            return Err(Error::InvalidScope(format!("project not found: {project_id}")));
        }
        sqlx::query_scalar(
            "SELECT item_key FROM item_project WHERE project_id = ? ORDER BY item_key",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn create_query(&self, query: &Query) -> Result<()> {
        if !self.project_exists(&query.project_id).await? {
            return Err(Error::InvalidScope(format!(
                "project not found: {}",
                query.project_id
            )));
        }
        let result = sqlx::query(
            "INSERT INTO queries (id, project_id, name, question, prompt_type, params_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&query.id)
        .bind(&query.project_id)
        .bind(&query.name)
        .bind(&query.prompt.question)
        .bind(&query.prompt.prompt_type)
        .bind(&query.prompt.params_json)
        .bind(query.created_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::InvalidScope(format!(
                "query already exists: {}",
                query.name
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_query(&self, project_id: &str, name: &str) -> Result<Option<Query>> {
        let row = sqlx::query(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries WHERE project_id = ? AND name = ?"
        ))
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(query_from_row))
    }

    async fn get_query_by_id(&self, id: &str) -> Result<Option<Query>> {
        let row = sqlx::query(&format!("SELECT {QUERY_COLUMNS} FROM queries WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(query_from_row))
    }

    async fn list_queries(&self, project_id: &str) -> Result<Vec<Query>> {
        let rows = sqlx::query(&format!(
            "SELECT {QUERY_COLUMNS} FROM queries WHERE project_id = ? ORDER BY name"
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(query_from_row).collect())
    }

    async fn update_query_prompt(&self, query_id: &str, prompt: &PromptSpec) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let updated = sqlx::query(
            "UPDATE queries SET question = ?, prompt_type = ?, params_json = ? WHERE id = ?",
        )
        .bind(&prompt.question)
        .bind(&prompt.prompt_type)
        .bind(&prompt.params_json)
        .bind(query_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected();
        if updated == 0 {
            return Err(Error::InvalidScope(format!("query not found: {query_id}")));
        }
        sqlx::query("DELETE FROM responses WHERE query_id = ?")
            .bind(query_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn delete_query(&self, query_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query("DELETE FROM responses WHERE query_id = ?")
            .bind(query_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        let deleted = sqlx::query("DELETE FROM queries WHERE id = ?")
            .bind(query_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();
        tx.commit().await.map_err(db_err)?;
        Ok(deleted > 0)
    }

    async fn insert_response(&self, response: &Response) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO responses (query_id, item_key, text, context, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(query_id, item_key) DO NOTHING
            "#,
        )
        .bind(&response.query_id)
        .bind(&response.item_key)
        .bind(&response.text)
        .bind(&response.context)
        .bind(response.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                Error::InvalidScope(format!("query not found: {}", response.query_id))
            } else {
                db_err(e)
            }
        })?
        .rows_affected();
        Ok(inserted > 0)
    }

    async fn get_response(&self, query_id: &str, item_key: &str) -> Result<Option<Response>> {
        let row = sqlx::query(
            "SELECT query_id, item_key, text, context, created_at FROM responses \
             WHERE query_id = ? AND item_key = ?",
        )
        .bind(query_id)
        .bind(item_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.as_ref().map(response_from_row))
    }

    async fn responses_for_query(&self, query_id: &str) -> Result<Vec<Response>> {
        let rows = sqlx::query(
            "SELECT query_id, item_key, text, context, created_at FROM responses \
             WHERE query_id = ? ORDER BY item_key",
        )
        .bind(query_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.iter().map(response_from_row).collect())
    }

    async fn clear_responses(&self, query_id: &str) -> Result<usize> {
        let removed = sqlx::query("DELETE FROM responses WHERE query_id = ?")
            .bind(query_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();
        Ok(removed as usize)
    }
}

//! SQLite-backed [`VectorIndex`].
//!
//! Passages live in the `passages` table with their embedding stored as a
//! little-endian `f32` BLOB. Similarity is computed in process: the
//! candidate rows are selected with an `item_key IN (...)` filter first,
//! so a scoped search never ranks passages from outside its scope.
//!
//! Adding an item is all-or-nothing. Embeddings are computed before the
//! write transaction opens, and the transaction re-checks membership so
//! two concurrent writers cannot both index the same key.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use litreview_core::embedding::{blob_to_vec, vec_to_blob, Embedder};
use litreview_core::error::{Error, Result};
use litreview_core::index::{rank_hits, Candidate, KeyFilter, VectorIndex};
use litreview_core::models::{Passage, SearchHit};

/// Keys bound per `IN (...)` clause.
const FILTER_CHUNK: usize = 500;

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

struct StoredPassage {
    item_key: String,
    seq: usize,
    text: String,
    embedding: Vec<f32>,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            pool,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    async fn embed_passages(&self, passages: &[Passage]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embedder.embed(batch).await?);
        }
        if vectors.len() != passages.len() {
            return Err(Error::embedding(format!(
                "expected {} embeddings, got {}",
                passages.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    async fn load(&self, filter: Option<&KeyFilter>) -> Result<Vec<StoredPassage>> {
        let base = "SELECT item_key, seq, text, embedding FROM passages";
        let rows = match filter {
            None => sqlx::query(base)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::storage)?,
            Some(keys) => {
                let keys: Vec<&String> = keys.iter().collect();
                let mut rows = Vec::new();
                for chunk in keys.chunks(FILTER_CHUNK) {
                    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(base);
                    qb.push(" WHERE item_key IN (");
                    let mut separated = qb.separated(", ");
                    for key in chunk {
                        separated.push_bind(key.as_str());
                    }
                    separated.push_unseparated(")");
                    rows.extend(
                        qb.build()
                            .fetch_all(&self.pool)
                            .await
                            .map_err(Error::storage)?,
                    );
                }
                rows
            }
        };

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                StoredPassage {
                    item_key: row.get("item_key"),
                    seq: row.get::<i64, _>("seq") as usize,
                    text: row.get("text"),
                    embedding: blob_to_vec(&blob),
                }
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn add(&self, item_key: &str, passages: &[Passage]) -> Result<()> {
        if self.contains(item_key).await? {
            return Err(Error::AlreadyIndexed(item_key.to_string()));
        }

        let start = Instant::now();
        let vectors = self.embed_passages(passages).await?;
        let model = self.embedder.model_name().to_string();

        let mut tx = self.pool.begin().await.map_err(Error::storage)?;
        let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages WHERE item_key = ?")
            .bind(item_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::storage)?;
        if existing > 0 {
            return Err(Error::AlreadyIndexed(item_key.to_string()));
        }

        for (passage, vector) in passages.iter().zip(&vectors) {
            sqlx::query(
                r#"
                INSERT INTO passages (item_key, seq, start_char, end_char, text, model, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(item_key)
            .bind(passage.index as i64)
            .bind(passage.start as i64)
            .bind(passage.end as i64)
            .bind(&passage.text)
            .bind(&model)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    Error::AlreadyIndexed(item_key.to_string())
                }
                _ => Error::storage(&e),
            })?;
        }
        tx.commit().await.map_err(Error::storage)?;

        debug!(
            item_key = %item_key,
            chunk_count = passages.len(),
            model = %model,
            duration_ms = start.elapsed().as_millis() as u64,
            "Stored passages"
        );
        Ok(())
    }

    async fn keys(&self) -> Result<BTreeSet<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT DISTINCT item_key FROM passages")
            .fetch_all(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(keys.into_iter().collect())
    }

    async fn contains(&self, item_key: &str) -> Result<bool> {
        Ok(self.count(item_key).await? > 0)
    }

    async fn count(&self, item_key: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM passages WHERE item_key = ?")
            .bind(item_key)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(n as usize)
    }

    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&KeyFilter>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 || filter.is_some_and(|f| f.is_empty()) {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let query_vec = self.embedder.embed_one(query).await?;
        let stored = self.load(filter).await?;
        let candidates = stored.len();
        let hits = rank_hits(
            &query_vec,
            stored.iter().map(|p| Candidate {
                item_key: &p.item_key,
                sequence_index: p.seq,
                text: &p.text,
                embedding: &p.embedding,
            }),
            k,
        );
        debug!(
            candidates,
            result_count = hits.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Vector search"
        );
        Ok(hits)
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM passages")
            .execute(&self.pool)
            .await
            .map_err(Error::storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use litreview_core::chunk::chunk_text;
    use litreview_core::embedding::HashingEmbedder;
    use tempfile::TempDir;

    async fn index() -> (TempDir, SqliteVectorIndex) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("index.sqlite");
        let pool = db::connect(&config).await.unwrap();
        migrate::migrate_pool(&pool).await.unwrap();
        let index = SqliteVectorIndex::new(pool, Arc::new(HashingEmbedder::new(64)), 2);
        (tmp, index)
    }

    fn passages(text: &str) -> Vec<Passage> {
        chunk_text(text, 60, 10)
    }

    const REEF: &str = "Coral reefs bleach under heat stress. Bleaching was recorded across the reef. \
                        Recovery of coral cover was slow after the bleaching events.";
    const COURSE: &str = "Students in a programming course got automated feedback. \
                          Feedback frequency tracked course completion.";

    #[tokio::test]
    async fn test_add_and_count() {
        let (_tmp, index) = index().await;
        let reef = passages(REEF);
        index.add("reef", &reef).await.unwrap();
        assert!(index.contains("reef").await.unwrap());
        assert_eq!(index.count("reef").await.unwrap(), reef.len());
        assert_eq!(
            index.keys().await.unwrap(),
            BTreeSet::from(["reef".to_string()])
        );
    }

    #[tokio::test]
    async fn test_double_add_is_rejected_without_duplicates() {
        let (_tmp, index) = index().await;
        let reef = passages(REEF);
        index.add("reef", &reef).await.unwrap();
        let err = index.add("reef", &reef).await.unwrap_err();
        assert!(err.is_already_indexed());
        assert_eq!(index.count("reef").await.unwrap(), reef.len());
    }

    #[tokio::test]
    async fn test_filter_applies_before_ranking() {
        let (_tmp, index) = index().await;
        index.add("reef", &passages(REEF)).await.unwrap();
        index.add("course", &passages(COURSE)).await.unwrap();

        let unscoped = index.search("coral reef bleaching", 1, None).await.unwrap();
        assert_eq!(unscoped[0].item_key, "reef");

        let only_course = KeyFilter::from(["course".to_string()]);
        let hits = index
            .search("coral reef bleaching", 5, Some(&only_course))
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.item_key == "course"));

        let empty = KeyFilter::new();
        assert!(index.search("coral", 5, Some(&empty)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let (_tmp, index) = index().await;
        index.add("reef", &passages(REEF)).await.unwrap();
        index.clear().await.unwrap();
        assert!(index.keys().await.unwrap().is_empty());
        index.add("reef", &passages(REEF)).await.unwrap();
    }
}

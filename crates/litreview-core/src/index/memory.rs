//! In-memory [`VectorIndex`] for tests and embedding in other tools.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`; search is
//! brute-force cosine similarity.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{Passage, SearchHit};

use super::{rank_hits, Candidate, KeyFilter, VectorIndex};

struct Record {
    item_key: String,
    sequence_index: usize,
    text: String,
    embedding: Vec<f32>,
}

pub struct InMemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    records: RwLock<Vec<Record>>,
}

impl InMemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            records: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<Record>>> {
        self.records
            .read()
            .map_err(|_| Error::Storage("vector index lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<Record>>> {
        self.records
            .write()
            .map_err(|_| Error::Storage("vector index lock poisoned".into()))
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add(&self, item_key: &str, passages: &[Passage]) -> Result<()> {
        if self.contains(item_key).await? {
            return Err(Error::AlreadyIndexed(item_key.to_string()));
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != passages.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                passages.len(),
                vectors.len()
            )));
        }

        let mut records = self.write()?;
        // Re-check under the write lock; a concurrent add may have won.
        if records.iter().any(|r| r.item_key == item_key) {
            return Err(Error::AlreadyIndexed(item_key.to_string()));
        }
        for (p, v) in passages.iter().zip(vectors) {
            records.push(Record {
                item_key: item_key.to_string(),
                sequence_index: p.index,
                text: p.text.clone(),
                embedding: v,
            });
        }
        Ok(())
    }

    async fn keys(&self) -> Result<BTreeSet<String>> {
        Ok(self.read()?.iter().map(|r| r.item_key.clone()).collect())
    }

    async fn contains(&self, item_key: &str) -> Result<bool> {
        Ok(self.read()?.iter().any(|r| r.item_key == item_key))
    }

    async fn count(&self, item_key: &str) -> Result<usize> {
        Ok(self.read()?.iter().filter(|r| r.item_key == item_key).count())
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
        let query_vec = self.embedder.embed_one(query).await?;
        let records = self.read()?;
        let candidates = records
            .iter()
            .filter(|r| filter.map_or(true, |f| f.contains(&r.item_key)))
            .map(|r| Candidate {
                item_key: &r.item_key,
                sequence_index: r.sequence_index,
                text: &r.text,
                embedding: &r.embedding,
            });
        Ok(rank_hits(&query_vec, candidates, k))
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}

//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait stores `(item key, sequence index, passage
//! text, embedding)` records and answers similarity queries, optionally
//! restricted to a set of item keys.
//!
//! # Contract
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | [`add`](VectorIndex::add) | All-or-nothing per key; [`Error::AlreadyIndexed`] if the key is present, checked before embedding |
//! | [`keys`](VectorIndex::keys) | Distinct keys currently indexed |
//! | [`search`](VectorIndex::search) | Ranked by cosine similarity; a filter restricts candidates *before* ranking |
//! | [`clear`](VectorIndex::clear) | Drops every record |
//!
//! [`Error::AlreadyIndexed`]: crate::error::Error::AlreadyIndexed

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{Passage, SearchHit};

/// Set of item keys that a search is restricted to.
pub type KeyFilter = BTreeSet<String>;

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embed and store the passages of one item.
    async fn add(&self, item_key: &str, passages: &[Passage]) -> Result<()>;

    async fn keys(&self) -> Result<BTreeSet<String>>;

    async fn contains(&self, item_key: &str) -> Result<bool>;

    /// Number of passages stored for `item_key`.
    async fn count(&self, item_key: &str) -> Result<usize>;

    /// Nearest passages to `query`, best first.
    async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&KeyFilter>,
    ) -> Result<Vec<SearchHit>>;

    async fn clear(&self) -> Result<()>;
}

/// A stored record as seen by [`rank_hits`].
pub struct Candidate<'a> {
    pub item_key: &'a str,
    pub sequence_index: usize,
    pub text: &'a str,
    pub embedding: &'a [f32],
}

/// Score candidates against `query_vec` and keep the best `k`.
///
/// Ties are broken by `(item_key, sequence_index)` so rankings are stable.
pub fn rank_hits<'a>(
    query_vec: &[f32],
    candidates: impl IntoIterator<Item = Candidate<'a>>,
    k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .map(|c| SearchHit {
            item_key: c.item_key.to_string(),
            sequence_index: c.sequence_index,
            text: c.text.to_string(),
            score: cosine_similarity(query_vec, c.embedding),
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.item_key.cmp(&b.item_key))
            .then_with(|| a.sequence_index.cmp(&b.sequence_index))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_hits_orders_and_truncates() {
        let e1 = vec![1.0, 0.0];
        let e2 = vec![0.0, 1.0];
        let e3 = vec![0.7, 0.7];
        let candidates = vec![
            Candidate { item_key: "a", sequence_index: 0, text: "x", embedding: &e1 },
            Candidate { item_key: "b", sequence_index: 0, text: "y", embedding: &e2 },
            Candidate { item_key: "c", sequence_index: 3, text: "z", embedding: &e3 },
        ];
        let hits = rank_hits(&[1.0, 0.1], candidates, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].item_key, "a");
        assert_eq!(hits[1].item_key, "c");
    }

    #[test]
    fn test_rank_hits_stable_ties() {
        let e = vec![1.0, 0.0];
        let candidates = vec![
            Candidate { item_key: "b", sequence_index: 1, text: "", embedding: &e },
            Candidate { item_key: "a", sequence_index: 2, text: "", embedding: &e },
            Candidate { item_key: "a", sequence_index: 0, text: "", embedding: &e },
        ];
        let hits = rank_hits(&[1.0, 0.0], candidates, 10);
        let order: Vec<_> = hits.iter().map(|h| (h.item_key.as_str(), h.sequence_index)).collect();
        assert_eq!(order, vec![("a", 0), ("a", 2), ("b", 1)]);
    }
}

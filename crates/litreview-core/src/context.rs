//! Context assembly for retrieval-augmented prompts.
//!
//! Retrieval and presentation are two separate phases: similarity search
//! decides *which* passages are used, [`PassageOrder`] decides *how* they
//! are laid out. With the default [`PassageOrder::Position`] the passages
//! of each item are restored to reading order.
//!
//! # Layout
//!
//! ```text
//! title: Learning to program          <- preamble, one "key: value" per line
//!
//! Title: Learning to program          <- metadata header (multi-item scopes)
//! Authors: Doe, J.; Roe, R.
//! Year: 2021
//!
//! passage 2 text
//!
//! passage 5 text
//!
//! Title: ...                          <- next item, in order of its best hit
//! ```

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::index::{KeyFilter, VectorIndex};
use crate::models::{BibliographyItem, SearchHit};
use crate::store::RecordStore;

/// Which items retrieval may draw from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Item(String),
    Items(Vec<String>),
}

impl Scope {
    /// Key pre-filter for the index. `None` means every indexed item.
    pub(crate) fn filter(&self) -> Option<KeyFilter> {
        match self {
            Scope::All => None,
            Scope::Item(key) => Some(BTreeSet::from([key.clone()])),
            Scope::Items(keys) => Some(keys.iter().cloned().collect()),
        }
    }
}

/// Presentation order of retrieved passages within an item group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassageOrder {
    /// Original sequence order (reading order).
    #[default]
    Position,
    /// Similarity rank.
    Relevance,
}

impl FromStr for PassageOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "position" => Ok(PassageOrder::Position),
            "relevance" => Ok(PassageOrder::Relevance),
            other => Err(Error::Config(format!(
                "unknown passage order '{other}', expected position or relevance"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContextRequest<'a> {
    pub search_phrase: &'a str,
    pub scope: &'a Scope,
    pub k: usize,
    pub order: PassageOrder,
    pub include_metadata: bool,
    /// Caller-supplied `key: value` lines placed before everything else.
    pub preamble: &'a [(String, String)],
}

/// The context string plus the hits it was built from, in layout order.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    pub text: String,
    pub hits: Vec<SearchHit>,
}

pub struct ContextAssembler<'a> {
    index: &'a dyn VectorIndex,
    store: &'a dyn RecordStore,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(index: &'a dyn VectorIndex, store: &'a dyn RecordStore) -> Self {
        Self { index, store }
    }

    pub async fn assemble(&self, request: &ContextRequest<'_>) -> Result<AssembledContext> {
        let filter = request.scope.filter();
        let hits = match &filter {
            Some(f) if f.is_empty() => Vec::new(),
            _ => {
                self.index
                    .search(request.search_phrase, request.k, filter.as_ref())
                    .await?
            }
        };

        let groups = group_hits(hits, request.order);

        let mut sections: Vec<String> = Vec::new();
        let preamble = render_preamble(request.preamble);
        if !preamble.is_empty() {
            sections.push(preamble);
        }

        let with_headers = request.include_metadata && !matches!(request.scope, Scope::Item(_));
        let mut ordered_hits = Vec::new();
        for (key, group) in groups {
            if with_headers {
                if let Some(item) = self.store.get_item(&key).await? {
                    let header = metadata_header(&item);
                    if !header.is_empty() {
                        sections.push(header);
                    }
                }
            }
            for hit in group {
                sections.push(hit.text.clone());
                ordered_hits.push(hit);
            }
        }

        Ok(AssembledContext {
            text: sections.join("\n\n"),
            hits: ordered_hits,
        })
    }
}

/// Group hits by item in order of each item's best hit.
fn group_hits(hits: Vec<SearchHit>, order: PassageOrder) -> Vec<(String, Vec<SearchHit>)> {
    let mut groups: Vec<(String, Vec<SearchHit>)> = Vec::new();
    for hit in hits {
        match groups.iter_mut().find(|(k, _)| *k == hit.item_key) {
            Some((_, group)) => group.push(hit),
            None => groups.push((hit.item_key.clone(), vec![hit])),
        }
    }
    if order == PassageOrder::Position {
        for (_, group) in groups.iter_mut() {
            group.sort_by_key(|h| h.sequence_index);
        }
    }
    groups
}

fn render_preamble(preamble: &[(String, String)]) -> String {
    preamble
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .map(|(k, v)| format!("{k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Title / Authors / Year / Keywords lines; empty fields are skipped.
pub fn metadata_header(item: &BibliographyItem) -> String {
    let mut lines = Vec::new();
    if let Some(title) = item.title.as_deref().filter(|t| !t.trim().is_empty()) {
        lines.push(format!("Title: {title}"));
    }
    if !item.authors.is_empty() {
        lines.push(format!("Authors: {}", item.authors.join("; ")));
    }
    if let Some(year) = item.year {
        lines.push(format!("Year: {year}"));
    }
    if !item.keywords.is_empty() {
        lines.push(format!("Keywords: {}", item.keywords.join(", ")));
    }
    lines.join("\n")
}

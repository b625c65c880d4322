//! Core data models for litreview.
//!
//! - [`BibliographyItem`]: a bibliographic record with optional full text.
//! - [`Project`]: a named set of items plus the queries run over them.
//! - [`Query`]: a named prompt belonging to one project.
//! - [`Response`]: the stored answer for one (query, item) pair.
//! - [`Passage`] and [`SearchHit`]: retrieval units produced by the
//!   chunker and returned by the vector index.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bibliographic record.
///
/// The `key` is the stable identifier (citation key, DOI, ...). Items are
/// shared between projects and never deleted implicitly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BibliographyItem {
    pub key: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Full text body. Items without text can be organized but not indexed.
    #[serde(default)]
    pub text: Option<String>,
}

impl BibliographyItem {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// True when the item carries a non-blank full text.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// A named project. Owns its queries; references items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// The committed form of a prompt: `(question, type tag, parameters)`.
///
/// This triple is the identity used for response invalidation. The
/// parameter set is stored as canonical JSON (sorted keys) so that equal
/// parameter sets always serialize identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    pub question: String,
    pub prompt_type: String,
    pub params_json: String,
}

/// A named prompt belonging to exactly one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub prompt: PromptSpec,
    pub created_at: i64,
}

impl Query {
    pub fn new(project_id: &str, name: impl Into<String>, prompt: PromptSpec) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.into(),
            prompt,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// The stored answer for one `(query, item)` pair.
///
/// Keeps the raw model output and the exact context it was produced from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub query_id: String,
    pub item_key: String,
    pub text: String,
    pub context: String,
    pub created_at: i64,
}

impl Response {
    pub fn new(query_id: &str, item_key: &str, text: String, context: String) -> Self {
        Self {
            query_id: query_id.to_string(),
            item_key: item_key.to_string(),
            text,
            context,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// A contiguous slice of an item's text produced by the chunker.
///
/// `start` and `end` are character (not byte) offsets into the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A passage returned by similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub item_key: String,
    pub sequence_index: usize,
    pub text: String,
    /// Cosine similarity between the query and the passage embedding.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_deserialize_abstract_field() {
        let item: BibliographyItem = serde_json::from_str(
            r#"{"key": "smith2020", "title": "On Things", "abstract": "We study things."}"#,
        )
        .unwrap();
        assert_eq!(item.key, "smith2020");
        assert_eq!(item.abstract_text.as_deref(), Some("We study things."));
        assert!(item.authors.is_empty());
        assert!(!item.has_text());
    }

    #[test]
    fn test_has_text_ignores_whitespace() {
        assert!(!BibliographyItem::new("a").with_text("  \n ").has_text());
        assert!(BibliographyItem::new("a").with_text("body").has_text());
    }

    #[test]
    fn test_new_ids_are_unique() {
        let a = Project::new("review");
        let b = Project::new("review");
        assert_ne!(a.id, b.id);
    }
}

//! Error types for litreview.
//!
//! Infrastructure failures (embedding backend, generation backend, storage)
//! are surfaced through [`Error`]. Answers that do not match a prompt's
//! expected shape are not errors: [`crate::prompt::Prompt::parse_value`]
//! returns `None` for them.

use thiserror::Error;

/// Result type alias using litreview's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for litreview operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The vector index already holds passages for this item key.
    ///
    /// Callers treat this as a no-op.
    #[error("Item already indexed: {0}")]
    AlreadyIndexed(String),

    /// A backend needed by the operation is not configured.
    #[error("Missing capability: {0}")]
    MissingCapability(String),

    /// The generation backend failed while answering a prompt.
    #[error("Generation failed: {message}")]
    Generation {
        item_key: Option<String>,
        message: String,
    },

    /// A project, query, or item reference does not resolve.
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Embedding backend unavailable or returned a malformed response.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Record store or index persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A prompt template is missing a parameter, or a stored prompt cannot be decoded.
    #[error("Invalid prompt: {0}")]
    InvalidPrompt(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Wrap any backend error as [`Error::Storage`].
    pub fn storage(e: impl std::fmt::Display) -> Self {
        Error::Storage(e.to_string())
    }

    /// Wrap any backend error as [`Error::Embedding`].
    pub fn embedding(e: impl std::fmt::Display) -> Self {
        Error::Embedding(e.to_string())
    }

    pub fn generation(item_key: Option<&str>, e: impl std::fmt::Display) -> Self {
        Error::Generation {
            item_key: item_key.map(str::to_string),
            message: e.to_string(),
        }
    }

    pub fn is_already_indexed(&self) -> bool {
        matches!(self, Error::AlreadyIndexed(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyIndexed("smith2020".to_string());
        assert_eq!(err.to_string(), "Item already indexed: smith2020");

        let err = Error::MissingCapability("no language model configured".to_string());
        assert_eq!(
            err.to_string(),
            "Missing capability: no language model configured"
        );

        let err = Error::generation(Some("doe2019"), "connection refused");
        assert_eq!(err.to_string(), "Generation failed: connection refused");
    }

    #[test]
    fn test_generation_keeps_item_key() {
        match Error::generation(Some("doe2019"), "timeout") {
            Error::Generation { item_key, .. } => assert_eq!(item_key.as_deref(), Some("doe2019")),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_is_already_indexed() {
        assert!(Error::AlreadyIndexed("k".into()).is_already_indexed());
        assert!(!Error::storage("disk full").is_already_indexed());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}

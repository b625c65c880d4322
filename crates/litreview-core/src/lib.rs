//! # litreview-core
//!
//! Shared logic for litreview: data models, chunking, prompt contracts,
//! vector-index and record-store abstractions, the retrieval-augmented
//! query engine, and topic aggregation over stored answers.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Storage, embedding, and generation backends are plugged in through the
//! [`store::RecordStore`], [`index::VectorIndex`], [`embedding::Embedder`]
//! and [`llm::Generator`] traits; in-memory implementations ship here for
//! tests and embedding in other tools.
//!
//! ```text
//! items ──▶ chunk ──▶ VectorIndex
//!                        │
//! Prompt ──▶ ContextAssembler ──▶ Generator ──▶ QueryEngine ──▶ RecordStore
//!                                                                   │
//!                                             TopicAggregator ◀─────┘
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod store;
pub mod topics;

pub use error::{Error, Result};

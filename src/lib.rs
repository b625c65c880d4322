//! # litreview
//!
//! A local-first retrieval-augmented pipeline for structured literature reviews.
//!
//! Bibliography items (with their full text) are imported into SQLite,
//! split into passages and embedded. Projects group items; queries attach a
//! typed prompt to a project and are answered per item by an LLM that only
//! sees the most relevant passages. Parsed answers can be filtered, exported
//! or clustered into topics.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │   Import    │──▶│ Chunk+Embed  │──▶│    SQLite     │
//! │ JSON / dir  │   │   (index)    │   │ items+vectors │
//! └─────────────┘   └──────────────┘   └───────┬───────┘
//!                                              │
//!                          ┌───────────────────┤
//!                          ▼                   ▼
//!                   ┌─────────────┐     ┌─────────────┐
//!                   │ QueryEngine │────▶│  Generator  │
//!                   │  retrieval  │     │ OpenAI/...  │
//!                   └──────┬──────┘     └─────────────┘
//!                          ▼
//!                 responses, topics, export
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! litrev init
//! litrev import papers.json --project review --index
//! litrev query create review empirical --question "Is the study empirical?"
//! litrev query run review empirical
//! litrev query responses review empirical
//! litrev topics review outcomes
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`app`] | Wires config, database, backends and the engine |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite record store |
//! | [`sqlite_index`] | SQLite passage and vector index |
//! | [`embedding`] | Embedding backends |
//! | [`llm`] | Chat completion backends |
//! | [`http`] | Shared JSON-over-HTTP retry loop |
//! | [`ingest`] | Item import and indexing |
//! | [`search`] | Similarity search over passages |
//! | [`export`] | JSON export of a project's answers |
//! | [`progress`] | Batch progress reporting |

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod export;
pub mod get;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod project_cmd;
pub mod query_cmd;
pub mod search;
pub mod sqlite_index;
pub mod sqlite_store;
pub mod stats;
pub mod topics_cmd;

//! Application wiring.
//!
//! [`App::open`] connects to the database, applies migrations, builds the
//! configured embedder and generator, and assembles a [`QueryEngine`] over
//! the SQLite record store and vector index.

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;

use litreview_core::embedding::Embedder;
use litreview_core::engine::QueryEngine;
use litreview_core::llm::Generator;
use litreview_core::models::{Project, Query};

use crate::config::Config;
use crate::sqlite_index::SqliteVectorIndex;
use crate::sqlite_store::SqliteRecordStore;
use crate::{db, embedding, llm, migrate};

pub struct App {
    pool: SqlitePool,
    engine: QueryEngine,
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn Generator>>,
}

impl App {
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = embedding::create_embedder(&config.embedding)?;
        let generator = llm::create_generator(&config.llm)?;

        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;

        let store = Arc::new(SqliteRecordStore::new(pool.clone()));
        let index = Arc::new(SqliteVectorIndex::new(
            pool.clone(),
            Arc::clone(&embedder),
            config.embedding.batch_size,
        ));
        let engine = QueryEngine::new(
            store,
            index,
            generator.clone(),
            config.engine_settings(),
        );

        Ok(Self {
            pool,
            engine,
            embedder,
            generator,
        })
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    pub fn generator(&self) -> Option<Arc<dyn Generator>> {
        self.generator.clone()
    }

    pub async fn project(&self, name: &str) -> Result<Project> {
        Ok(self.engine.project(name).await?)
    }

    /// Resolve `project/query` names in one step.
    pub async fn query(&self, project: &str, name: &str) -> Result<(Project, Query)> {
        let project = self.project(project).await?;
        let query = self.engine.query(&project.id, name).await?;
        Ok((project, query))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

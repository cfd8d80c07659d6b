//! Component wiring.
//!
//! [`Services::open`] builds every long-lived component from a [`Config`]:
//! the policy store and registry from their snapshot files, the configured
//! vector backend, the HTTP embedder, and an [`Indexer`] sharing all of them.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::embedding::{Embedder, HttpEmbedder};
use crate::fs_scan::{state_dir_exclude, ScanFilter};
use crate::indexer::Indexer;
use crate::policy::PolicyStore;
use crate::registry::DocumentRegistry;
use crate::store::memory::InMemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::VectorStore;

pub struct Services {
    pub config: Arc<Config>,
    pub policy: Arc<PolicyStore>,
    pub registry: Arc<DocumentRegistry>,
    pub store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub indexer: Arc<Indexer>,
}

impl Services {
    /// Open every component with the HTTP embedder and the configured store.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(&config.embedding)?);
        Self::open_with_embedder(config, embedder).await
    }

    /// Open every component around a caller-supplied embedder.
    pub async fn open_with_embedder(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let mut config = config.clone();
        config.index.root = std::fs::canonicalize(&config.index.root)
            .with_context(|| format!("index root not found: {}", config.index.root.display()))?;

        let policy = Arc::new(PolicyStore::open(config.state.policy_path()));
        let registry = Arc::new(DocumentRegistry::open(config.state.registry_path()));

        let store: Arc<dyn VectorStore> = match config.store.backend {
            StoreBackend::Sqlite => Arc::new(
                SqliteStore::open(&config.state.vectors_path())
                    .await
                    .context("failed to open vector database")?,
            ),
            StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        };

        let extra_excludes: Vec<String> = state_dir_exclude(&config.index.root, &config.state.dir)
            .into_iter()
            .collect();
        let filter = ScanFilter::new(&config.index, &extra_excludes)?;

        let indexer = Arc::new(Indexer::new(
            &config,
            policy.clone(),
            registry.clone(),
            store.clone(),
            embedder.clone(),
            filter,
        ));

        tracing::info!(
            root = %config.index.root.display(),
            backend = ?config.store.backend,
            documents = registry.len(),
            gates = policy.gate_count(),
            ignored = policy.ignored_count(),
            "services ready"
        );

        Ok(Self {
            config: Arc::new(config),
            policy,
            registry,
            store,
            embedder,
            indexer,
        })
    }

    /// False when either snapshot file failed its most recent write.
    pub fn persistence_healthy(&self) -> bool {
        self.policy.persistence_healthy() && self.registry.persistence_healthy()
    }
}

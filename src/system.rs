//! System Wiring
//!
//! Assembles the embedder manager, store, index, coordinator and retriever
//! facade from a [`RetrievalConfig`]. Components receive their collaborators
//! explicitly; nothing here is global.
//!
//! A snapshot is two files: the store itself and, for providers that learn a
//! vocabulary (TF-IDF), that vocabulary beside it
//! (see [`paths::vocabulary_path`]). Stored vectors are meaningless without
//! the vocabulary that produced them, so both are written and restored
//! together.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use doc_retrieval_core::{CoreError, CoreResult};

use crate::config::RetrievalConfig;
use crate::models::{Document, Statistics};
use crate::services::embedding::{EmbedderManager, EmbeddingProviderType};
use crate::services::retriever::{RetrievalResult, RetrieverFacade};
use crate::services::vector::{
    DocumentStore, HnswIndex, IngestOutcome, VectorOperationsCoordinator,
};
use crate::utils::paths;

/// Registry name of the configured primary embedding provider.
pub const PRIMARY_PROVIDER: &str = "primary";
/// Registry name of the configured fallback provider, when one is set.
pub const FALLBACK_PROVIDER: &str = "fallback";

/// On-disk form of a saved provider vocabulary.
#[derive(Debug, Serialize, Deserialize)]
struct SavedVocabulary {
    provider: EmbeddingProviderType,
    model: String,
    vocabulary: String,
}

pub struct RetrievalSystem {
    config: RetrievalConfig,
    embedder: Arc<EmbedderManager>,
    coordinator: Arc<VectorOperationsCoordinator>,
    retriever: Arc<RetrieverFacade>,
}

impl RetrievalSystem {
    /// Build every component from `config`. When `store.snapshot_path`
    /// points at an existing file the store is loaded from it, the primary
    /// provider's vocabulary is restored, and the index is built before this
    /// returns.
    pub async fn from_config(config: RetrievalConfig) -> CoreResult<Self> {
        config.validate()?;

        let embedder = Arc::new(EmbedderManager::new(config.manager_config()));
        embedder.register_from_config(PRIMARY_PROVIDER, &config.embedder.primary)?;
        if let Some(fallback) = &config.embedder.fallback {
            embedder.register_from_config(FALLBACK_PROVIDER, fallback)?;
            embedder.set_fallback_provider(Some(FALLBACK_PROVIDER))?;
        }

        let coordinator = match config.store.snapshot_path.as_deref() {
            Some(path) if path.exists() => {
                let restored = restore_vocabulary(&embedder, path)?;
                let coordinator =
                    VectorOperationsCoordinator::open(path, config.index.clone()).await?;
                if !restored
                    && config.embedder.primary.provider == EmbeddingProviderType::TfIdf
                    && coordinator.store().dimension().is_some()
                {
                    tracing::warn!(
                        path = %path.display(),
                        "stored vectors have no saved TF-IDF vocabulary; queries cannot match them"
                    );
                }
                coordinator
            }
            _ => VectorOperationsCoordinator::new(
                Arc::new(DocumentStore::new()),
                Arc::new(HnswIndex::new(config.index.clone())),
            ),
        };
        let coordinator = Arc::new(coordinator);

        let retriever = Arc::new(RetrieverFacade::with_vector_backend(
            Arc::clone(&embedder),
            Arc::clone(&coordinator),
            config.retriever.default_backend.clone(),
            config.retriever.top_k,
        ));

        tracing::info!(
            provider = %config.embedder.primary.provider,
            fallback = config.embedder.fallback.is_some(),
            documents = coordinator.store().len(),
            "retrieval system ready"
        );

        Ok(Self {
            config,
            embedder,
            coordinator,
            retriever,
        })
    }

    /// [`from_config`](Self::from_config) over `~/.doc-retrieval/config.toml`
    /// (or defaults).
    pub async fn from_default_config() -> CoreResult<Self> {
        Self::from_config(RetrievalConfig::load_default()?).await
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn embedder(&self) -> &Arc<EmbedderManager> {
        &self.embedder
    }

    pub fn coordinator(&self) -> &Arc<VectorOperationsCoordinator> {
        &self.coordinator
    }

    pub fn retriever(&self) -> &Arc<RetrieverFacade> {
        &self.retriever
    }

    /// Embed what lacks a vector and add everything.
    pub async fn ingest(&self, documents: Vec<Document>) -> CoreResult<IngestOutcome> {
        self.coordinator.ingest(documents, &self.embedder).await
    }

    /// Query the default backend with the configured `top_k`.
    pub async fn retrieve(&self, query: &str) -> RetrievalResult {
        self.retriever.retrieve(query, None, None).await
    }

    pub async fn statistics(&self) -> Statistics {
        self.coordinator.statistics().await
    }

    /// Write the store to the configured snapshot path.
    pub async fn save(&self) -> CoreResult<()> {
        let path = self
            .config
            .store
            .snapshot_path
            .as_deref()
            .ok_or_else(|| CoreError::configuration("store.snapshot_path is not set"))?;
        self.save_to(path).await
    }

    /// Write the store to `path` and the primary provider's vocabulary, if
    /// it has one, beside it.
    pub async fn save_to(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        self.coordinator.save(path).await?;

        let Some(provider) = self.embedder.provider(PRIMARY_PROVIDER) else {
            return Ok(());
        };
        let Some(vocabulary) = provider.export_vocabulary() else {
            return Ok(());
        };
        let saved = SavedVocabulary {
            provider: provider.provider_type(),
            model: provider.model().to_string(),
            vocabulary,
        };
        let vocabulary_path = paths::vocabulary_path(path);
        std::fs::write(&vocabulary_path, serde_json::to_string(&saved)?)?;
        tracing::info!(
            path = %vocabulary_path.display(),
            dimension = provider.dimension(),
            "embedder vocabulary saved"
        );
        Ok(())
    }
}

/// Import the vocabulary saved beside `snapshot` into the primary provider.
/// Returns whether one was imported. A vocabulary saved by a different
/// provider or model is ignored.
fn restore_vocabulary(embedder: &EmbedderManager, snapshot: &Path) -> CoreResult<bool> {
    let path = paths::vocabulary_path(snapshot);
    if !path.exists() {
        return Ok(false);
    }
    let Some(provider) = embedder.provider(PRIMARY_PROVIDER) else {
        return Ok(false);
    };

    let saved: SavedVocabulary = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    if saved.provider != provider.provider_type() || saved.model != provider.model() {
        tracing::warn!(
            path = %path.display(),
            saved_provider = %saved.provider,
            saved_model = %saved.model,
            "saved vocabulary belongs to another provider, ignoring it"
        );
        return Ok(false);
    }

    provider.import_vocabulary(&saved.vocabulary).map_err(|e| {
        CoreError::validation(format!(
            "cannot restore vocabulary from {}: {}",
            path.display(),
            e
        ))
    })?;
    tracing::info!(
        path = %path.display(),
        dimension = provider.dimension(),
        "embedder vocabulary restored"
    );
    Ok(true)
}

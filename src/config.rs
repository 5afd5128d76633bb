//! Configuration
//!
//! `RetrievalConfig` is the TOML-backed settings tree of the whole
//! subsystem. Every section and field has a default, so an empty file is a
//! valid (TF-IDF, in-memory) configuration.
//!
//! ```toml
//! [embedder]
//! provider = "ollama"
//! model = "nomic-embed-text"
//!
//! [batch]
//! max_concurrent_requests = 8
//!
//! [retriever]
//! top_k = 10
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use doc_retrieval_core::{CoreError, CoreResult};

use crate::services::embedding::{
    BatchPolicy, EmbedderManagerConfig, EmbeddingProviderConfig, EmbeddingProviderType,
};
use crate::services::retriever::VECTOR_BACKEND;
use crate::services::vector::IndexParams;
use crate::utils::paths;

/// `[embedder]`: the primary provider (flattened), an optional fallback and
/// the embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderSection {
    #[serde(flatten)]
    pub primary: EmbeddingProviderConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<EmbeddingProviderConfig>,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    10_000
}

impl Default for EmbedderSection {
    fn default() -> Self {
        Self {
            primary: EmbeddingProviderConfig::new(EmbeddingProviderType::TfIdf),
            fallback: None,
            cache_enabled: true,
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

/// `[retriever]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverSection {
    pub default_backend: String,
    pub top_k: usize,
}

impl Default for RetrieverSection {
    fn default() -> Self {
        Self {
            default_backend: VECTOR_BACKEND.to_string(),
            top_k: 5,
        }
    }
}

/// `[store]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// JSON snapshot loaded at startup (if present) and written by
    /// `RetrievalSystem::save`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub embedder: EmbedderSection,
    pub batch: BatchPolicy,
    pub index: IndexParams,
    pub retriever: RetrieverSection,
    pub store: StoreSection,
}

impl RetrievalConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CoreError::configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// `~/.doc-retrieval/config.toml` when it exists, defaults otherwise.
    pub fn load_default() -> CoreResult<Self> {
        let path = paths::config_path()?;
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CoreError::configuration(format!("cannot serialize configuration: {}", e)))
    }

    pub fn validate(&self) -> CoreResult<()> {
        normalized(&self.embedder.primary).validate()?;
        if let Some(fallback) = &self.embedder.fallback {
            normalized(fallback).validate()?;
        }
        if self.embedder.cache_enabled && self.embedder.cache_max_entries == 0 {
            return Err(CoreError::configuration(
                "embedder.cache_max_entries must be at least 1 when the cache is enabled",
            ));
        }
        self.batch.validate()?;
        self.index.validate()?;
        if self.retriever.default_backend.trim().is_empty() {
            return Err(CoreError::configuration(
                "retriever.default_backend must not be empty",
            ));
        }
        if self.retriever.top_k == 0 {
            return Err(CoreError::configuration("retriever.top_k must be at least 1"));
        }
        Ok(())
    }

    pub fn manager_config(&self) -> EmbedderManagerConfig {
        EmbedderManagerConfig {
            batch: self.batch.clone(),
            cache_enabled: self.embedder.cache_enabled,
            cache_max_entries: self.embedder.cache_max_entries,
        }
    }
}

/// The provider config with a blank model replaced by the provider default.
fn normalized(config: &EmbeddingProviderConfig) -> EmbeddingProviderConfig {
    EmbeddingProviderConfig {
        model: config.effective_model(),
        ..config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_yields_defaults() {
        let config = RetrievalConfig::from_toml_str("").unwrap();
        assert_eq!(config.embedder.primary.provider, EmbeddingProviderType::TfIdf);
        assert_eq!(config.batch, BatchPolicy::default());
        assert_eq!(config.batch.max_concurrent_requests, 4);
        assert_eq!(config.batch.request_timeout_secs, 30);
        assert_eq!(config.index.ef_search, 64);
        assert_eq!(config.index.max_connections, 24);
        assert_eq!(config.retriever.default_backend, "vector");
        assert_eq!(config.retriever.top_k, 5);
        assert!(config.store.snapshot_path.is_none());
    }

    #[test]
    fn parses_full_document() {
        let toml = r#"
            [embedder]
            provider = "open_ai"
            model = "text-embedding-3-small"
            api_key = "sk-test"
            dimension = 512
            cache_enabled = false

            [embedder.fallback]
            provider = "ollama"

            [batch]
            batch_size = 16
            max_concurrent_requests = 8
            max_attempts = 5

            [index]
            ef_search = 128

            [retriever]
            top_k = 10

            [store]
            snapshot_path = "/tmp/store.json"
        "#;
        let config = RetrievalConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.embedder.primary.provider, EmbeddingProviderType::OpenAI);
        assert_eq!(config.embedder.primary.dimension, Some(512));
        assert!(!config.embedder.cache_enabled);
        assert_eq!(
            config.embedder.fallback.as_ref().unwrap().provider,
            EmbeddingProviderType::Ollama
        );
        assert_eq!(config.batch.batch_size, 16);
        assert_eq!(config.batch.retry_base_delay_ms, 500);
        assert_eq!(config.index.ef_search, 128);
        assert_eq!(config.index.ef_construction, 200);
        assert_eq!(config.retriever.top_k, 10);
        assert_eq!(
            config.store.snapshot_path,
            Some(PathBuf::from("/tmp/store.json"))
        );

        let manager = config.manager_config();
        assert_eq!(manager.batch.max_attempts, 5);
        assert!(!manager.cache_enabled);
    }

    #[test]
    fn blank_model_takes_provider_default() {
        let config = RetrievalConfig::from_toml_str("[embedder]\nprovider = \"ollama\"\n").unwrap();
        assert!(config.embedder.primary.model.is_empty());
        assert_eq!(config.embedder.primary.effective_model(), "nomic-embed-text");
    }

    #[test]
    fn embedder_section_without_provider_is_tfidf() {
        let config = RetrievalConfig::from_toml_str("[embedder]\ncache_enabled = false\n").unwrap();
        assert_eq!(config.embedder.primary.provider, EmbeddingProviderType::TfIdf);
        assert_eq!(config.embedder.primary.batch_size, 32);
        assert!(!config.embedder.cache_enabled);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            "[embedder]\nprovider = \"word2vec\"\n",
            "[embedder]\nprovider = \"open_ai\"\n",
            "[batch]\nmax_concurrent_requests = 0\n",
            "[batch]\nretry_base_delay_ms = 20000\n",
            "[index]\nef_search = 0\n",
            "[retriever]\ntop_k = 0\n",
            "[retriever]\ndefault_backend = \" \"\n",
            "[embedder]\ncache_max_entries = 0\n",
            "not toml at all = = =",
        ];
        for case in cases {
            let err = RetrievalConfig::from_toml_str(case).unwrap_err();
            assert!(
                matches!(err, CoreError::Configuration(_)),
                "expected configuration error for {:?}, got {:?}",
                case,
                err
            );
        }
    }

    #[test]
    fn load_and_serialize_round_trip() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = RetrievalConfig::default();
        config.retriever.top_k = 7;
        config.store.snapshot_path = Some(dir.path().join("store.json"));
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = RetrievalConfig::load(&path).unwrap();
        assert_eq!(loaded.retriever.top_k, 7);
        assert_eq!(loaded.store, config.store);
        assert_eq!(loaded.embedder.primary.provider, EmbeddingProviderType::TfIdf);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempdir().expect("tempdir");
        assert!(matches!(
            RetrievalConfig::load(dir.path().join("absent.toml")),
            Err(CoreError::Io(_))
        ));
    }
}

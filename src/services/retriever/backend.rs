//! Retrieval Backends
//!
//! The capability every retrieval strategy implements, the normalized
//! [`RetrievalResult`], and the index-backed [`VectorBackend`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Document;
use crate::services::embedding::EmbedderManager;
use crate::services::vector::VectorOperationsCoordinator;

/// Backend type of [`VectorBackend`].
pub const VECTOR_BACKEND: &str = "vector";

/// Normalized answer of a retrieval.
///
/// `error == None` is the only success signal; on error `documents` is
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub documents: Vec<Document>,
    /// Similarity per document, for backends that score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scores: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Name of the backend that answered (or was asked).
    pub backend: String,
}

impl RetrievalResult {
    pub fn success(
        backend: impl Into<String>,
        documents: Vec<Document>,
        scores: Option<Vec<f64>>,
    ) -> Self {
        Self {
            documents,
            scores,
            error: None,
            backend: backend.into(),
        }
    }

    pub fn failure(backend: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            documents: Vec::new(),
            scores: None,
            error: Some(error.into()),
            backend: backend.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Backend type, e.g. `"vector"`.
    fn kind(&self) -> &str;

    /// Up to `top_k` documents for `query`. Expected failures (index not
    /// ready, embedding failed) go into [`RetrievalResult::error`].
    async fn retrieve(&self, query: &str, top_k: usize) -> RetrievalResult;
}

/// Embeds the query with the embedder manager and searches the coordinator's
/// index.
pub struct VectorBackend {
    embedder: Arc<EmbedderManager>,
    coordinator: Arc<VectorOperationsCoordinator>,
    /// Registered embedding provider; the manager's default when `None`.
    provider: Option<String>,
}

impl VectorBackend {
    pub fn new(
        embedder: Arc<EmbedderManager>,
        coordinator: Arc<VectorOperationsCoordinator>,
    ) -> Self {
        Self {
            embedder,
            coordinator,
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }
}

#[async_trait]
impl RetrievalBackend for VectorBackend {
    fn kind(&self) -> &str {
        VECTOR_BACKEND
    }

    async fn retrieve(&self, query: &str, top_k: usize) -> RetrievalResult {
        let embedded = self
            .embedder
            .embed_query(query, self.provider.as_deref())
            .await;
        if let Some(err) = embedded.error {
            return RetrievalResult::failure(VECTOR_BACKEND, format!("query embedding failed: {}", err));
        }
        let Some(vector) = embedded.vectors.into_iter().next() else {
            return RetrievalResult::failure(VECTOR_BACKEND, "query embedding returned no vector");
        };

        let outcome = self.coordinator.search(&vector, top_k).await;
        if let Some(err) = outcome.error {
            return RetrievalResult::failure(VECTOR_BACKEND, err);
        }
        let (documents, scores): (Vec<Document>, Vec<f64>) = outcome
            .results
            .into_iter()
            .map(|r| (r.document, r.score))
            .unzip();
        RetrievalResult::success(VECTOR_BACKEND, documents, Some(scores))
    }
}

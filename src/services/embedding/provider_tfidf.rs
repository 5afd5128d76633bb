//! TF-IDF Embedding Provider
//!
//! Exposes [`TfIdfVectorizer`] through the [`EmbeddingProvider`] trait so the
//! offline backend is interchangeable with the remote ones.

use async_trait::async_trait;

use super::provider::{EmbeddingError, EmbeddingProvider, EmbeddingProviderType, ProviderResult};
use super::tfidf::TfIdfVectorizer;

const MAX_BATCH_SIZE: usize = 1000;

/// Adapter over a shared [`TfIdfVectorizer`].
///
/// The vocabulary is fitted from the texts handed to
/// [`EmbeddingProvider::prepare`] (or, failing that, the first
/// `embed_documents` call) unless the caller fits or imports it up front.
pub struct TfIdfEmbeddingProvider {
    vectorizer: TfIdfVectorizer,
}

impl TfIdfEmbeddingProvider {
    pub fn new(vectorizer: TfIdfVectorizer) -> Self {
        Self { vectorizer }
    }

    /// Fit the vocabulary on a corpus ahead of embedding.
    pub fn fit(&self, corpus: &[&str]) {
        self.vectorizer.fit(corpus);
    }

    pub fn is_ready(&self) -> bool {
        self.vectorizer.is_ready()
    }
}

impl Default for TfIdfEmbeddingProvider {
    fn default() -> Self {
        Self::new(TfIdfVectorizer::new())
    }
}

#[async_trait]
impl EmbeddingProvider for TfIdfEmbeddingProvider {
    async fn embed_documents(&self, documents: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        if documents.len() > MAX_BATCH_SIZE {
            return Err(EmbeddingError::BatchSizeLimitExceeded {
                requested: documents.len(),
                max_allowed: MAX_BATCH_SIZE,
            });
        }
        Ok(self.vectorizer.fit_transform(documents))
    }

    async fn embed_query(&self, query: &str) -> ProviderResult<Vec<f32>> {
        if !self.vectorizer.is_ready() {
            return Err(EmbeddingError::Other {
                message: "TF-IDF vocabulary has not been built yet".to_string(),
            });
        }
        Ok(self.vectorizer.transform(query))
    }

    fn dimension(&self) -> usize {
        self.vectorizer.dimension()
    }

    async fn health_check(&self) -> ProviderResult<()> {
        Ok(())
    }

    fn prepare(&self, texts: &[&str]) {
        if self.vectorizer.fit_if_unfitted(texts) {
            tracing::info!(
                documents = texts.len(),
                dimension = self.vectorizer.dimension(),
                "TF-IDF vocabulary fitted"
            );
        }
    }

    fn export_vocabulary(&self) -> Option<String> {
        self.vectorizer.export_vocabulary()
    }

    fn import_vocabulary(&self, json: &str) -> Result<(), String> {
        self.vectorizer.import_vocabulary(json)
    }

    fn is_local(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::TfIdf
    }

    fn display_name(&self) -> &str {
        "TF-IDF (Local)"
    }

    fn model(&self) -> &str {
        "tfidf"
    }
}

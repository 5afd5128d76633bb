//! Ollama Embedding Provider
//!
//! Local embedding models served by Ollama, through the `ollama-rs` SDK.
//! No API key. The dimension starts at the configured value (768 for
//! `nomic-embed-text`) and is corrected after the first successful call.

use async_trait::async_trait;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::http_client::build_http_client;
use super::provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType,
    ProviderResult,
};

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";
const OLLAMA_DEFAULT_PORT: u16 = 11434;
const DEFAULT_MODEL: &str = "nomic-embed-text";
const DEFAULT_DIMENSION: usize = 768;
const MAX_BATCH_SIZE: usize = 64;

/// Ollama embedding provider. Batches go through `/api/embed`, which accepts
/// multiple inputs per request.
pub struct OllamaEmbeddingProvider {
    client: Ollama,
    model: String,
    /// Learned from responses; atomic so `&self` calls can update it.
    dimension: AtomicUsize,
    display_name: String,
    base_url: String,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: &EmbeddingProviderConfig) -> ProviderResult<Self> {
        let model = if config.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.trim().to_string()
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        let parsed = url::Url::parse(&base_url).map_err(|e| EmbeddingError::InvalidConfig {
            message: format!("invalid Ollama base_url '{}': {}", base_url, e),
        })?;
        let host = format!(
            "{}://{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("localhost")
        );
        let port = parsed.port().unwrap_or(OLLAMA_DEFAULT_PORT);
        let client = match config.proxy.as_ref() {
            Some(proxy) => Ollama::new_with_client(host, port, build_http_client(Some(proxy))?),
            None => Ollama::new(host, port),
        };

        let display_name = format!("Ollama ({})", model);
        Ok(Self {
            client,
            model,
            dimension: AtomicUsize::new(config.dimension.unwrap_or(DEFAULT_DIMENSION)),
            display_name,
            base_url,
        })
    }

    fn map_ollama_error(&self, err: ollama_rs::error::OllamaError) -> EmbeddingError {
        let msg = err.to_string();
        if msg.contains("connect") || msg.contains("Connection refused") {
            EmbeddingError::ProviderUnavailable {
                message: format!(
                    "cannot connect to Ollama at {}; is `ollama serve` running?",
                    self.base_url
                ),
            }
        } else if msg.contains("not found") || msg.contains("404") {
            EmbeddingError::ModelNotFound {
                model: self.model.clone(),
            }
        } else {
            EmbeddingError::NetworkError { message: msg }
        }
    }

    fn update_dimension(&self, embeddings: &[Vec<f32>]) {
        if let Some(first) = embeddings.first().filter(|v| !v.is_empty()) {
            self.dimension.store(first.len(), Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed_documents(&self, documents: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        if documents.len() > MAX_BATCH_SIZE {
            return Err(EmbeddingError::BatchSizeLimitExceeded {
                requested: documents.len(),
                max_allowed: MAX_BATCH_SIZE,
            });
        }

        let input = EmbeddingsInput::from(documents.to_vec());
        let request = GenerateEmbeddingsRequest::new(self.model.clone(), input);
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| self.map_ollama_error(e))?;

        if response.embeddings.len() != documents.len() {
            return Err(EmbeddingError::ParseError {
                message: format!(
                    "expected {} embeddings but Ollama returned {}",
                    documents.len(),
                    response.embeddings.len()
                ),
            });
        }

        self.update_dimension(&response.embeddings);
        Ok(response.embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Relaxed)
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| self.map_ollama_error(e))?;

        // "nomic-embed-text" matches a local "nomic-embed-text:latest".
        let wanted = self.model.split(':').next().unwrap_or(&self.model);
        let available = models
            .iter()
            .any(|m| m.name == self.model || m.name.split(':').next() == Some(wanted));
        if available {
            Ok(())
        } else {
            Err(EmbeddingError::ModelNotFound {
                model: format!(
                    "'{}' is not pulled locally; run `ollama pull {}`",
                    self.model, self.model
                ),
            })
        }
    }

    fn is_local(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::Ollama
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> EmbeddingProviderConfig {
        EmbeddingProviderConfig::new(EmbeddingProviderType::Ollama)
    }

    #[test]
    fn new_with_default_config() {
        let provider = OllamaEmbeddingProvider::new(&default_config()).unwrap();
        assert_eq!(provider.model(), DEFAULT_MODEL);
        assert_eq!(provider.dimension(), 768);
        assert_eq!(provider.display_name(), "Ollama (nomic-embed-text)");
        assert!(provider.is_local());
        assert_eq!(provider.max_batch_size(), 64);
    }

    #[test]
    fn new_with_custom_endpoint_and_dimension() {
        let config = EmbeddingProviderConfig {
            model: "mxbai-embed-large".to_string(),
            base_url: Some("http://192.168.1.100:11500".to_string()),
            dimension: Some(1024),
            ..default_config()
        };
        let provider = OllamaEmbeddingProvider::new(&config).unwrap();
        assert_eq!(provider.base_url, "http://192.168.1.100:11500");
        assert_eq!(provider.dimension(), 1024);
        assert_eq!(provider.model(), "mxbai-embed-large");
    }

    #[test]
    fn new_rejects_unparseable_base_url() {
        let config = EmbeddingProviderConfig {
            base_url: Some("not a url".to_string()),
            ..default_config()
        };
        assert!(matches!(
            OllamaEmbeddingProvider::new(&config),
            Err(EmbeddingError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn dimension_tracks_responses() {
        let provider = OllamaEmbeddingProvider::new(&default_config()).unwrap();
        provider.update_dimension(&[vec![0.0f32; 384]]);
        assert_eq!(provider.dimension(), 384);

        provider.update_dimension(&[]);
        provider.update_dimension(&[vec![]]);
        assert_eq!(provider.dimension(), 384);
    }

    #[test]
    fn map_errors() {
        let provider = OllamaEmbeddingProvider::new(&default_config()).unwrap();
        let err = provider.map_ollama_error(ollama_rs::error::OllamaError::Other(
            "Connection refused".to_string(),
        ));
        assert!(matches!(err, EmbeddingError::ProviderUnavailable { .. }));
        assert!(err.is_retryable());

        let err = provider.map_ollama_error(ollama_rs::error::OllamaError::Other(
            "model not found".to_string(),
        ));
        assert!(matches!(err, EmbeddingError::ModelNotFound { .. }));

        let err = provider.map_ollama_error(ollama_rs::error::OllamaError::Other(
            "something unexpected".to_string(),
        ));
        assert!(matches!(err, EmbeddingError::NetworkError { .. }));
    }

    #[tokio::test]
    async fn embed_documents_rejects_oversized_batch() {
        let provider = OllamaEmbeddingProvider::new(&default_config()).unwrap();
        let docs: Vec<&str> = (0..65).map(|_| "test").collect();
        assert!(matches!(
            provider.embed_documents(&docs).await,
            Err(EmbeddingError::BatchSizeLimitExceeded {
                requested: 65,
                max_allowed: 64,
            })
        ));
    }

    #[tokio::test]
    #[ignore = "requires a running Ollama server with nomic-embed-text pulled"]
    async fn integration_embed_documents() {
        let provider = OllamaEmbeddingProvider::new(&default_config()).unwrap();
        provider.health_check().await.unwrap();
        let vectors = provider
            .embed_documents(&["text about caching", "text about networking"])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(provider.dimension(), vectors[0].len());
    }
}

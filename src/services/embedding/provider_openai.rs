//! OpenAI-Compatible Embedding Provider
//!
//! Talks to `POST {base_url}` with the OpenAI embeddings wire format:
//!
//! - Request: `{ model, input: ["text1", ...], dimensions? }`
//! - Response: `{ data: [{ embedding, index }], model, usage }`
//!
//! Any server speaking the same format (Azure OpenAI, vLLM, LiteLLM, ...)
//! works through `base_url`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http_client::build_http_client;
use super::provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType,
    ProviderResult,
};

const OPENAI_EMBEDDING_API_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_DIMENSION: usize = 1536;
const MAX_BATCH_SIZE: usize = 2048;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Embedding provider for OpenAI and OpenAI-compatible endpoints.
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    dimension: usize,
    display_name: String,
}

impl OpenAIEmbeddingProvider {
    pub fn new(config: &EmbeddingProviderConfig) -> ProviderResult<Self> {
        let model = if config.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.trim().to_string()
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_EMBEDDING_API_URL.to_string());
        let display_name = format!("OpenAI ({})", model);

        Ok(Self {
            client: build_http_client(config.proxy.as_ref())?,
            api_key: config.api_key.clone().unwrap_or_default(),
            model,
            base_url,
            dimension: config.dimension.unwrap_or(DEFAULT_DIMENSION),
            display_name,
        })
    }

    fn build_request_body(&self, input: Value) -> Value {
        let mut body = json!({
            "model": self.model,
            "input": input,
        });
        // Only the text-embedding-3 family accepts `dimensions`; older and
        // compatible models get their native size unless one was requested.
        if self.dimension != DEFAULT_DIMENSION || self.model.contains("text-embedding-3") {
            body["dimensions"] = json!(self.dimension);
        }
        body
    }

    async fn post_embeddings(&self, body: &Value) -> ProviderResult<EmbeddingResponse> {
        if self.api_key.is_empty() {
            return Err(EmbeddingError::AuthenticationFailed {
                message: "OpenAI API key is not configured".to_string(),
            });
        }

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(e))?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u32>().ok());

        let text = response
            .text()
            .await
            .map_err(|e| EmbeddingError::NetworkError {
                message: format!("failed to read response body: {}", e),
            })?;

        if status == 200 {
            serde_json::from_str::<EmbeddingResponse>(&text).map_err(|e| {
                EmbeddingError::ParseError {
                    message: format!("failed to parse embedding response: {}", e),
                }
            })
        } else {
            Err(self.map_http_error(status, &text, retry_after))
        }
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> EmbeddingError {
        if err.is_connect() {
            EmbeddingError::ProviderUnavailable {
                message: format!("cannot connect to {}: {}", self.base_url, err),
            }
        } else if err.is_timeout() {
            EmbeddingError::NetworkError {
                message: format!("request to {} timed out: {}", self.base_url, err),
            }
        } else {
            EmbeddingError::NetworkError {
                message: err.to_string(),
            }
        }
    }

    fn map_http_error(&self, status: u16, body: &str, retry_after: Option<u32>) -> EmbeddingError {
        let message = serde_json::from_str::<ErrorResponse>(body)
            .ok()
            .and_then(|r| r.error)
            .and_then(|d| d.message)
            .unwrap_or_else(|| body.to_string());

        match status {
            401 | 403 => EmbeddingError::AuthenticationFailed { message },
            429 => EmbeddingError::RateLimited {
                message,
                retry_after,
            },
            400 if message.contains("token") || message.contains("length") => {
                EmbeddingError::InputTooLong { message }
            }
            400 => EmbeddingError::InvalidConfig {
                message: format!("bad request: {}", message),
            },
            404 => EmbeddingError::ModelNotFound {
                model: format!("'{}' at {}: {}", self.model, self.base_url, message),
            },
            _ => EmbeddingError::ServerError {
                message,
                status: Some(status),
            },
        }
    }

    /// Restore input order and check that every input got a vector.
    fn extract_embeddings(
        &self,
        mut response: EmbeddingResponse,
        expected_count: usize,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        if response.data.len() != expected_count {
            return Err(EmbeddingError::ParseError {
                message: format!(
                    "expected {} embeddings but endpoint returned {}",
                    expected_count,
                    response.data.len()
                ),
            });
        }
        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
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

        let body = self.build_request_body(json!(documents));
        let response = self.post_embeddings(&body).await?;
        self.extract_embeddings(response, documents.len())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> ProviderResult<()> {
        let body = self.build_request_body(json!(["health check"]));
        let response = self.post_embeddings(&body).await?;
        self.extract_embeddings(response, 1).map(|_| ())
    }

    fn is_local(&self) -> bool {
        false
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }

    fn provider_type(&self) -> EmbeddingProviderType {
        EmbeddingProviderType::OpenAI
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

    fn keyed_config() -> EmbeddingProviderConfig {
        EmbeddingProviderConfig {
            api_key: Some("sk-test-api-key".to_string()),
            ..EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI)
        }
    }

    fn provider(config: &EmbeddingProviderConfig) -> OpenAIEmbeddingProvider {
        OpenAIEmbeddingProvider::new(config).unwrap()
    }

    // =====================================================================
    // Construction
    // =====================================================================

    #[test]
    fn new_with_default_config() {
        let p = provider(&keyed_config());
        assert_eq!(p.model(), DEFAULT_MODEL);
        assert_eq!(p.dimension(), 1536);
        assert_eq!(p.display_name(), "OpenAI (text-embedding-3-small)");
        assert_eq!(p.base_url, OPENAI_EMBEDDING_API_URL);
        assert!(!p.is_local());
        assert_eq!(p.max_batch_size(), 2048);
    }

    #[test]
    fn new_with_compatible_endpoint() {
        let config = EmbeddingProviderConfig {
            model: "bge-m3".to_string(),
            base_url: Some("http://localhost:8000/v1/embeddings".to_string()),
            dimension: Some(1024),
            ..keyed_config()
        };
        let p = provider(&config);
        assert_eq!(p.base_url, "http://localhost:8000/v1/embeddings");
        assert_eq!(p.dimension(), 1024);
        assert_eq!(p.provider_info()["model"], "bge-m3");
    }

    // =====================================================================
    // Request body
    // =====================================================================

    #[test]
    fn request_body_includes_dimensions_for_v3_models() {
        let p = provider(&keyed_config());
        let body = p.build_request_body(json!(["a", "b"]));
        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["input"], json!(["a", "b"]));
        assert_eq!(body["dimensions"], 1536);
    }

    #[test]
    fn request_body_omits_dimensions_for_native_models() {
        let config = EmbeddingProviderConfig {
            model: "text-embedding-ada-002".to_string(),
            ..keyed_config()
        };
        let body = provider(&config).build_request_body(json!(["a"]));
        assert!(body.get("dimensions").is_none());
    }

    // =====================================================================
    // Error mapping
    // =====================================================================

    #[test]
    fn map_http_errors() {
        let p = provider(&keyed_config());

        let err = p.map_http_error(401, r#"{"error":{"message":"Invalid API key"}}"#, None);
        assert!(matches!(err, EmbeddingError::AuthenticationFailed { ref message } if message == "Invalid API key"));

        let err = p.map_http_error(429, r#"{"error":{"message":"slow down"}}"#, Some(3));
        assert_eq!(err.retry_after_secs(), Some(3));
        assert!(err.is_retryable());

        let err = p.map_http_error(400, r#"{"error":{"message":"max token length exceeded"}}"#, None);
        assert!(matches!(err, EmbeddingError::InputTooLong { .. }));

        let err = p.map_http_error(400, r#"{"error":{"message":"unknown field"}}"#, None);
        assert!(matches!(err, EmbeddingError::InvalidConfig { .. }));

        let err = p.map_http_error(404, "{}", None);
        assert!(matches!(err, EmbeddingError::ModelNotFound { .. }));

        let err = p.map_http_error(503, "service unavailable", None);
        assert!(matches!(
            err,
            EmbeddingError::ServerError {
                status: Some(503),
                ref message
            } if message == "service unavailable"
        ));
    }

    // =====================================================================
    // Response extraction
    // =====================================================================

    #[test]
    fn extract_embeddings_restores_input_order() {
        let p = provider(&keyed_config());
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[2.0,2.0],"index":1},{"embedding":[1.0,1.0],"index":0}],"model":"m"}"#,
        )
        .unwrap();
        let vectors = p.extract_embeddings(response, 2).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn extract_embeddings_rejects_count_mismatch() {
        let p = provider(&keyed_config());
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data":[{"embedding":[1.0],"index":0}]}"#).unwrap();
        assert!(matches!(
            p.extract_embeddings(response, 3),
            Err(EmbeddingError::ParseError { .. })
        ));
    }

    // =====================================================================
    // Calls that never reach the network
    // =====================================================================

    #[tokio::test]
    async fn embed_documents_empty_returns_empty() {
        let p = provider(&keyed_config());
        assert!(p.embed_documents(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embed_documents_rejects_oversized_batch() {
        let p = provider(&keyed_config());
        let docs: Vec<&str> = (0..2049).map(|_| "test").collect();
        assert!(matches!(
            p.embed_documents(&docs).await,
            Err(EmbeddingError::BatchSizeLimitExceeded {
                requested: 2049,
                max_allowed: 2048,
            })
        ));
    }

    #[tokio::test]
    async fn calls_without_api_key_fail_fast() {
        let p = provider(&EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI));
        assert!(matches!(
            p.embed_query("hello").await,
            Err(EmbeddingError::AuthenticationFailed { .. })
        ));
        assert!(p.health_check().await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires OPENAI_API_KEY and network access"]
    async fn integration_embed_documents() {
        let config = EmbeddingProviderConfig {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            ..EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI)
        };
        let p = provider(&config);
        let vectors = p.embed_documents(&["hello", "world"]).await.unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), p.dimension());
    }
}

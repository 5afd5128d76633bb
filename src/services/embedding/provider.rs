//! Embedding Provider Abstraction Layer
//!
//! Defines the async `EmbeddingProvider` trait and supporting types for
//! pluggable embedding backends. Each backend (TF-IDF, Ollama, OpenAI)
//! implements this trait; the concrete type is selected by a factory keyed
//! on `EmbeddingProviderType` rather than by runtime type inspection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use doc_retrieval_core::{CoreError, ProxyConfig};

use crate::models::ProviderInfo;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during embedding operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmbeddingError {
    /// Authentication failed (invalid or missing API key).
    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("model not found: {model}")]
    ModelNotFound { model: String },

    /// The provider is not reachable or not running.
    #[error("provider unavailable: {message}")]
    ProviderUnavailable { message: String },

    #[error("batch size {requested} exceeds maximum {max_allowed}")]
    BatchSizeLimitExceeded {
        requested: usize,
        max_allowed: usize,
    },

    #[error("input too long: {message}")]
    InputTooLong { message: String },

    #[error("network error: {message}")]
    NetworkError { message: String },

    /// The provider returned an unexpected or unparseable response.
    #[error("parse error: {message}")]
    ParseError { message: String },

    #[error("server error{}: {message}", http_status_suffix(.status))]
    ServerError {
        message: String,
        status: Option<u16>,
    },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },

    /// A single call exceeded the per-call deadline.
    #[error("embedding call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("{message}")]
    Other { message: String },
}

fn http_status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl EmbeddingError {
    /// Whether this error is transient and the operation should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::NetworkError { .. }
                | EmbeddingError::RateLimited { .. }
                | EmbeddingError::ServerError { .. }
                | EmbeddingError::ProviderUnavailable { .. }
                | EmbeddingError::Timeout { .. }
        )
    }

    /// For rate-limited errors, return the suggested wait time in seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        if let EmbeddingError::RateLimited { retry_after, .. } = self {
            retry_after.map(u64::from)
        } else {
            None
        }
    }
}

impl From<EmbeddingError> for CoreError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::InvalidConfig { message } => CoreError::Configuration(message),
            other => CoreError::Provider(other.to_string()),
        }
    }
}

/// Convenience alias for provider call results.
pub type ProviderResult<T> = Result<T, EmbeddingError>;

// ---------------------------------------------------------------------------
// Provider type enum
// ---------------------------------------------------------------------------

/// Identifies the embedding backend type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// Local TF-IDF vectorization (no external dependencies).
    #[default]
    TfIdf,
    /// Ollama local embedding models.
    Ollama,
    /// OpenAI embedding models, or any OpenAI-compatible endpoint.
    #[serde(rename = "open_ai")]
    OpenAI,
}

impl EmbeddingProviderType {
    pub fn all() -> &'static [EmbeddingProviderType] {
        &[Self::TfIdf, Self::Ollama, Self::OpenAI]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::TfIdf => "TF-IDF",
            Self::Ollama => "Ollama",
            Self::OpenAI => "OpenAI",
        }
    }

    /// Model used when the configuration leaves `model` blank.
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::TfIdf => "tfidf",
            Self::Ollama => "nomic-embed-text",
            Self::OpenAI => "text-embedding-3-small",
        }
    }

    /// Largest number of texts one request may carry.
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::TfIdf => 1000,
            Self::Ollama => 64,
            Self::OpenAI => 2048,
        }
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, Self::OpenAI)
    }

    /// Output sizes the hosted API accepts; `None` when the model decides.
    pub fn supported_dimensions(&self) -> Option<&'static [usize]> {
        match self {
            Self::OpenAI => Some(&[256, 512, 1024, 1536, 3072]),
            Self::TfIdf | Self::Ollama => None,
        }
    }
}

impl fmt::Display for EmbeddingProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TfIdf => write!(f, "tfidf"),
            Self::Ollama => write!(f, "ollama"),
            Self::OpenAI => write!(f, "openai"),
        }
    }
}

impl FromStr for EmbeddingProviderType {
    type Err = CoreError;

    /// Accepts the display form and the serde form (`tfidf`/`tf_idf`,
    /// `ollama`, `openai`/`open_ai`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tfidf" | "tf_idf" => Ok(Self::TfIdf),
            "ollama" => Ok(Self::Ollama),
            "openai" | "open_ai" => Ok(Self::OpenAI),
            other => Err(CoreError::configuration(format!(
                "unknown embedding provider type '{}'",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// Configuration for an embedding provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProviderConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderType,

    /// Model identifier (e.g., "text-embedding-3-small", "nomic-embed-text").
    #[serde(default)]
    pub model: String,

    /// API key for remote providers. Not needed for local providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override for the provider API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Desired embedding dimension. If `None`, the provider's default is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,

    /// Maximum number of texts to embed in a single request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

fn default_batch_size() -> usize {
    32
}

impl EmbeddingProviderConfig {
    pub fn new(provider: EmbeddingProviderType) -> Self {
        Self {
            provider,
            model: provider.default_model().to_string(),
            api_key: None,
            base_url: None,
            dimension: None,
            batch_size: provider.max_batch_size().min(default_batch_size()),
            proxy: None,
        }
    }

    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> ProviderResult<()> {
        let invalid = |message: String| Err(EmbeddingError::InvalidConfig { message });
        let label = self.provider.label();

        if self.provider.requires_api_key()
            && self.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return invalid(format!("{} requires an API key but none was provided", label));
        }
        if self.model.trim().is_empty() {
            return invalid("model name must not be empty".to_string());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1".to_string());
        }
        if self.batch_size > self.provider.max_batch_size() {
            return invalid(format!(
                "batch_size {} exceeds the {} maximum of {}",
                self.batch_size,
                label,
                self.provider.max_batch_size()
            ));
        }

        match self.dimension {
            Some(0) => invalid("dimension must be at least 1".to_string()),
            // A custom base_url may serve a model with any output size.
            Some(dim) if self.base_url.is_none() => match self.provider.supported_dimensions() {
                Some(supported) if !supported.contains(&dim) => invalid(format!(
                    "dimension {} is not supported by {}; supported: {:?}",
                    dim, label, supported
                )),
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// The configured model, or the provider default when blank.
    pub fn effective_model(&self) -> String {
        let model = self.model.trim();
        if model.is_empty() {
            self.provider.default_model().to_string()
        } else {
            model.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding provider trait
// ---------------------------------------------------------------------------

/// Async trait for embedding providers.
///
/// Implementations produce dense vector representations of text. The trait is
/// object-safe and `Send + Sync` so instances can sit in the manager's
/// registry behind `Arc<dyn EmbeddingProvider>` and be called from any task.
///
/// Providers speak `f32`, the wire format of every supported backend. The
/// manager widens vectors to `f64` when it assigns them to documents.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of document texts, one vector per input, in order.
    async fn embed_documents(&self, documents: &[&str]) -> ProviderResult<Vec<Vec<f32>>>;

    /// Embed a single query text.
    ///
    /// The default implementation delegates to `embed_documents` with a
    /// single-element slice.
    async fn embed_query(&self, query: &str) -> ProviderResult<Vec<f32>> {
        let results = self.embed_documents(&[query]).await?;
        results.into_iter().next().ok_or_else(|| EmbeddingError::Other {
            message: "embed_documents returned empty results for single query".to_string(),
        })
    }

    /// Dimensionality of the vectors produced. TF-IDF returns 0 until its
    /// vocabulary is built.
    fn dimension(&self) -> usize;

    /// Check that the provider is reachable and correctly configured.
    async fn health_check(&self) -> ProviderResult<()>;

    /// Called once with every text of a batch run before the first
    /// `embed_documents` call. Providers that learn from their input fit
    /// here.
    fn prepare(&self, _texts: &[&str]) {}

    /// Learned state that stored vectors depend on, as JSON. `None` for
    /// providers without one.
    fn export_vocabulary(&self) -> Option<String> {
        None
    }

    /// Restore state produced by [`export_vocabulary`](Self::export_vocabulary).
    fn import_vocabulary(&self, _json: &str) -> Result<(), String> {
        Ok(())
    }

    fn is_local(&self) -> bool;

    fn max_batch_size(&self) -> usize;

    fn provider_type(&self) -> EmbeddingProviderType;

    /// Human-readable name, e.g. "Ollama (nomic-embed-text)".
    fn display_name(&self) -> &str;

    /// Model identifier used in cache keys and provider info.
    fn model(&self) -> &str;

    /// Description attached to every `EmbeddingResult` this provider produces.
    fn provider_info(&self) -> ProviderInfo {
        let mut info = ProviderInfo::new();
        info.insert("provider".to_string(), json!(self.provider_type().to_string()));
        info.insert("model".to_string(), json!(self.model()));
        info.insert("display_name".to_string(), json!(self.display_name()));
        info.insert("dimension".to_string(), json!(self.dimension()));
        info.insert("local".to_string(), json!(self.is_local()));
        info
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // EmbeddingProviderType tests
    // =========================================================================

    #[test]
    fn provider_type_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&EmbeddingProviderType::TfIdf).unwrap(),
            "\"tf_idf\""
        );
        assert_eq!(
            serde_json::to_string(&EmbeddingProviderType::OpenAI).unwrap(),
            "\"open_ai\""
        );
        let parsed: EmbeddingProviderType = serde_json::from_str("\"ollama\"").unwrap();
        assert_eq!(parsed, EmbeddingProviderType::Ollama);
    }

    #[test]
    fn provider_type_from_str_accepts_both_spellings() {
        assert_eq!(
            "TfIdf".parse::<EmbeddingProviderType>().unwrap(),
            EmbeddingProviderType::TfIdf
        );
        assert_eq!(
            "tf-idf".parse::<EmbeddingProviderType>().unwrap(),
            EmbeddingProviderType::TfIdf
        );
        assert_eq!(
            "open_ai".parse::<EmbeddingProviderType>().unwrap(),
            EmbeddingProviderType::OpenAI
        );
        for ty in EmbeddingProviderType::all() {
            assert_eq!(ty.to_string().parse::<EmbeddingProviderType>().unwrap(), *ty);
        }
    }

    #[test]
    fn provider_type_from_str_rejects_unknown() {
        let err = "cohere".parse::<EmbeddingProviderType>().unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert!(err.to_string().contains("cohere"));
    }

    #[test]
    fn only_openai_needs_a_key() {
        let keyed: Vec<_> = EmbeddingProviderType::all()
            .iter()
            .filter(|ty| ty.requires_api_key())
            .collect();
        assert_eq!(keyed, vec![&EmbeddingProviderType::OpenAI]);
        assert!(EmbeddingProviderType::Ollama.supported_dimensions().is_none());
    }

    // =========================================================================
    // EmbeddingProviderConfig tests
    // =========================================================================

    #[test]
    fn config_new_uses_defaults() {
        let config = EmbeddingProviderConfig::new(EmbeddingProviderType::Ollama);
        assert_eq!(config.model, "nomic-embed-text");
        assert_eq!(config.batch_size, 32);
        assert!(config.dimension.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_validate_requires_api_key_for_remote() {
        let config = EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI);
        assert!(matches!(
            config.validate(),
            Err(EmbeddingError::InvalidConfig { .. })
        ));

        let blank = EmbeddingProviderConfig {
            api_key: Some("   ".to_string()),
            ..EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI)
        };
        assert!(blank.validate().is_err());

        let keyed = EmbeddingProviderConfig {
            api_key: Some("sk-test".to_string()),
            ..EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI)
        };
        assert!(keyed.validate().is_ok());
    }

    #[test]
    fn config_validate_batch_and_model() {
        let mut config = EmbeddingProviderConfig::new(EmbeddingProviderType::TfIdf);
        config.batch_size = 0;
        assert!(config.validate().is_err());

        config.batch_size = 5000;
        assert!(config.validate().is_err());

        config.batch_size = 10;
        config.model = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_validate_dimensions() {
        let mut config = EmbeddingProviderConfig {
            api_key: Some("sk-test".to_string()),
            dimension: Some(999),
            ..EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI)
        };
        assert!(config.validate().is_err());

        config.dimension = Some(512);
        assert!(config.validate().is_ok());

        config.dimension = Some(0);
        assert!(config.validate().is_err());

        // Custom endpoints are free to use other dimensions.
        config.dimension = Some(999);
        config.base_url = Some("http://localhost:8000/v1/embeddings".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_effective_model_falls_back_to_default() {
        let config = EmbeddingProviderConfig {
            model: "".to_string(),
            ..EmbeddingProviderConfig::new(EmbeddingProviderType::OpenAI)
        };
        assert_eq!(config.effective_model(), "text-embedding-3-small");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: EmbeddingProviderConfig =
            serde_json::from_str(r#"{"provider":"ollama"}"#).unwrap();
        assert_eq!(config.provider, EmbeddingProviderType::Ollama);
        assert_eq!(config.batch_size, 32);
        assert!(config.api_key.is_none());
    }

    // =========================================================================
    // EmbeddingError tests
    // =========================================================================

    #[test]
    fn error_is_retryable() {
        assert!(EmbeddingError::NetworkError {
            message: "x".into()
        }
        .is_retryable());
        assert!(EmbeddingError::Timeout { seconds: 30 }.is_retryable());
        assert!(EmbeddingError::ServerError {
            message: "x".into(),
            status: Some(503)
        }
        .is_retryable());
        assert!(!EmbeddingError::AuthenticationFailed {
            message: "x".into()
        }
        .is_retryable());
        assert!(!EmbeddingError::ParseError {
            message: "x".into()
        }
        .is_retryable());
    }

    #[test]
    fn error_retry_after_secs() {
        let err = EmbeddingError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(7),
        };
        assert_eq!(err.retry_after_secs(), Some(7));
        assert_eq!(
            EmbeddingError::NetworkError {
                message: "x".into()
            }
            .retry_after_secs(),
            None
        );
    }

    #[test]
    fn error_display() {
        let err = EmbeddingError::ServerError {
            message: "boom".into(),
            status: Some(502),
        };
        assert_eq!(err.to_string(), "server error (HTTP 502): boom");
        let err = EmbeddingError::ServerError {
            message: "boom".into(),
            status: None,
        };
        assert_eq!(err.to_string(), "server error: boom");
    }

    #[test]
    fn error_converts_into_core_error() {
        let core: CoreError = EmbeddingError::InvalidConfig {
            message: "bad".into(),
        }
        .into();
        assert!(matches!(core, CoreError::Configuration(_)));

        let core: CoreError = EmbeddingError::Timeout { seconds: 1 }.into();
        assert!(matches!(core, CoreError::Provider(_)));
    }

    #[test]
    fn error_serde_is_tagged() {
        let err = EmbeddingError::BatchSizeLimitExceeded {
            requested: 70,
            max_allowed: 64,
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"batch_size_limit_exceeded\""));
    }

    #[test]
    fn embedding_provider_trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn EmbeddingProvider) {}
    }
}

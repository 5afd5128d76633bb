//! Embedding
//!
//! Provider abstraction, the concrete providers (TF-IDF, Ollama,
//! OpenAI-compatible) and the [`EmbedderManager`] that routes work to them.

pub mod http_client;
pub mod manager;
pub mod provider;
pub mod provider_ollama;
pub mod provider_openai;
pub mod provider_tfidf;
pub mod tfidf;

pub use manager::{
    BatchEmbedReport, BatchOptions, BatchPolicy, EmbedderManager, EmbedderManagerConfig,
    SkipReason, SkippedDocument,
};
pub use provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig,
    EmbeddingProviderType, ProviderResult,
};
pub use provider_ollama::OllamaEmbeddingProvider;
pub use provider_openai::OpenAIEmbeddingProvider;
pub use provider_tfidf::TfIdfEmbeddingProvider;
pub use tfidf::TfIdfVectorizer;

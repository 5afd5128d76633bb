//! Doc Retrieval
//!
//! Document retrieval over embedding vectors:
//! - Embedding providers (TF-IDF, Ollama, OpenAI-compatible) behind a
//!   manager with batching, retries, caching and a fallback provider
//! - A canonical in-memory document store with JSON snapshots
//! - An HNSW nearest-neighbor index rebuilt after every store mutation
//! - A retriever facade over named backends
//!
//! [`RetrievalSystem`] wires everything from a [`RetrievalConfig`].

pub mod config;
pub mod models;
pub mod services;
pub mod system;
pub mod utils;

pub use config::RetrievalConfig;
pub use models::{
    Document, EmbeddingResult, IndexSnapshot, IndexState, ScoredDocument, SearchOutcome,
    Statistics, VectorDefect,
};
pub use services::embedding::{
    BatchEmbedReport, EmbedderManager, EmbeddingError, EmbeddingProvider,
    EmbeddingProviderConfig, EmbeddingProviderType,
};
pub use services::retriever::{RetrievalBackend, RetrievalResult, RetrieverFacade};
pub use services::vector::{
    DocumentFilter, DocumentStore, ExcludedDocument, ExclusionReason, HnswIndex, IndexParams,
    MutationOutcome, VectorOperationsCoordinator,
};
pub use system::RetrievalSystem;

pub use doc_retrieval_core::{CoreError, CoreResult};

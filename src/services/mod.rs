//! Services
//!
//! - `embedding` - providers and the [`EmbedderManager`](embedding::EmbedderManager)
//! - `vector` - document store, HNSW index and the coordinator over both
//! - `retriever` - backend registry and the query facade

pub mod embedding;
pub mod retriever;
pub mod vector;

pub use embedding::EmbedderManager;
pub use retriever::RetrieverFacade;
pub use vector::VectorOperationsCoordinator;

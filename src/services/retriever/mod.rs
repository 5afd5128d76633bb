//! Retrieval
//!
//! [`RetrieverFacade`] multiplexes queries across named
//! [`RetrievalBackend`]s.

pub mod backend;
pub mod facade;

pub use backend::{RetrievalBackend, RetrievalResult, VectorBackend, VECTOR_BACKEND};
pub use facade::{BackendFactory, RetrieverFacade};

//! Data Models
//!
//! Plain data structures shared by the embedding, vector and retriever
//! services.

pub mod document;
pub mod index;
pub mod statistics;

pub use document::*;
pub use index::*;
pub use statistics::*;

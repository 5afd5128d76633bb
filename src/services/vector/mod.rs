//! Vector Storage
//!
//! The canonical [`DocumentStore`], the derived [`HnswIndex`], and the
//! [`VectorOperationsCoordinator`] that keeps the two consistent.

pub mod coordinator;
pub mod filter;
pub mod hnsw_index;
pub mod store;

pub use coordinator::{IngestOutcome, MutationOutcome, VectorOperationsCoordinator};
pub use filter::{DocumentFilter, FilterMatcher};
pub use hnsw_index::{HnswIndex, IndexParams};
pub use store::{DocumentStore, ExcludedDocument, ExclusionReason};

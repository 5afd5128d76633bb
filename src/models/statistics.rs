//! Statistics Model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bucket used in the extension histogram for documents without a
/// `file_path` extension.
pub const NO_EXTENSION: &str = "(none)";

/// Read-only view combining document store counts with index readiness.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_documents: usize,
    pub documents_with_vectors: usize,
    /// Per-extension document counts, keyed by lowercased extension.
    pub extensions: BTreeMap<String, usize>,
    /// Dimension established by the store, `None` while no vector is stored.
    pub embedding_dimension: Option<usize>,
    pub index_ready: bool,
    pub indexed_documents: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_built_at: Option<DateTime<Utc>>,
    /// Warning recorded by the last mutation whose rebuild failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_warning: Option<String>,
}

//! Index Models
//!
//! Snapshot metadata, lifecycle state and search results of the
//! nearest-neighbor index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::document::Document;

/// Lifecycle of the nearest-neighbor index.
///
/// `Empty -> Building -> Ready`, `Ready -> Building` on every rebuild, and
/// `Building -> Empty` when a rebuild fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Empty,
    Building,
    Ready,
}

impl Default for IndexState {
    fn default() -> Self {
        Self::Empty
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Building => write!(f, "building"),
            Self::Ready => write!(f, "ready"),
        }
    }
}

/// Immutable description of a published index build.
///
/// Replaced wholesale on every rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    /// Unique id of this build.
    pub build_id: String,
    /// Indexed document ids; position `i` is the engine's point id `i`.
    pub document_ids: Vec<String>,
    pub dimension: usize,
    pub built_at: DateTime<Utc>,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.document_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }
}

/// A document paired with its similarity to the query (higher is closer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f64,
}

/// Result of a top-k search.
///
/// Searching an index that is not ready is an expected condition: the
/// outcome carries no results and an `error` message instead of failing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<ScoredDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    pub fn found(results: Vec<ScoredDocument>) -> Self {
        Self {
            results,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            results: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Ids of the returned documents in rank order.
    pub fn ids(&self) -> Vec<&str> {
        self.results.iter().map(|r| r.document.id.as_str()).collect()
    }

    pub fn into_documents(self) -> Vec<Document> {
        self.results.into_iter().map(|r| r.document).collect()
    }
}

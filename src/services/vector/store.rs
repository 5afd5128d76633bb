//! Document Store
//!
//! The canonical collection of documents. Everything the index serves is
//! derived from here; the store never looks at the index.
//!
//! The store tracks one embedding dimension. It is established by the first
//! usable vector stored and dropped again once no stored vector has it.
//! All-zero and non-finite vectors never count as usable.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use doc_retrieval_core::{CoreError, CoreResult};

use super::filter::DocumentFilter;
use crate::models::{Document, Statistics, VectorDefect, NO_EXTENSION};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<String, Document>,
    dimension: Option<usize>,
}

impl StoreState {
    /// Re-derive the dimension after a removal: keep it while some stored
    /// vector still has it, otherwise take the first remaining vector's.
    fn settle_dimension(&mut self) {
        let current = self.dimension;
        if current.is_some()
            && self
                .documents
                .values()
                .any(|d| usable_dimension(d) == current)
        {
            return;
        }
        self.dimension = self.documents.values().find_map(usable_dimension);
    }
}

/// The vector length, provided the vector can be ranked.
fn usable_dimension(document: &Document) -> Option<usize> {
    match document.vector_defect() {
        Some(_) => None,
        None => document.vector_dimension(),
    }
}

/// Why [`DocumentStore::partition_valid`] turned a document away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    MissingVector,
    DimensionMismatch { expected: usize, actual: usize },
    ZeroVector,
    NonFiniteVector,
}

impl From<VectorDefect> for ExclusionReason {
    fn from(defect: VectorDefect) -> Self {
        match defect {
            VectorDefect::ZeroNorm => Self::ZeroVector,
            VectorDefect::NonFinite => Self::NonFiniteVector,
        }
    }
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVector => f.write_str("no vector"),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: expected {}, got {}",
                expected, actual
            ),
            Self::ZeroVector => write!(f, "unusable vector: {}", VectorDefect::ZeroNorm),
            Self::NonFiniteVector => write!(f, "unusable vector: {}", VectorDefect::NonFinite),
        }
    }
}

/// A document left out of a mutation, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedDocument {
    pub id: String,
    pub reason: ExclusionReason,
}

/// On-disk layout of [`DocumentStore::save_to_path`].
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    dimension: Option<usize>,
    documents: Vec<Document>,
}

/// Thread-safe document collection keyed by id, iterated in id order.
#[derive(Debug, Default)]
pub struct DocumentStore {
    state: RwLock<StoreState>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert documents, replacing any stored document with the same id.
    ///
    /// Fails with a validation error, before touching the store, if any
    /// document has a blank id.
    pub fn add(&self, documents: Vec<Document>) -> CoreResult<usize> {
        Self::check_ids(&documents)?;

        let count = documents.len();
        let mut state = self.write();
        for document in documents {
            if state.dimension.is_none() {
                state.dimension = usable_dimension(&document);
            }
            state.documents.insert(document.id.clone(), document);
        }
        // A replaced document may have carried the last vector of the
        // established dimension.
        state.settle_dimension();
        tracing::debug!(added = count, total = state.documents.len(), "documents stored");
        Ok(count)
    }

    /// Fail with a validation error if any document has a blank id.
    pub fn check_ids(documents: &[Document]) -> CoreResult<()> {
        match documents.iter().position(|d| d.id.trim().is_empty()) {
            Some(position) => Err(CoreError::validation(format!(
                "document at position {} has an empty id",
                position
            ))),
            None => Ok(()),
        }
    }

    /// Remove documents by id. Unknown ids are ignored. Returns how many
    /// documents were actually removed.
    pub fn remove<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        let mut state = self.write();
        let removed = ids
            .iter()
            .filter(|id| state.documents.remove(id.as_ref()).is_some())
            .count();
        if removed > 0 {
            state.settle_dimension();
        }
        tracing::debug!(requested = ids.len(), removed, "documents removed");
        removed
    }

    pub fn clear(&self) {
        let mut state = self.write();
        state.documents.clear();
        state.dimension = None;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Document> {
        self.read().documents.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().documents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().documents.is_empty()
    }

    /// The established embedding dimension, if any vector is stored.
    pub fn dimension(&self) -> Option<usize> {
        self.read().dimension
    }

    /// All documents in id order.
    pub fn documents(&self) -> Vec<Document> {
        self.read().documents.values().cloned().collect()
    }

    pub fn filter(&self, filter: &DocumentFilter) -> CoreResult<Vec<Document>> {
        let matcher = filter.matcher()?;
        Ok(self.filter_with(|d| matcher.matches(d)))
    }

    pub fn filter_with<F>(&self, predicate: F) -> Vec<Document>
    where
        F: Fn(&Document) -> bool,
    {
        self.read()
            .documents
            .values()
            .filter(|d| predicate(d))
            .cloned()
            .collect()
    }

    /// The documents that could be stored without breaking the dimension
    /// invariant: those with a finite, non-zero vector whose length equals
    /// the store's dimension, or, for a store without one, the first usable
    /// vector's length.
    pub fn validate(&self, documents: &[Document]) -> Vec<Document> {
        self.partition_valid(documents.to_vec()).0
    }

    /// Split `documents` into valid ones and exclusions per
    /// [`validate`](Self::validate).
    pub fn partition_valid(
        &self,
        documents: Vec<Document>,
    ) -> (Vec<Document>, Vec<ExcludedDocument>) {
        let target = self
            .dimension()
            .or_else(|| documents.iter().find_map(usable_dimension));

        let mut valid = Vec::with_capacity(documents.len());
        let mut excluded = Vec::new();
        for document in documents {
            match exclusion_reason(&document, target) {
                Some(reason) => excluded.push(ExcludedDocument {
                    id: document.id,
                    reason,
                }),
                None => valid.push(document),
            }
        }
        (valid, excluded)
    }

    /// Store-side counts. Index fields are left at their defaults.
    pub fn statistics(&self) -> Statistics {
        let state = self.read();
        let mut extensions = BTreeMap::new();
        for document in state.documents.values() {
            let bucket = document
                .extension()
                .unwrap_or_else(|| NO_EXTENSION.to_string());
            *extensions.entry(bucket).or_insert(0usize) += 1;
        }
        Statistics {
            total_documents: state.documents.len(),
            documents_with_vectors: state.documents.values().filter(|d| d.has_vector()).count(),
            extensions,
            embedding_dimension: state.dimension,
            ..Statistics::default()
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write the store as pretty JSON, creating parent directories.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let path = path.as_ref();
        let file = {
            let state = self.read();
            StoreFile {
                version: SNAPSHOT_VERSION,
                dimension: state.dimension,
                documents: state.documents.values().cloned().collect(),
            }
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        tracing::info!(
            path = %path.display(),
            documents = file.documents.len(),
            "document store saved"
        );
        Ok(())
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let file: StoreFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        if file.version != SNAPSHOT_VERSION {
            return Err(CoreError::validation(format!(
                "unsupported store snapshot version {} in {}",
                file.version,
                path.display()
            )));
        }

        let store = Self::new();
        {
            let mut state = store.write();
            state.dimension = file.dimension;
        }
        store.add(file.documents)?;
        tracing::info!(path = %path.display(), documents = store.len(), "document store loaded");
        Ok(store)
    }
}

fn exclusion_reason(document: &Document, target: Option<usize>) -> Option<ExclusionReason> {
    let Some(actual) = document.vector_dimension() else {
        return Some(ExclusionReason::MissingVector);
    };
    if let Some(defect) = document.vector_defect() {
        return Some(defect.into());
    }
    match target {
        Some(expected) if expected != actual => {
            Some(ExclusionReason::DimensionMismatch { expected, actual })
        }
        _ => None,
    }
}

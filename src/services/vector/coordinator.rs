//! Vector Operations Coordinator
//!
//! Sequences the document store and the HNSW index so callers never observe
//! a mismatched pair. Every mutation runs "mutate store, then rebuild index"
//! under the write half of an operation lock; searches and statistics take
//! the read half.
//!
//! The store is authoritative. A failed rebuild never rolls a store change
//! back: the mutation succeeds, readiness drops to false and a warning is
//! recorded.

use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use doc_retrieval_core::CoreResult;

use super::hnsw_index::{HnswIndex, IndexParams};
use super::store::{DocumentStore, ExcludedDocument};
use crate::models::{Document, SearchOutcome, Statistics};
use crate::services::embedding::{EmbedderManager, SkippedDocument};

/// Result of an add/remove/clear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome {
    /// Documents stored (add) or removed (remove/clear).
    pub applied: usize,
    /// Documents left out of an add: missing, degenerate (all-zero or
    /// non-finite) or wrongly sized vectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded: Vec<ExcludedDocument>,
    pub index_ready: bool,
    /// Set when the follow-up rebuild failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result of [`VectorOperationsCoordinator::ingest`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestOutcome {
    /// Documents that received a vector during ingest.
    pub embedded: usize,
    /// Documents the embedder could not embed.
    pub skipped: Vec<SkippedDocument>,
    pub mutation: MutationOutcome,
}

pub struct VectorOperationsCoordinator {
    store: Arc<DocumentStore>,
    index: Arc<HnswIndex>,
    op_lock: RwLock<()>,
    last_warning: Mutex<Option<String>>,
}

impl VectorOperationsCoordinator {
    pub fn new(store: Arc<DocumentStore>, index: Arc<HnswIndex>) -> Self {
        Self {
            store,
            index,
            op_lock: RwLock::new(()),
            last_warning: Mutex::new(None),
        }
    }

    /// Load a store snapshot from `path` and build the index over it.
    pub async fn open(path: impl AsRef<Path>, params: IndexParams) -> CoreResult<Self> {
        let store = Arc::new(DocumentStore::load_from_path(path)?);
        let coordinator = Self::new(store, Arc::new(HnswIndex::new(params)));
        coordinator.rebuild().await;
        Ok(coordinator)
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<HnswIndex> {
        &self.index
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Validate, store, rebuild.
    ///
    /// Documents without a usable vector of the store's dimension are
    /// excluded and reported with the reason, not stored. A blank id fails
    /// the whole call before anything is stored or rebuilt.
    pub async fn add_documents(&self, documents: Vec<Document>) -> CoreResult<MutationOutcome> {
        let _guard = self.op_lock.write().await;
        DocumentStore::check_ids(&documents)?;

        let (valid, excluded) = self.store.partition_valid(documents);
        for exclusion in &excluded {
            tracing::warn!(
                document = %exclusion.id,
                reason = %exclusion.reason,
                dimension = ?self.store.dimension(),
                "document excluded from store"
            );
        }

        let applied = self.store.add(valid)?;
        let (index_ready, warning) = self.rebuild_locked().await;
        Ok(MutationOutcome {
            applied,
            excluded,
            index_ready,
            warning,
        })
    }

    /// Remove by id, then rebuild. Unknown ids are ignored.
    pub async fn remove_documents<S: AsRef<str>>(&self, ids: &[S]) -> MutationOutcome {
        let _guard = self.op_lock.write().await;
        let applied = self.store.remove(ids);
        let (index_ready, warning) = self.rebuild_locked().await;
        MutationOutcome {
            applied,
            index_ready,
            warning,
            ..MutationOutcome::default()
        }
    }

    pub async fn clear_documents(&self) -> MutationOutcome {
        let _guard = self.op_lock.write().await;
        let applied = self.store.len();
        self.store.clear();
        let (index_ready, warning) = self.rebuild_locked().await;
        MutationOutcome {
            applied,
            index_ready,
            warning,
            ..MutationOutcome::default()
        }
    }

    /// Embed the documents that lack a vector, then add everything.
    ///
    /// The run is pre-seeded with the store's dimension (or that of the first
    /// supplied vector) so it cannot establish a conflicting one.
    pub async fn ingest(
        &self,
        documents: Vec<Document>,
        embedder: &EmbedderManager,
    ) -> CoreResult<IngestOutcome> {
        DocumentStore::check_ids(&documents)?;
        let (mut ready, pending): (Vec<Document>, Vec<Document>) =
            documents.into_iter().partition(Document::has_vector);

        let expected = self.store.dimension().or_else(|| {
            ready
                .iter()
                .filter(|d| d.vector_defect().is_none())
                .find_map(Document::vector_dimension)
        });
        let report = if pending.is_empty() {
            Default::default()
        } else {
            embedder.embed_batch_with_dimension(pending, expected).await?
        };

        let embedded = report.documents.len();
        ready.extend(report.documents);
        let mutation = self.add_documents(ready).await?;
        tracing::info!(
            embedded,
            skipped = report.skipped.len(),
            stored = mutation.applied,
            "ingest finished"
        );
        Ok(IngestOutcome {
            embedded,
            skipped: report.skipped,
            mutation,
        })
    }

    /// Rebuild the index from the current store contents.
    pub async fn rebuild(&self) -> bool {
        let _guard = self.op_lock.write().await;
        self.rebuild_locked().await.0
    }

    /// Caller holds the write lock. An empty (vector-less) store is a normal
    /// state: the index is reset without a warning.
    async fn rebuild_locked(&self) -> (bool, Option<String>) {
        let documents = self.store.documents();
        if !documents.iter().any(Document::has_vector) {
            self.index.reset().await;
            self.set_warning(None);
            return (false, None);
        }

        match self.index.build(&documents, self.store.dimension()).await {
            Ok(_) => {
                self.set_warning(None);
                (true, None)
            }
            Err(err) => {
                let warning = format!("index rebuild failed: {}", err);
                tracing::warn!(error = %err, "store updated but index rebuild failed");
                self.set_warning(Some(warning.clone()));
                (false, Some(warning))
            }
        }
    }

    fn set_warning(&self, warning: Option<String>) {
        *self.last_warning.lock().unwrap_or_else(|e| e.into_inner()) = warning;
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Top-`k` search. Not-ready is reported in the outcome, never raised.
    pub async fn search(&self, query_vector: &[f64], k: usize) -> SearchOutcome {
        let _guard = self.op_lock.read().await;
        self.index.search(query_vector, k).await
    }

    pub async fn ready(&self) -> bool {
        let _guard = self.op_lock.read().await;
        self.index.ready().await
    }

    pub async fn statistics(&self) -> Statistics {
        let _guard = self.op_lock.read().await;
        let snapshot = self.index.snapshot().await;
        let index_ready = self.index.ready().await;
        Statistics {
            index_ready,
            indexed_documents: if index_ready {
                snapshot.as_ref().map_or(0, |s| s.len())
            } else {
                0
            },
            index_built_at: snapshot.map(|s| s.built_at),
            last_warning: self
                .last_warning
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            ..self.store.statistics()
        }
    }

    /// Persist the store (the index is always rebuilt on load).
    pub async fn save(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let _guard = self.op_lock.read().await;
        self.store.save_to_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::{
        BatchPolicy, EmbedderManagerConfig, SkipReason, TfIdfEmbeddingProvider,
    };
    use crate::services::vector::ExclusionReason;
    use doc_retrieval_core::CoreError;
    use tempfile::tempdir;

    fn coordinator() -> VectorOperationsCoordinator {
        VectorOperationsCoordinator::new(
            Arc::new(DocumentStore::new()),
            Arc::new(HnswIndex::new(IndexParams::default())),
        )
    }

    fn vdoc(id: &str, vector: Vec<f64>) -> Document {
        Document::new(id, format!("text of {}", id)).with_vector(vector)
    }

    fn scenario_docs() -> Vec<Document> {
        vec![
            Document::new("d1", "text about caching").with_vector(vec![1.0, 0.2, 0.0]),
            Document::new("d2", "text about networking").with_vector(vec![0.0, 0.3, 1.0]),
        ]
    }

    // ======================================================================
    // add
    // ======================================================================

    #[tokio::test]
    async fn consistent_add_sets_dimension_and_readiness() {
        let c = coordinator();
        let outcome = c
            .add_documents(vec![
                vdoc("a", vec![1.0, 0.0, 0.0, 0.0]),
                vdoc("b", vec![0.0, 1.0, 0.0, 0.0]),
                vdoc("c", vec![0.0, 0.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.applied, 3);
        assert!(outcome.index_ready);
        assert!(outcome.warning.is_none());
        assert!(c.ready().await);

        let stats = c.statistics().await;
        assert_eq!(stats.embedding_dimension, Some(4));
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.indexed_documents, 3);
        assert!(stats.index_built_at.is_some());
    }

    #[tokio::test]
    async fn mismatched_document_is_excluded_not_fatal() {
        let c = coordinator();
        c.add_documents(vec![vdoc("a", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let outcome = c
            .add_documents(vec![
                vdoc("b", vec![0.0, 1.0, 0.0]),
                vdoc("wrong", vec![1.0, 1.0]),
                Document::new("bare", "no vector"),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        let excluded: Vec<(&str, ExclusionReason)> = outcome
            .excluded
            .iter()
            .map(|e| (e.id.as_str(), e.reason))
            .collect();
        assert_eq!(
            excluded,
            vec![
                (
                    "wrong",
                    ExclusionReason::DimensionMismatch {
                        expected: 3,
                        actual: 2
                    }
                ),
                ("bare", ExclusionReason::MissingVector),
            ]
        );
        assert!(outcome.index_ready);
        assert!(c.store().get("wrong").is_none());
        assert_eq!(c.statistics().await.total_documents, 2);
        assert_eq!(c.index().snapshot().await.unwrap().document_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn zero_vector_is_excluded_and_never_outranks() {
        let c = coordinator();
        let mut docs = scenario_docs();
        docs.push(vdoc("d3", vec![0.0, 0.0, 0.0]));
        docs.push(vdoc("d4", vec![f64::NAN, 1.0, 0.0]));

        let outcome = c.add_documents(docs).await.unwrap();
        assert_eq!(outcome.applied, 2);
        assert_eq!(
            outcome.excluded,
            vec![
                ExcludedDocument {
                    id: "d3".into(),
                    reason: ExclusionReason::ZeroVector,
                },
                ExcludedDocument {
                    id: "d4".into(),
                    reason: ExclusionReason::NonFiniteVector,
                },
            ]
        );
        assert!(c.store().get("d3").is_none());

        let results = c.search(&[0.95, 0.2, 0.05], 3).await;
        assert_eq!(results.ids(), vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn blank_id_aborts_without_touching_store_or_index() {
        let c = coordinator();
        c.add_documents(scenario_docs()).await.unwrap();
        let before = c.index().snapshot().await.unwrap();

        let err = c
            .add_documents(vec![vdoc("d3", vec![0.5, 0.5, 0.5]), vdoc("", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(c.store().get("d3").is_none());
        assert_eq!(c.index().snapshot().await.unwrap().build_id, before.build_id);
        assert!(c.ready().await);
    }

    // ======================================================================
    // search after mutation
    // ======================================================================

    #[tokio::test]
    async fn nearest_document_ranks_first() {
        let c = coordinator();
        c.add_documents(scenario_docs()).await.unwrap();

        let outcome = c.search(&[0.95, 0.2, 0.05], 2).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.ids(), vec!["d1", "d2"]);
    }

    #[tokio::test]
    async fn removed_documents_never_come_back() {
        let c = coordinator();
        c.add_documents((0..20).map(|i| vdoc(&format!("doc-{}", i), vec![1.0, i as f64, 0.5])).collect())
            .await
            .unwrap();

        let outcome = c.remove_documents(&["doc-3", "doc-7", "missing"]).await;
        assert_eq!(outcome.applied, 2);
        assert!(outcome.index_ready);

        let results = c.search(&[1.0, 3.0, 0.5], 20).await;
        assert_eq!(results.results.len(), 18);
        assert!(!results.ids().contains(&"doc-3"));
        assert!(!results.ids().contains(&"doc-7"));
    }

    #[tokio::test]
    async fn clear_then_search_is_empty_and_not_ready() {
        let c = coordinator();
        c.add_documents(scenario_docs()).await.unwrap();

        let outcome = c.clear_documents().await;
        assert_eq!(outcome.applied, 2);
        assert!(!outcome.index_ready);
        assert!(outcome.warning.is_none());

        let results = c.search(&[1.0, 0.0, 0.0], 2).await;
        assert!(results.results.is_empty());
        assert!(!results.is_ok());
        assert!(!c.ready().await);
        assert_eq!(c.statistics().await.embedding_dimension, None);
    }

    #[tokio::test]
    async fn add_remove_add_matches_single_add() {
        let once = coordinator();
        once.add_documents(scenario_docs()).await.unwrap();

        let cycled = coordinator();
        cycled.add_documents(scenario_docs()).await.unwrap();
        cycled.remove_documents(&["d1"]).await;
        cycled.add_documents(vec![scenario_docs().remove(0)]).await.unwrap();

        let a = once.index().snapshot().await.unwrap();
        let b = cycled.index().snapshot().await.unwrap();
        assert_eq!(a.document_ids, b.document_ids);
        assert_eq!(once.statistics().await.total_documents, cycled.statistics().await.total_documents);

        let q = [0.95, 0.2, 0.05];
        assert_eq!(once.search(&q, 5).await.ids(), cycled.search(&q, 5).await.ids());
    }

    #[tokio::test]
    async fn concurrent_adds_are_serialised() {
        let c = Arc::new(coordinator());
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let c = Arc::clone(&c);
                tokio::spawn(async move {
                    c.add_documents(vec![vdoc(&format!("doc-{}", i), vec![1.0, i as f64])])
                        .await
                        .unwrap();
                    c.search(&[1.0, 0.0], 3).await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(c.index().len().await, 8);
    }

    // ======================================================================
    // ingest / persistence
    // ======================================================================

    #[tokio::test]
    async fn ingest_embeds_missing_vectors() {
        let manager = EmbedderManager::new(EmbedderManagerConfig::default());
        manager.register_provider("tfidf", Arc::new(TfIdfEmbeddingProvider::default()));

        let c = coordinator();
        let outcome = c
            .ingest(
                vec![
                    Document::new("d1", "text about caching and eviction"),
                    Document::new("d2", "text about networking and sockets"),
                ],
                &manager,
            )
            .await
            .unwrap();
        assert_eq!(outcome.embedded, 2);
        assert!(outcome.skipped.is_empty());
        assert!(outcome.mutation.index_ready);

        let query = manager.embed_query("caching eviction", None).await;
        let results = c.search(&query.vectors[0], 2).await;
        assert_eq!(results.ids()[0], "d1");
    }

    #[tokio::test]
    async fn out_of_vocabulary_document_is_skipped_not_ranked() {
        let manager = EmbedderManager::new(EmbedderManagerConfig::default());
        manager.register_provider("tfidf", Arc::new(TfIdfEmbeddingProvider::default()));

        let c = coordinator();
        c.ingest(
            vec![
                Document::new("d1", "text about caching and eviction"),
                Document::new("d2", "text about networking and sockets"),
            ],
            &manager,
        )
        .await
        .unwrap();

        // Every token of d3 is outside the fitted vocabulary.
        let outcome = c
            .ingest(
                vec![Document::new("d3", "kubernetes deployment manifests")],
                &manager,
            )
            .await
            .unwrap();
        assert_eq!(outcome.embedded, 0);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].id, "d3");
        assert_eq!(outcome.skipped[0].reason, SkipReason::ZeroEmbedding);
        assert!(c.store().get("d3").is_none());

        let query = manager.embed_query("caching eviction", None).await;
        let results = c.search(&query.vectors[0], 3).await;
        assert_eq!(results.ids()[0], "d1");
        assert!(!results.ids().contains(&"d3"));
    }

    #[tokio::test]
    async fn later_chunks_contribute_to_the_vocabulary() {
        let config = EmbedderManagerConfig {
            batch: BatchPolicy {
                batch_size: 2,
                ..BatchPolicy::default()
            },
            ..EmbedderManagerConfig::default()
        };
        let manager = EmbedderManager::new(config);
        manager.register_provider("tfidf", Arc::new(TfIdfEmbeddingProvider::default()));

        let c = coordinator();
        let outcome = c
            .ingest(
                vec![
                    Document::new("d0", "alpha apple orchard"),
                    Document::new("d1", "bravo banana plantation"),
                    Document::new("d2", "charlie cherry blossom"),
                    Document::new("d3", "delta date palm"),
                    Document::new("d4", "echo elderberry shrub"),
                    Document::new("d5", "foxtrot fig tree"),
                ],
                &manager,
            )
            .await
            .unwrap();
        assert_eq!(outcome.embedded, 6);
        assert!(outcome.skipped.is_empty());
        assert_eq!(c.store().len(), 6);

        let query = manager.embed_query("elderberry shrub", None).await;
        assert!(query.is_ok());
        let results = c.search(&query.vectors[0], 3).await;
        assert_eq!(results.ids()[0], "d4");
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_store_change_and_records_warning() {
        let c = coordinator();
        c.add_documents(scenario_docs()).await.unwrap();
        assert!(c.ready().await);

        c.index().fail_builds(true);
        let outcome = c
            .add_documents(vec![vdoc("d3", vec![0.5, 0.5, 0.5])])
            .await
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert!(!outcome.index_ready);
        let warning = outcome.warning.expect("rebuild warning");
        assert!(warning.starts_with("index rebuild failed"), "{}", warning);
        assert_eq!(c.store().len(), 3);
        assert!(c.store().get("d3").is_some());
        assert!(!c.ready().await);

        let stats = c.statistics().await;
        assert_eq!(stats.total_documents, 3);
        assert!(!stats.index_ready);
        assert_eq!(stats.indexed_documents, 0);
        assert_eq!(stats.last_warning.as_deref(), Some(warning.as_str()));
        assert!(!c.search(&[1.0, 0.0, 0.0], 1).await.is_ok());

        // The next successful rebuild clears the warning.
        c.index().fail_builds(false);
        assert!(c.rebuild().await);
        assert!(c.statistics().await.last_warning.is_none());
        assert_eq!(c.search(&[0.5, 0.5, 0.5], 1).await.ids(), vec!["d3"]);
    }

    #[tokio::test]
    async fn open_rebuilds_from_snapshot() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("store.json");

        let c = coordinator();
        c.add_documents(scenario_docs()).await.unwrap();
        c.save(&path).await.unwrap();

        let reopened = VectorOperationsCoordinator::open(&path, IndexParams::default())
            .await
            .unwrap();
        assert!(reopened.ready().await);
        assert_eq!(reopened.search(&[0.95, 0.2, 0.05], 1).await.ids(), vec!["d1"]);
    }
}

//! HNSW Index Adapter
//!
//! Bridges document store contents to the `hnsw_rs` approximate nearest
//! neighbor engine. The index is a derived cache: every build is a full
//! reconstruction from the documents handed in, and the result is published
//! as one immutable unit (graph, documents, [`IndexSnapshot`]).
//!
//! ## Lifecycle
//!
//! `Empty -> Building -> Ready`; a failed build goes `Building -> Empty` and
//! discards the previous snapshot, so a stale graph is never served after the
//! store has changed.
//!
//! ## Thread Safety
//!
//! The published build sits behind a `tokio::sync::RwLock` and is shared as
//! an `Arc`, so searches run concurrently. CPU-bound graph construction and
//! queries are offloaded to `tokio::task::spawn_blocking`.

#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use doc_retrieval_core::{CoreError, CoreResult};

use crate::models::{
    vector_defect, Document, IndexSnapshot, IndexState, ScoredDocument, SearchOutcome,
};

/// Upper bound on graph layers accepted by `hnsw_rs`.
const MAX_LAYER: usize = 16;

/// HNSW tuning parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexParams {
    pub max_connections: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            max_connections: 24,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

impl IndexParams {
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_connections == 0 || self.ef_construction == 0 || self.ef_search == 0 {
            return Err(CoreError::configuration(
                "index.max_connections, index.ef_construction and index.ef_search must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Newtype so the graph can cross threads.
struct HnswInner {
    hnsw: Hnsw<'static, f32, DistCosine>,
}

// SAFETY: the graph is built with owned data (`Hnsw::new` + `insert_slice`),
// never mutated after publication, and hnsw_rs guards its internal storage
// with locks.
unsafe impl Send for HnswInner {}
unsafe impl Sync for HnswInner {}

/// One successful build. Point id `i` of the graph is `documents[i]`.
struct Published {
    graph: HnswInner,
    documents: Vec<Document>,
    snapshot: IndexSnapshot,
}

pub struct HnswIndex {
    params: IndexParams,
    state: RwLock<IndexState>,
    published: RwLock<Option<Arc<Published>>>,
    #[cfg(test)]
    fail_builds: AtomicBool,
}

impl HnswIndex {
    pub fn new(params: IndexParams) -> Self {
        Self {
            params,
            state: RwLock::new(IndexState::Empty),
            published: RwLock::new(None),
            #[cfg(test)]
            fail_builds: AtomicBool::new(false),
        }
    }

    /// Make every following build fail (after graph construction) until
    /// switched off again.
    #[cfg(test)]
    pub(crate) fn fail_builds(&self, fail: bool) {
        self.fail_builds.store(fail, Ordering::SeqCst);
    }

    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// Rebuild from `documents`.
    ///
    /// The build dimension is `dimension` when given (the store's established
    /// one), otherwise the length of the first usable vector. Documents
    /// without a finite, non-zero vector of that length are left out. Fails
    /// with a retrieval error, and leaves the index `Empty`, when nothing can
    /// be indexed.
    pub async fn build(
        &self,
        documents: &[Document],
        dimension: Option<usize>,
    ) -> CoreResult<IndexSnapshot> {
        *self.state.write().await = IndexState::Building;
        let started = Instant::now();

        let built = construct(&self.params, documents, dimension).await;
        #[cfg(test)]
        let built = if self.fail_builds.load(Ordering::SeqCst) {
            Err(CoreError::retrieval("graph construction failed"))
        } else {
            built
        };

        match built {
            Ok(published) => {
                let snapshot = published.snapshot.clone();
                *self.published.write().await = Some(Arc::new(published));
                *self.state.write().await = IndexState::Ready;
                info!(
                    build_id = %snapshot.build_id,
                    documents = snapshot.len(),
                    dimension = snapshot.dimension,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "HNSW index built"
                );
                Ok(snapshot)
            }
            Err(err) => {
                *self.published.write().await = None;
                *self.state.write().await = IndexState::Empty;
                warn!(error = %err, "HNSW index build failed");
                Err(err)
            }
        }
    }

    /// Drop the published build.
    pub async fn reset(&self) {
        *self.published.write().await = None;
        *self.state.write().await = IndexState::Empty;
    }

    pub async fn state(&self) -> IndexState {
        *self.state.read().await
    }

    /// True only after a successful build with at least one document.
    pub async fn ready(&self) -> bool {
        self.ready_build().await.is_some()
    }

    pub async fn snapshot(&self) -> Option<IndexSnapshot> {
        self.published
            .read()
            .await
            .as_ref()
            .map(|p| p.snapshot.clone())
    }

    /// Number of indexed documents (0 when not ready).
    pub async fn len(&self) -> usize {
        self.ready_build().await.map_or(0, |p| p.documents.len())
    }

    async fn ready_build(&self) -> Option<Arc<Published>> {
        if *self.state.read().await != IndexState::Ready {
            return None;
        }
        self.published
            .read()
            .await
            .clone()
            .filter(|p| !p.documents.is_empty())
    }

    /// Top-`k` documents by cosine similarity (`1 - distance`), best first.
    ///
    /// Never fails: a missing build, a query of the wrong length or an
    /// all-zero / non-finite query yields an empty outcome with `error` set.
    pub async fn search(&self, query: &[f64], k: usize) -> SearchOutcome {
        let Some(build) = self.ready_build().await else {
            return SearchOutcome::failed("index is not ready");
        };
        if query.len() != build.snapshot.dimension {
            return SearchOutcome::failed(format!(
                "query has dimension {}, index has dimension {}",
                query.len(),
                build.snapshot.dimension
            ));
        }
        if let Some(defect) = vector_defect(query) {
            return SearchOutcome::failed(format!("query vector is unusable: {}", defect));
        }
        if k == 0 {
            return SearchOutcome::found(Vec::new());
        }

        let query: Vec<f32> = query.iter().map(|&x| x as f32).collect();
        let k = k.min(build.documents.len());
        let ef = self.params.ef_search.max(k);

        let searched = tokio::task::spawn_blocking(move || {
            let neighbours = build.graph.hnsw.search(&query, k, ef);
            let mut results: Vec<ScoredDocument> = neighbours
                .into_iter()
                .filter_map(|n| {
                    build.documents.get(n.d_id).map(|document| ScoredDocument {
                        document: document.clone(),
                        score: 1.0 - f64::from(n.distance),
                    })
                })
                .collect();
            results.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            results.truncate(k);
            results
        })
        .await;

        match searched {
            Ok(results) => {
                debug!(k, returned = results.len(), "HNSW search");
                SearchOutcome::found(results)
            }
            Err(err) => SearchOutcome::failed(format!("search task failed: {}", err)),
        }
    }
}

/// Select the indexable documents and build the graph off the async runtime.
async fn construct(
    params: &IndexParams,
    documents: &[Document],
    dimension: Option<usize>,
) -> CoreResult<Published> {
    let dimension = dimension
        .or_else(|| {
            documents
                .iter()
                .filter(|d| d.vector_defect().is_none())
                .find_map(Document::vector_dimension)
        })
        .ok_or_else(|| CoreError::retrieval("no document carries a usable embedding vector"))?;

    let mut indexed = Vec::with_capacity(documents.len());
    for document in documents {
        if let Some(defect) = document.vector_defect() {
            warn!(
                document = %document.id,
                defect = %defect,
                "excluding document from index: unusable vector"
            );
            continue;
        }
        match document.vector_dimension() {
            Some(d) if d == dimension => indexed.push(document.clone()),
            Some(d) => warn!(
                document = %document.id,
                expected = dimension,
                actual = d,
                "excluding document from index: dimension mismatch"
            ),
            None => debug!(document = %document.id, "excluding document from index: no vector"),
        }
    }
    if indexed.is_empty() {
        return Err(CoreError::retrieval(format!(
            "no documents with {}-dimensional vectors to index",
            dimension
        )));
    }

    let vectors: Vec<Vec<f32>> = indexed
        .iter()
        .map(|d| {
            d.vector
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(|&x| x as f32)
                .collect()
        })
        .collect();
    let params = params.clone();

    let graph = tokio::task::spawn_blocking(move || {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            params.max_connections,
            vectors.len().max(1),
            MAX_LAYER,
            params.ef_construction,
            DistCosine,
        );
        for (id, vector) in vectors.iter().enumerate() {
            hnsw.insert_slice((vector.as_slice(), id));
        }
        HnswInner { hnsw }
    })
    .await
    .map_err(|e| CoreError::internal(format!("index build task failed: {}", e)))?;

    let snapshot = IndexSnapshot {
        build_id: uuid::Uuid::new_v4().to_string(),
        document_ids: indexed.iter().map(|d| d.id.clone()).collect(),
        dimension,
        built_at: Utc::now(),
    };
    Ok(Published {
        graph,
        documents: indexed,
        snapshot,
    })
}

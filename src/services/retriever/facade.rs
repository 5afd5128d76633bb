//! Retriever Facade
//!
//! Uniform query entry point over named retrieval backends. A backend name
//! that is not registered is created on first use by the factory registered
//! for its type; the type is the part of the name before the first `:`, so
//! `vector` and `vector:manuals` both come from the `vector` factory.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use doc_retrieval_core::{CoreError, CoreResult};

use super::backend::{RetrievalBackend, RetrievalResult, VectorBackend, VECTOR_BACKEND};
use crate::services::embedding::EmbedderManager;
use crate::services::vector::VectorOperationsCoordinator;

/// Builds a backend for a given backend name.
pub type BackendFactory =
    Arc<dyn Fn(&str) -> CoreResult<Arc<dyn RetrievalBackend>> + Send + Sync>;

pub struct RetrieverFacade {
    backends: RwLock<HashMap<String, Arc<dyn RetrievalBackend>>>,
    factories: RwLock<HashMap<String, BackendFactory>>,
    default_backend: RwLock<String>,
    default_top_k: usize,
}

impl RetrieverFacade {
    pub fn new(default_backend: impl Into<String>, default_top_k: usize) -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
            factories: RwLock::new(HashMap::new()),
            default_backend: RwLock::new(default_backend.into()),
            default_top_k,
        }
    }

    /// A facade whose `vector` factory builds [`VectorBackend`]s over the
    /// given embedder and coordinator.
    pub fn with_vector_backend(
        embedder: Arc<EmbedderManager>,
        coordinator: Arc<VectorOperationsCoordinator>,
        default_backend: impl Into<String>,
        default_top_k: usize,
    ) -> Self {
        let facade = Self::new(default_backend, default_top_k);
        facade.register_factory(
            VECTOR_BACKEND,
            Arc::new(move |_name: &str| {
                let backend: Arc<dyn RetrievalBackend> = Arc::new(VectorBackend::new(
                    Arc::clone(&embedder),
                    Arc::clone(&coordinator),
                ));
                Ok(backend)
            }),
        );
        facade
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    pub fn default_backend(&self) -> String {
        self.default_backend
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Register (or replace) a backend instance under `name`.
    pub fn register_backend(&self, name: impl Into<String>, backend: Arc<dyn RetrievalBackend>) {
        let name = name.into();
        tracing::info!(backend = %name, kind = backend.kind(), "registering retrieval backend");
        self.backends
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, backend);
    }

    pub fn unregister_backend(&self, name: &str) -> Option<Arc<dyn RetrievalBackend>> {
        self.backends
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
    }

    pub fn register_factory(&self, kind: impl Into<String>, factory: BackendFactory) {
        self.factories
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(kind.into(), factory);
    }

    /// Registered (including lazily created) backend names, sorted.
    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Make `name` the default. It must be registered or creatable.
    pub fn set_default_backend(&self, name: &str) -> CoreResult<()> {
        if !self.is_resolvable(name) {
            return Err(unsupported(name));
        }
        *self.default_backend.write().unwrap_or_else(|e| e.into_inner()) = name.to_string();
        tracing::info!(backend = %name, "default retrieval backend set");
        Ok(())
    }

    fn is_resolvable(&self, name: &str) -> bool {
        self.backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
            || self
                .factories
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains_key(backend_kind(name))
    }

    /// The backend registered as `name`, creating it through the factory of
    /// its type on first use. Fails with a configuration error when no
    /// factory supports the type.
    pub fn backend(&self, name: &str) -> CoreResult<Arc<dyn RetrievalBackend>> {
        if let Some(backend) = self
            .backends
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            return Ok(Arc::clone(backend));
        }

        let factory = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(backend_kind(name))
            .cloned()
            .ok_or_else(|| unsupported(name))?;

        let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
        // Another caller may have created it while we waited for the lock.
        if let Some(backend) = backends.get(name) {
            return Ok(Arc::clone(backend));
        }
        let backend = factory(name)?;
        tracing::info!(backend = %name, kind = backend.kind(), "created retrieval backend");
        backends.insert(name.to_string(), Arc::clone(&backend));
        Ok(backend)
    }

    /// Retrieve up to `top_k` (default: the configured `top_k`) documents
    /// from `backend` (default: the default backend).
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        backend: Option<&str>,
    ) -> RetrievalResult {
        let name = backend.map_or_else(|| self.default_backend(), str::to_string);
        if query.trim().is_empty() {
            return RetrievalResult::failure(name, "query must not be empty");
        }
        let instance = match self.backend(&name) {
            Ok(instance) => instance,
            Err(err) => return RetrievalResult::failure(name, err.to_string()),
        };

        let top_k = top_k.unwrap_or(self.default_top_k);
        let mut result = instance.retrieve(query, top_k).await;
        result.backend = name;
        match &result.error {
            None => tracing::debug!(
                backend = %result.backend,
                top_k,
                returned = result.documents.len(),
                "retrieval finished"
            ),
            Some(err) => tracing::warn!(backend = %result.backend, error = %err, "retrieval failed"),
        }
        result
    }
}

fn backend_kind(name: &str) -> &str {
    name.split(':').next().unwrap_or(name)
}

fn unsupported(name: &str) -> CoreError {
    CoreError::configuration(format!("unsupported retrieval backend '{}'", name))
}

//! Embedder Manager
//!
//! Single dispatch point for embedding work. Holds the named provider
//! registry, routes single-shot and batch requests, and owns the retry,
//! timeout and concurrency policy.
//!
//! ## Batch runs
//!
//! `embed_batch` partitions the input into fixed-size chunks and fans them out
//! concurrently; a counting semaphore bounds the number of provider calls in
//! flight. A chunk that fails as a whole is retried document by document, so a
//! single bad input never costs the rest of its chunk. The first successful
//! embedding (in input order) fixes the dimension of the run and later vectors
//! of any other length are dropped. All-zero and non-finite embeddings are
//! skipped before they can fix anything.
//!
//! Providers see every text of a run through
//! [`EmbeddingProvider::prepare`] before the first chunk is sent.
//!
//! ## Blocking path
//!
//! The `*_blocking` methods drive the async implementation through
//! [`crate::utils::runtime::block_on`]; there is no second implementation.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures_util::future::join_all;
use mini_moka::sync::{Cache, ConcurrentCacheExt};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use doc_retrieval_core::{CoreError, CoreResult};

use super::provider::{
    EmbeddingError, EmbeddingProvider, EmbeddingProviderConfig, EmbeddingProviderType,
    ProviderResult,
};
use super::provider_ollama::OllamaEmbeddingProvider;
use super::provider_openai::OpenAIEmbeddingProvider;
use super::provider_tfidf::TfIdfEmbeddingProvider;
use crate::models::{vector_defect, Document, EmbeddingResult, ProviderInfo, VectorDefect};
use crate::utils::runtime::block_on;

const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Batching, retry and timeout policy for provider calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    /// Documents per provider call (capped by the provider's own limit).
    pub batch_size: usize,
    /// Provider calls allowed in flight at once during a batch run.
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
    /// Attempts per call, including the first one.
    pub max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_concurrent_requests: 4,
            request_timeout_secs: 30,
            max_attempts: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
        }
    }
}

impl BatchPolicy {
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::configuration("batch.batch_size must be at least 1"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(CoreError::configuration(
                "batch.max_concurrent_requests must be at least 1",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::configuration(
                "batch.request_timeout_secs must be at least 1",
            ));
        }
        if self.max_attempts == 0 {
            return Err(CoreError::configuration("batch.max_attempts must be at least 1"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(CoreError::configuration(
                "batch.retry_base_delay_ms must not exceed batch.retry_max_delay_ms",
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Wait before the attempt after `attempt` (0-based): exponential from the
    /// base delay, capped, unless the error carries its own `retry_after`.
    fn backoff(&self, attempt: usize, err: &EmbeddingError) -> Duration {
        if let Some(secs) = err.retry_after_secs() {
            return Duration::from_secs(secs);
        }
        let factor = 1u64 << attempt.min(16);
        let ms = self
            .retry_base_delay_ms
            .saturating_mul(factor)
            .min(self.retry_max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Settings for an [`EmbedderManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderManagerConfig {
    #[serde(default)]
    pub batch: BatchPolicy,

    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    10_000
}

impl Default for EmbedderManagerConfig {
    fn default() -> Self {
        Self {
            batch: BatchPolicy::default(),
            cache_enabled: default_cache_enabled(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

/// Per-run knobs for [`EmbedderManager::embed_batch_with`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Registered provider to use; the default provider when `None`.
    pub provider: Option<String>,
    pub batch_size: usize,
    pub max_concurrency: usize,
    /// Dimension the run must produce. When `None` the first successful
    /// embedding decides.
    pub expected_dimension: Option<usize>,
}

// ---------------------------------------------------------------------------
// Batch report
// ---------------------------------------------------------------------------

/// Why a document left a batch run without a vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    ProviderFailure { message: String },
    DimensionMismatch { expected: usize, actual: usize },
    EmptyEmbedding,
    /// Every component was zero, e.g. a TF-IDF vector with no known token.
    ZeroEmbedding,
    NonFiniteEmbedding,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProviderFailure { message } => write!(f, "provider failure: {}", message),
            Self::DimensionMismatch { expected, actual } => write!(
                f,
                "dimension mismatch: expected {}, got {}",
                expected, actual
            ),
            Self::EmptyEmbedding => f.write_str("provider returned an empty embedding"),
            Self::ZeroEmbedding => f.write_str("provider returned an all-zero embedding"),
            Self::NonFiniteEmbedding => {
                f.write_str("provider returned an embedding with NaN or infinite components")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub id: String,
    pub reason: SkipReason,
}

/// Result of a batch run: the embedded subset in input order plus the skips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchEmbedReport {
    pub documents: Vec<Document>,
    pub skipped: Vec<SkippedDocument>,
    /// Dimension fixed by the run (or the pre-seeded one).
    pub dimension: Option<usize>,
    pub provider: String,
}

impl BatchEmbedReport {
    pub fn embedded_count(&self) -> usize {
        self.documents.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

// ---------------------------------------------------------------------------
// Cache key
// ---------------------------------------------------------------------------

/// (provider, model, dimension, sha256(text)). The dimension is part of the
/// key so a provider whose dimension changes never serves stale vectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider: EmbeddingProviderType,
    model: String,
    dimension: usize,
    text_hash: [u8; 32],
}

impl CacheKey {
    fn new(provider: &dyn EmbeddingProvider, text: &str, dimension: usize) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self {
            provider: provider.provider_type(),
            model: provider.model().to_string(),
            dimension,
            text_hash: hasher.finalize().into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedKind {
    Documents,
    Query,
}

// ---------------------------------------------------------------------------
// EmbedderManager
// ---------------------------------------------------------------------------

/// Registry of named providers plus the embedding entry points.
///
/// Share it as `Arc<EmbedderManager>`. The registry is the only mutable state
/// besides the cache and the skip counter; it is read concurrently and written
/// only through `register_provider` / `unregister_provider`.
pub struct EmbedderManager {
    providers: RwLock<HashMap<String, Arc<dyn EmbeddingProvider>>>,
    default_provider: RwLock<Option<String>>,
    fallback_provider: RwLock<Option<String>>,
    cache: Option<Cache<CacheKey, Vec<f32>>>,
    config: EmbedderManagerConfig,
    skipped_total: AtomicUsize,
}

impl EmbedderManager {
    pub fn new(config: EmbedderManagerConfig) -> Self {
        let cache = config.cache_enabled.then(|| {
            Cache::builder()
                .max_capacity(config.cache_max_entries as u64)
                .time_to_live(CACHE_TTL)
                .build()
        });

        Self {
            providers: RwLock::new(HashMap::new()),
            default_provider: RwLock::new(None),
            fallback_provider: RwLock::new(None),
            cache,
            config,
            skipped_total: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &EmbedderManagerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Factory
    // -----------------------------------------------------------------------

    /// Build a provider from a type name (`tfidf`, `ollama`, `openai`, ...).
    /// Unknown names fail with a configuration error.
    pub fn create_provider(
        provider_type: &str,
        config: &EmbeddingProviderConfig,
    ) -> CoreResult<Arc<dyn EmbeddingProvider>> {
        let provider_type: EmbeddingProviderType = provider_type.parse()?;
        let mut config = config.clone();
        if config.provider != provider_type {
            // The model of another provider type means nothing here.
            config.provider = provider_type;
            config.model = String::new();
        }
        Self::build_provider(&config)
    }

    /// Validate `config` and build the provider it names. A blank model is
    /// replaced by the provider's default.
    pub fn build_provider(
        config: &EmbeddingProviderConfig,
    ) -> CoreResult<Arc<dyn EmbeddingProvider>> {
        let config = EmbeddingProviderConfig {
            model: config.effective_model(),
            ..config.clone()
        };
        config.validate()?;
        let provider: Arc<dyn EmbeddingProvider> = match config.provider {
            EmbeddingProviderType::TfIdf => Arc::new(TfIdfEmbeddingProvider::default()),
            EmbeddingProviderType::Ollama => Arc::new(OllamaEmbeddingProvider::new(&config)?),
            EmbeddingProviderType::OpenAI => Arc::new(OpenAIEmbeddingProvider::new(&config)?),
        };
        Ok(provider)
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    fn read_providers(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn EmbeddingProvider>>> {
        self.providers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_providers(
        &self,
    ) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn EmbeddingProvider>>> {
        self.providers.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register (or replace) a provider under `name`. The first registered
    /// provider becomes the default.
    pub fn register_provider(&self, name: impl Into<String>, provider: Arc<dyn EmbeddingProvider>) {
        let name = name.into();
        tracing::info!(
            provider = %name,
            kind = %provider.provider_type(),
            model = provider.model(),
            "registering embedding provider"
        );
        self.write_providers().insert(name.clone(), provider);

        let mut default = self.default_provider.write().unwrap_or_else(|e| e.into_inner());
        if default.is_none() {
            *default = Some(name);
        }
    }

    /// Build a provider from `config` and register it under `name`.
    pub fn register_from_config(
        &self,
        name: impl Into<String>,
        config: &EmbeddingProviderConfig,
    ) -> CoreResult<Arc<dyn EmbeddingProvider>> {
        let provider = Self::build_provider(config)?;
        self.register_provider(name, provider.clone());
        Ok(provider)
    }

    /// Remove a provider. Clears the default/fallback designation if it
    /// pointed at `name`.
    pub fn unregister_provider(&self, name: &str) -> Option<Arc<dyn EmbeddingProvider>> {
        let removed = self.write_providers().remove(name);
        if removed.is_some() {
            tracing::info!(provider = %name, "unregistered embedding provider");
            for slot in [&self.default_provider, &self.fallback_provider] {
                let mut slot = slot.write().unwrap_or_else(|e| e.into_inner());
                if slot.as_deref() == Some(name) {
                    *slot = None;
                }
            }
        }
        removed
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn EmbeddingProvider>> {
        self.read_providers().get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_providers().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_provider_name(&self) -> Option<String> {
        self.default_provider
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_default_provider(&self, name: &str) -> CoreResult<()> {
        if !self.read_providers().contains_key(name) {
            return Err(CoreError::configuration(format!(
                "unknown embedding provider '{}'",
                name
            )));
        }
        *self.default_provider.write().unwrap_or_else(|e| e.into_inner()) = Some(name.to_string());
        tracing::info!(provider = %name, "default embedding provider set");
        Ok(())
    }

    /// Name the provider `embed` falls back to when the primary fails with a
    /// retryable error. `None` disables fallback.
    pub fn set_fallback_provider(&self, name: Option<&str>) -> CoreResult<()> {
        if let Some(name) = name {
            if !self.read_providers().contains_key(name) {
                return Err(CoreError::configuration(format!(
                    "unknown fallback embedding provider '{}'",
                    name
                )));
            }
        }
        *self.fallback_provider.write().unwrap_or_else(|e| e.into_inner()) =
            name.map(str::to_string);
        Ok(())
    }

    /// Look up `name`, or the default provider when `name` is `None`.
    fn resolve(&self, name: Option<&str>) -> CoreResult<(String, Arc<dyn EmbeddingProvider>)> {
        let name = match name {
            Some(name) => name.to_string(),
            None => self.default_provider_name().ok_or_else(|| {
                CoreError::configuration("no embedding provider registered")
            })?,
        };
        let provider = self.provider(&name).ok_or_else(|| {
            CoreError::configuration(format!("unknown embedding provider '{}'", name))
        })?;
        tracing::debug!(provider = %name, model = provider.model(), "selected embedding provider");
        Ok((name, provider))
    }

    fn fallback_for(&self, primary: &str) -> Option<(String, Arc<dyn EmbeddingProvider>)> {
        let name = self
            .fallback_provider
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .filter(|name| name != primary)?;
        let provider = self.provider(&name)?;
        Some((name, provider))
    }

    // -----------------------------------------------------------------------
    // Single-shot embedding
    // -----------------------------------------------------------------------

    /// Embed `texts` as documents. Failures are reported in
    /// `EmbeddingResult::error`, never raised.
    pub async fn embed(&self, texts: &[&str], provider_name: Option<&str>) -> EmbeddingResult {
        self.embed_with_fallback(texts, provider_name, EmbedKind::Documents)
            .await
    }

    /// Embed a search query. Providers that distinguish query embeddings
    /// (TF-IDF) use their query path here.
    pub async fn embed_query(&self, query: &str, provider_name: Option<&str>) -> EmbeddingResult {
        self.embed_with_fallback(&[query], provider_name, EmbedKind::Query)
            .await
    }

    async fn embed_with_fallback(
        &self,
        texts: &[&str],
        provider_name: Option<&str>,
        kind: EmbedKind,
    ) -> EmbeddingResult {
        let (name, provider) = match self.resolve(provider_name) {
            Ok(found) => found,
            Err(err) => return EmbeddingResult::failure(err.to_string(), ProviderInfo::new()),
        };

        let err = match self.embed_texts(provider.as_ref(), texts, kind).await {
            Ok(vectors) => return EmbeddingResult::success(widen(vectors), provider.provider_info()),
            Err(err) => err,
        };

        if !err.is_retryable() {
            return EmbeddingResult::failure(err.to_string(), provider.provider_info());
        }
        let Some((fallback_name, fallback)) = self.fallback_for(&name) else {
            return EmbeddingResult::failure(err.to_string(), provider.provider_info());
        };

        tracing::warn!(
            provider = %name,
            fallback = %fallback_name,
            error = %err,
            "primary embedding provider failed, trying fallback"
        );
        match self.embed_texts(fallback.as_ref(), texts, kind).await {
            Ok(vectors) => EmbeddingResult::success(widen(vectors), fallback.provider_info()),
            Err(fallback_err) => EmbeddingResult::failure(
                format!("{}; fallback '{}': {}", err, fallback_name, fallback_err),
                fallback.provider_info(),
            ),
        }
    }

    /// Cache lookup, then chunked provider calls for the misses. Order is
    /// preserved.
    async fn embed_texts(
        &self,
        provider: &dyn EmbeddingProvider,
        texts: &[&str],
        kind: EmbedKind,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        let mut slots: Vec<Option<Vec<f32>>> =
            texts.iter().map(|text| self.cache_get(provider, text)).collect();
        let misses: Vec<usize> = (0..texts.len()).filter(|&i| slots[i].is_none()).collect();
        let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i]).collect();

        let mut fresh: Vec<Vec<f32>> = Vec::with_capacity(miss_texts.len());
        match kind {
            EmbedKind::Documents => {
                if !miss_texts.is_empty() {
                    provider.prepare(&miss_texts);
                }
                for chunk in miss_texts.chunks(provider.max_batch_size().max(1)) {
                    let vectors = self
                        .call_with_retry(provider, None, move || provider.embed_documents(chunk))
                        .await?;
                    fresh.extend(expect_count(vectors, chunk.len())?);
                }
            }
            EmbedKind::Query => {
                for &text in &miss_texts {
                    let vector = self
                        .call_with_retry(provider, None, move || provider.embed_query(text))
                        .await?;
                    fresh.push(vector);
                }
            }
        }

        for (&i, vector) in misses.iter().zip(fresh) {
            self.cache_put(provider, texts[i], &vector);
            slots[i] = Some(vector);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    // -----------------------------------------------------------------------
    // Batch embedding
    // -----------------------------------------------------------------------

    /// Embed `documents` with the default provider. Returns the successfully
    /// embedded subset; failures are recorded as skips and never abort the
    /// run.
    pub async fn embed_batch(
        &self,
        documents: Vec<Document>,
        batch_size: usize,
        max_concurrency: usize,
    ) -> CoreResult<BatchEmbedReport> {
        self.embed_batch_with(
            documents,
            &BatchOptions {
                batch_size,
                max_concurrency,
                ..BatchOptions::default()
            },
        )
        .await
    }

    /// Like [`embed_batch`](Self::embed_batch), with the configured policy
    /// and a pre-seeded dimension.
    pub async fn embed_batch_with_dimension(
        &self,
        documents: Vec<Document>,
        expected_dimension: Option<usize>,
    ) -> CoreResult<BatchEmbedReport> {
        self.embed_batch_with(
            documents,
            &BatchOptions {
                provider: None,
                batch_size: self.config.batch.batch_size,
                max_concurrency: self.config.batch.max_concurrent_requests,
                expected_dimension,
            },
        )
        .await
    }

    pub async fn embed_batch_with(
        &self,
        documents: Vec<Document>,
        options: &BatchOptions,
    ) -> CoreResult<BatchEmbedReport> {
        if options.batch_size == 0 {
            return Err(CoreError::configuration("batch size must be at least 1"));
        }
        if options.max_concurrency == 0 {
            return Err(CoreError::configuration("max concurrency must be at least 1"));
        }
        let (provider_name, provider) = self.resolve(options.provider.as_deref())?;
        if documents.is_empty() {
            return Ok(BatchEmbedReport {
                dimension: options.expected_dimension,
                provider: provider_name,
                ..BatchEmbedReport::default()
            });
        }

        let batch_size = options.batch_size.min(provider.max_batch_size().max(1));
        let limiter = Semaphore::new(options.max_concurrency);
        tracing::info!(
            provider = %provider_name,
            documents = documents.len(),
            batch_size,
            max_concurrency = options.max_concurrency,
            "starting batch embedding"
        );

        let outcomes: Vec<ProviderResult<Vec<f32>>> = {
            let texts: Vec<&str> = documents.iter().map(|d| d.text.as_str()).collect();
            provider.prepare(&texts);
            let chunks = texts
                .chunks(batch_size)
                .enumerate()
                .map(|(index, chunk)| self.embed_chunk(provider.as_ref(), index, chunk, &limiter));
            join_all(chunks).await.into_iter().flatten().collect()
        };

        let mut report = BatchEmbedReport {
            dimension: options.expected_dimension,
            provider: provider_name,
            ..BatchEmbedReport::default()
        };
        for (mut document, outcome) in documents.into_iter().zip(outcomes) {
            let reason = match outcome {
                Ok(vector) if vector.is_empty() => SkipReason::EmptyEmbedding,
                Ok(vector) => match vector_defect(&vector) {
                    Some(VectorDefect::ZeroNorm) => SkipReason::ZeroEmbedding,
                    Some(VectorDefect::NonFinite) => SkipReason::NonFiniteEmbedding,
                    None => {
                        let expected = *report.dimension.get_or_insert(vector.len());
                        if vector.len() == expected {
                            document.vector = Some(widen_one(vector));
                            report.documents.push(document);
                            continue;
                        }
                        SkipReason::DimensionMismatch {
                            expected,
                            actual: vector.len(),
                        }
                    }
                },
                Err(err) => SkipReason::ProviderFailure {
                    message: err.to_string(),
                },
            };
            tracing::warn!(document = %document.id, reason = %reason, "skipping document");
            report.skipped.push(SkippedDocument {
                id: document.id,
                reason,
            });
        }

        self.skipped_total
            .fetch_add(report.skipped.len(), Ordering::Relaxed);
        tracing::info!(
            provider = %report.provider,
            embedded = report.documents.len(),
            skipped = report.skipped.len(),
            dimension = ?report.dimension,
            "batch embedding finished"
        );
        Ok(report)
    }

    /// One chunk of a batch run: a single provider call for the cache misses,
    /// degrading to per-document calls if that call fails.
    async fn embed_chunk(
        &self,
        provider: &dyn EmbeddingProvider,
        index: usize,
        texts: &[&str],
        limiter: &Semaphore,
    ) -> Vec<ProviderResult<Vec<f32>>> {
        let mut slots: Vec<Option<ProviderResult<Vec<f32>>>> = texts
            .iter()
            .map(|text| self.cache_get(provider, text).map(Ok))
            .collect();
        let misses: Vec<usize> = (0..texts.len()).filter(|&i| slots[i].is_none()).collect();
        let miss_texts: Vec<&str> = misses.iter().map(|&i| texts[i]).collect();

        if !miss_texts.is_empty() {
            let miss_slice = miss_texts.as_slice();
            let whole = self
                .call_with_retry(provider, Some(limiter), move || {
                    provider.embed_documents(miss_slice)
                })
                .await
                .and_then(|vectors| expect_count(vectors, miss_slice.len()));

            let fresh: Vec<ProviderResult<Vec<f32>>> = match whole {
                Ok(vectors) => vectors.into_iter().map(Ok).collect(),
                Err(err) => {
                    tracing::warn!(
                        batch = index,
                        size = miss_slice.len(),
                        error = %err,
                        "batch call failed, retrying documents individually"
                    );
                    let singles = miss_slice.iter().map(|text| async move {
                        let single = std::slice::from_ref(text);
                        self.call_with_retry(provider, Some(limiter), move || {
                            provider.embed_documents(single)
                        })
                        .await
                        .and_then(|vectors| expect_count(vectors, 1))
                        .map(|mut vectors| vectors.remove(0))
                    });
                    join_all(singles).await
                }
            };

            for (&i, outcome) in misses.iter().zip(fresh) {
                if let Ok(vector) = &outcome {
                    self.cache_put(provider, texts[i], vector);
                }
                slots[i] = Some(outcome);
            }
        }

        let outcomes: Vec<ProviderResult<Vec<f32>>> = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(EmbeddingError::Other {
                        message: "no embedding produced".to_string(),
                    })
                })
            })
            .collect();
        let failed = outcomes.iter().filter(|o| o.is_err()).count();
        if failed == 0 {
            tracing::info!(batch = index, succeeded = outcomes.len(), failed, "batch embedded");
        } else {
            tracing::warn!(
                batch = index,
                succeeded = outcomes.len() - failed,
                failed,
                "batch embedded with failures"
            );
        }
        outcomes
    }

    /// Run `call` with the retry policy. Each attempt holds a limiter permit
    /// (when given) and is bounded by the request timeout; permits are
    /// released while backing off.
    async fn call_with_retry<T, F, Fut>(
        &self,
        provider: &dyn EmbeddingProvider,
        limiter: Option<&Semaphore>,
        mut call: F,
    ) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let policy = &self.config.batch;
        let max_attempts = policy.max_attempts.max(1);
        let timeout = policy.request_timeout();
        let mut last_err: Option<EmbeddingError> = None;

        for attempt in 0..max_attempts {
            let result = {
                let _permit = match limiter {
                    Some(limiter) => Some(limiter.acquire().await.map_err(|_| {
                        EmbeddingError::Other {
                            message: "embedding limiter closed".to_string(),
                        }
                    })?),
                    None => None,
                };
                match tokio::time::timeout(timeout, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(EmbeddingError::Timeout {
                        seconds: timeout.as_secs(),
                    }),
                }
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempt + 1 < max_attempts {
                let wait = policy.backoff(attempt, &err);
                tracing::warn!(
                    provider = provider.display_name(),
                    attempt = attempt + 1,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "retryable embedding error, backing off"
                );
                tokio::time::sleep(wait).await;
            }
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| EmbeddingError::Other {
            message: "retry attempts exhausted".to_string(),
        }))
    }

    // -----------------------------------------------------------------------
    // Blocking wrappers
    // -----------------------------------------------------------------------

    pub fn embed_blocking(
        &self,
        texts: &[&str],
        provider_name: Option<&str>,
    ) -> CoreResult<EmbeddingResult> {
        block_on(self.embed(texts, provider_name))
    }

    pub fn embed_query_blocking(
        &self,
        query: &str,
        provider_name: Option<&str>,
    ) -> CoreResult<EmbeddingResult> {
        block_on(self.embed_query(query, provider_name))
    }

    pub fn embed_batch_blocking(
        &self,
        documents: Vec<Document>,
        batch_size: usize,
        max_concurrency: usize,
    ) -> CoreResult<BatchEmbedReport> {
        block_on(self.embed_batch(documents, batch_size, max_concurrency))?
    }

    // -----------------------------------------------------------------------
    // Health and counters
    // -----------------------------------------------------------------------

    pub async fn health_check(&self, provider_name: Option<&str>) -> CoreResult<()> {
        let (name, provider) = self.resolve(provider_name)?;
        provider.health_check().await.map_err(|err| {
            tracing::warn!(provider = %name, error = %err, "embedding provider unhealthy");
            CoreError::from(err)
        })
    }

    /// Documents skipped across all batch runs of this manager.
    pub fn skipped_total(&self) -> usize {
        self.skipped_total.load(Ordering::Relaxed)
    }

    pub fn cache_entry_count(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| {
            cache.sync();
            cache.entry_count()
        })
    }

    pub fn cache_invalidate_all(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate_all();
            cache.sync();
        }
    }

    // -----------------------------------------------------------------------
    // Cache
    // -----------------------------------------------------------------------

    // A TF-IDF vocabulary can be refitted without changing its dimension, so
    // its vectors are never cached.
    fn cacheable(provider: &dyn EmbeddingProvider) -> bool {
        provider.provider_type() != EmbeddingProviderType::TfIdf
    }

    fn cache_get(&self, provider: &dyn EmbeddingProvider, text: &str) -> Option<Vec<f32>> {
        let cache = self.cache.as_ref().filter(|_| Self::cacheable(provider))?;
        let expected = provider.dimension();
        let cached = cache.get(&CacheKey::new(provider, text, expected))?;
        if expected > 0 && cached.len() != expected {
            tracing::warn!(
                cached_dim = cached.len(),
                expected_dim = expected,
                "embedding cache hit rejected: dimension mismatch"
            );
            return None;
        }
        Some(cached)
    }

    fn cache_put(&self, provider: &dyn EmbeddingProvider, text: &str, vector: &[f32]) {
        if let Some(cache) = self.cache.as_ref().filter(|_| Self::cacheable(provider)) {
            cache.insert(CacheKey::new(provider, text, vector.len()), vector.to_vec());
        }
    }
}

fn expect_count(vectors: Vec<Vec<f32>>, expected: usize) -> ProviderResult<Vec<Vec<f32>>> {
    if vectors.len() == expected {
        Ok(vectors)
    } else {
        Err(EmbeddingError::ParseError {
            message: format!("expected {} embeddings, provider returned {}", expected, vectors.len()),
        })
    }
}

fn widen_one(vector: Vec<f32>) -> Vec<f64> {
    vector.into_iter().map(f64::from).collect()
}

fn widen(vectors: Vec<Vec<f32>>) -> Vec<Vec<f64>> {
    vectors.into_iter().map(widen_one).collect()
}

// Compile-time assertion that EmbedderManager is Send + Sync.
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn assert_embedder_manager() {
        assert_send_sync::<EmbedderManager>();
    }
};

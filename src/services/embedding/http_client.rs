//! HTTP Client Factory
//!
//! Builds the `reqwest::Client` used by HTTP-backed embedding providers.

use std::time::Duration;

use doc_retrieval_core::ProxyConfig;

use super::provider::{EmbeddingError, ProviderResult};

/// Transport-level timeout. The manager applies its own per-call deadline on
/// top of this.
const HTTP_TIMEOUT_SECS: u64 = 60;

/// Build a `reqwest::Client` with the resolved proxy configuration.
///
/// - `Some(proxy)` -> route all requests through the proxy
/// - `None` -> disable proxies, ignoring `HTTP(S)_PROXY` env vars
pub fn build_http_client(proxy: Option<&ProxyConfig>) -> ProviderResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(HTTP_TIMEOUT_SECS));
    match proxy {
        Some(cfg) => {
            let mut p = reqwest::Proxy::all(cfg.url()).map_err(|e| EmbeddingError::InvalidConfig {
                message: format!("invalid proxy {}: {}", cfg.url(), e),
            })?;
            if let Some(user) = &cfg.username {
                p = p.basic_auth(user, cfg.password.as_deref().unwrap_or_default());
            }
            builder = builder.proxy(p);
        }
        None => {
            builder = builder.no_proxy();
        }
    }
    builder.build().map_err(|e| EmbeddingError::InvalidConfig {
        message: format!("failed to build HTTP client: {}", e),
    })
}

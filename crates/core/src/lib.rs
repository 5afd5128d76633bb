//! Doc Retrieval Core
//!
//! Foundational types for the document retrieval workspace. This crate has no
//! dependency on embedding providers, the vector index, or any async runtime.
//!
//! ## Module Organization
//!
//! - `error` - Error taxonomy shared by every service (`CoreError`, `CoreResult`)
//! - `proxy` - Proxy configuration data types for HTTP-backed providers

pub mod error;
pub mod proxy;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Proxy Types ────────────────────────────────────────────────────────
pub use proxy::{ProxyConfig, ProxyProtocol};

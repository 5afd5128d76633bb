//! Utilities
//!
//! Path resolution and the blocking bridge used by the sync entry points.

pub mod paths;
pub mod runtime;

pub use paths::*;
pub use runtime::block_on;

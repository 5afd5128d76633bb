//! Blocking Bridge
//!
//! Drives an async operation to completion from synchronous code. The async
//! implementation stays the only implementation; blocking entry points are
//! thin wrappers over it.

use std::future::Future;

use tokio::runtime::{Builder, Handle, RuntimeFlavor};

use doc_retrieval_core::{CoreError, CoreResult};

/// Run `future` to completion on the current thread.
///
/// - Inside a multi-thread runtime: `block_in_place` + the ambient handle.
/// - Outside any runtime: a private current-thread runtime.
/// - Inside a current-thread runtime: blocking would deadlock, so this fails
///   with a configuration error.
pub fn block_on<F: Future>(future: F) -> CoreResult<F::Output> {
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::MultiThread => {
                Ok(tokio::task::block_in_place(|| handle.block_on(future)))
            }
            _ => Err(CoreError::configuration(
                "blocking call made from a current-thread runtime; use the async API instead",
            )),
        },
        Err(_) => {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            Ok(runtime.block_on(future))
        }
    }
}

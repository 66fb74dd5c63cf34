//! # retry
//!
//! why: transaction conflicts are expected and retried a bounded number of times
//! relations: used by worker.rs for marker writes and workload.rs for key batches
//! what: retry_retryable helper

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::SnapError;

/// Run `op` until it succeeds, fails with a non-retryable error, or `attempts` run out
pub async fn retry_retryable<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> Result<T, SnapError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SnapError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < attempts => {
                debug!(attempt, error = %e, "retrying");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

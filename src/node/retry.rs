//! Retry loops around the compute phase
//!
//! Every failure except the last is logged and retried after the policy's
//! wait; the last one goes to the fallback.

use std::future::Future;

use crate::config::RetryPolicy;
use crate::error::{FlowError, Result};

/// Blocking retry loop used by synchronous nodes
pub(crate) fn run_blocking<T, F, G>(
    policy: &RetryPolicy,
    node: &str,
    mut op: F,
    fallback: G,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
    G: FnOnce(FlowError) -> Result<T>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op() {
            Ok(output) => return Ok(output),
            Err(err) if !policy.should_retry(attempt) => {
                tracing::warn!(node, attempts, error = %err, "compute failed on final attempt");
                return fallback(err);
            }
            Err(err) => {
                tracing::warn!(node, attempt, attempts, error = %err, "compute failed, retrying");
                if !policy.wait.is_zero() {
                    std::thread::sleep(policy.wait);
                }
                attempt += 1;
            }
        }
    }
}

/// Cooperative retry loop used by async nodes; the wait suspends instead of blocking
pub(crate) async fn run_async<T, F, Fut, G, GFut>(
    policy: &RetryPolicy,
    node: &str,
    mut op: F,
    fallback: G,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    G: FnOnce(FlowError) -> GFut,
    GFut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(output) => return Ok(output),
            Err(err) if !policy.should_retry(attempt) => {
                tracing::warn!(node, attempts, error = %err, "compute failed on final attempt");
                return fallback(err).await;
            }
            Err(err) => {
                tracing::warn!(node, attempt, attempts, error = %err, "compute failed, retrying");
                drop(err);
                if !policy.wait.is_zero() {
                    tokio::time::sleep(policy.wait).await;
                }
                attempt += 1;
            }
        }
    }
}

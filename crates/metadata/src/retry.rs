//! Bounded retry for serializable transactions.

use crate::error::{MetadataError, MetadataResult};
use silo_core::RetryConfig;
use std::future::Future;

/// Run a serializable transaction, retrying on serialization conflicts with
/// bounded exponential backoff.
///
/// The closure must build a fresh transaction on every call; a conflicted
/// transaction is already rolled back by the time it returns. Non-conflict
/// errors propagate immediately. When attempts run out, the last conflict is
/// wrapped in [`MetadataError::ExhaustedRetries`] so callers can tell load
/// shedding from protocol bugs.
pub(crate) async fn with_serializable_retry<T, F, Fut>(
    policy: &RetryConfig,
    operation: &'static str,
    mut run: F,
) -> MetadataResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MetadataResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match run().await {
            Err(err) if err.is_serialization_conflict() => {
                if attempt >= policy.max_attempts.max(1) {
                    return Err(MetadataError::ExhaustedRetries {
                        operation,
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                let delay = policy.delay_for(attempt);
                tracing::debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "serialization conflict, retrying transaction"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

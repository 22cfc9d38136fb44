//! Bounded retry without backoff.

use std::future::Future;

use crate::errors::WinprepResult;

/// Run `op` until it returns `Ok` or `max_attempts` attempts have been made.
///
/// Returns the first success, or the error from the final attempt. Attempts
/// are issued back to back; there is no delay between them.
pub async fn retry_bounded<T, F, Fut>(max_attempts: usize, mut op: F) -> WinprepResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = WinprepResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                tracing::debug!(attempt, max_attempts, error = %e, "Attempt failed, retrying");
                attempt += 1;
            }
        }
    }
}

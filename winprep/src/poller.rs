//! Bounded-interval polling.
//!
//! Each tick sleeps for the interval first, then evaluates the predicate:
//!
//! ```text
//! sleep(interval) → predicate()
//!   Ok(true)  → done
//!   Ok(false) → next tick
//!   Err(e)    → stop, return e
//! ```
//!
//! The loop is bounded by a hard deadline and by the session's cancellation
//! token; both are checked while sleeping, never while a predicate is running.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{WinprepError, WinprepResult};

pub struct IntervalPoller {
    interval: Duration,
    token: CancellationToken,
}

impl IntervalPoller {
    pub fn new(interval: Duration, token: CancellationToken) -> Self {
        Self { interval, token }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Invoke `predicate` every interval until it reports completion.
    ///
    /// Fails with [`WinprepError::Timeout`] once `timeout` has elapsed,
    /// [`WinprepError::Interrupted`] when cancelled, or with the predicate's
    /// own error.
    pub async fn poll<F, Fut>(&self, timeout: Duration, mut predicate: F) -> WinprepResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WinprepResult<bool>>,
    {
        let deadline = Instant::now() + timeout;
        let mut tick: u64 = 0;

        loop {
            let wake = Instant::now() + self.interval;
            if wake > deadline {
                return Err(WinprepError::Timeout(format!(
                    "condition not met within {}s",
                    timeout.as_secs()
                )));
            }

            tokio::select! {
                _ = self.token.cancelled() => return Err(WinprepError::Interrupted),
                _ = tokio::time::sleep_until(wake) => {}
            }

            tick += 1;
            if predicate().await? {
                tracing::debug!(tick, "Poll condition met");
                return Ok(());
            }
            tracing::trace!(tick, "Poll condition not met yet");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_true() {
        let poller = IntervalPoller::new(Duration::from_secs(10), CancellationToken::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        poller
            .poll(Duration::from_secs(600), || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(n == 3) }
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Sleeps before every tick, including the first
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_error_stops_polling() {
        let poller = IntervalPoller::new(Duration::from_secs(10), CancellationToken::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let err = poller
            .poll(Duration::from_secs(600), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(WinprepError::Transport("unable to abort reboot".into())) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("unable to abort reboot"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let poller = IntervalPoller::new(Duration::from_secs(10), CancellationToken::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let err = poller
            .poll(Duration::from_secs(35), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(false) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, WinprepError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_sleeping() {
        let token = CancellationToken::new();
        let poller = IntervalPoller::new(Duration::from_secs(10), token.clone());
        token.cancel();

        let err = poller
            .poll(Duration::from_secs(600), || async { Ok(true) })
            .await
            .unwrap_err();

        assert!(err.is_interrupted());
    }
}

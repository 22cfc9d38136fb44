//! Reboot completion detection by trial-reboot-and-abort.
//!
//! A reachable guest says nothing about whether it has already rebooted. We
//! find out by asking it to schedule a new reboot and cancelling it at once:
//!
//! ```text
//! schedule trial reboot ─┬─ call failed ──────────→ not finished (guest is down)
//!                        ├─ exit != 0 ────────────→ not finished (shutdown pending)
//!                        └─ exit == 0 → abort ×≤5 ─┬─ every attempt failed → error
//!                                                  ├─ exit != 0 ─────────→ error
//!                                                  └─ exit == 0 ─────────→ finished
//! ```
//!
//! Every trial reboot scheduled by a tick is aborted within the same tick.

use std::sync::Arc;
use std::time::Duration;

use crate::errors::{WinprepError, WinprepResult};
use crate::poller::IntervalPoller;
use crate::util::retry_bounded;

use super::RemoteManager;

pub const TRIAL_REBOOT_COMMAND: &str = r#"shutdown /r /f /t 60 /c "packer restart test""#;
pub const ABORT_REBOOT_COMMAND: &str = "shutdown /a";
pub const ABORT_RETRY_LIMIT: usize = 5;
pub const REBOOT_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct RebootChecker {
    remote: Arc<dyn RemoteManager>,
}

impl RebootChecker {
    pub fn new(remote: Arc<dyn RemoteManager>) -> Self {
        Self { remote }
    }

    /// One poll tick: `Ok(true)` once the guest has come back from reboot.
    pub async fn reboot_has_finished(&self) -> WinprepResult<bool> {
        let exit_code = match self.remote.execute_command(TRIAL_REBOOT_COMMAND).await {
            Ok(code) => code,
            Err(e) => {
                tracing::debug!("Guest not answering, reboot still in progress: {}", e);
                return Ok(false);
            }
        };

        if exit_code != 0 {
            tracing::debug!(exit_code, "Trial reboot refused, reboot still in progress");
            return Ok(false);
        }

        let abort_exit_code = retry_bounded(ABORT_RETRY_LIMIT, |attempt| {
            let remote = self.remote.clone();
            async move {
                tracing::debug!(attempt, "Aborting trial reboot");
                remote.execute_command(ABORT_REBOOT_COMMAND).await
            }
        })
        .await
        .map_err(|e| e.context("unable to abort reboot"))?;

        if abort_exit_code != 0 {
            return Err(WinprepError::RemoteCommand {
                command: ABORT_REBOOT_COMMAND.to_string(),
                exit_code: abort_exit_code,
            }
            .context("unable to abort reboot"));
        }

        Ok(true)
    }
}

/// Polls a [`RebootChecker`] until the guest is back or the deadline passes.
pub struct RebootWaiter {
    poller: IntervalPoller,
    checker: RebootChecker,
    timeout: Duration,
}

impl RebootWaiter {
    pub fn new(poller: IntervalPoller, checker: RebootChecker, timeout: Duration) -> Self {
        Self {
            poller,
            checker,
            timeout,
        }
    }

    pub async fn wait_for_reboot_finished(&self) -> WinprepResult<()> {
        tracing::info!(
            interval_secs = self.poller.interval().as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Waiting for guest reboot to finish"
        );
        self.poller
            .poll(self.timeout, || self.checker.reboot_has_finished())
            .await
            .map_err(|e| e.context("error polling for reboot"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, Reply};
    use tokio_util::sync::CancellationToken;

    fn checker(remote: &Arc<FakeRemote>) -> RebootChecker {
        RebootChecker::new(remote.clone())
    }

    #[tokio::test]
    async fn test_trial_call_error_means_not_finished() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Fail("connection refused")]);

        assert!(!checker(&remote).reboot_has_finished().await.unwrap());
        assert_eq!(remote.count(ABORT_REBOOT_COMMAND), 0);
    }

    #[tokio::test]
    async fn test_trial_nonzero_means_not_finished() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Exit(1190)]);

        assert!(!checker(&remote).reboot_has_finished().await.unwrap());
        assert_eq!(remote.count(ABORT_REBOOT_COMMAND), 0);
    }

    #[tokio::test]
    async fn test_abort_succeeds_first_try() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Exit(0)]);
        remote.script(ABORT_REBOOT_COMMAND, vec![Reply::Exit(0)]);

        assert!(checker(&remote).reboot_has_finished().await.unwrap());
        assert_eq!(remote.count(ABORT_REBOOT_COMMAND), 1);
    }

    #[tokio::test]
    async fn test_abort_recovers_from_transient_failures() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Exit(0)]);
        remote.script(
            ABORT_REBOOT_COMMAND,
            vec![Reply::Fail("timeout"), Reply::Fail("timeout"), Reply::Exit(0)],
        );

        assert!(checker(&remote).reboot_has_finished().await.unwrap());
        assert_eq!(remote.count(ABORT_REBOOT_COMMAND), 3);
    }

    #[tokio::test]
    async fn test_abort_failing_every_attempt_is_hard_error() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Exit(0)]);
        remote.script(ABORT_REBOOT_COMMAND, vec![Reply::Fail("connection reset")]);

        let err = checker(&remote).reboot_has_finished().await.unwrap_err();
        assert!(err.to_string().contains("unable to abort"));
        assert_eq!(remote.count(ABORT_REBOOT_COMMAND), ABORT_RETRY_LIMIT);
    }

    #[tokio::test]
    async fn test_abort_nonzero_is_hard_error() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Exit(0)]);
        remote.script(ABORT_REBOOT_COMMAND, vec![Reply::Exit(1116)]);

        let err = checker(&remote).reboot_has_finished().await.unwrap_err();
        assert!(err.to_string().contains("unable to abort"));
        assert_eq!(remote.count(ABORT_REBOOT_COMMAND), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_polls_until_guest_returns() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(
            TRIAL_REBOOT_COMMAND,
            vec![Reply::Fail("unreachable"), Reply::Exit(1190), Reply::Exit(0)],
        );
        remote.script(ABORT_REBOOT_COMMAND, vec![Reply::Exit(0)]);

        let waiter = RebootWaiter::new(
            IntervalPoller::new(REBOOT_POLL_INTERVAL, CancellationToken::new()),
            checker(&remote),
            Duration::from_secs(3600),
        );
        waiter.wait_for_reboot_finished().await.unwrap();

        assert_eq!(remote.count(TRIAL_REBOOT_COMMAND), 3);
        assert_eq!(remote.count(ABORT_REBOOT_COMMAND), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wraps_errors() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Exit(1190)]);

        let waiter = RebootWaiter::new(
            IntervalPoller::new(REBOOT_POLL_INTERVAL, CancellationToken::new()),
            checker(&remote),
            Duration::from_secs(60),
        );
        let err = waiter.wait_for_reboot_finished().await.unwrap_err();

        assert!(err.to_string().starts_with("error polling for reboot"));
        assert!(matches!(err.root_cause(), WinprepError::Timeout(_)));
    }
}

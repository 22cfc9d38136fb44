//! Remote execution on the guest.
//!
//! [`RemoteManager`] is the steady-state channel used once the guest's
//! remote-execution daemon is listening. Exit codes and transport faults are
//! kept apart: `Ok(code)` means the command ran (whatever it returned), `Err`
//! means we could not find out.

mod reboot;
pub mod soap;
mod winrm;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::WinprepResult;

pub use reboot::{
    ABORT_REBOOT_COMMAND, ABORT_RETRY_LIMIT, REBOOT_POLL_INTERVAL, RebootChecker, RebootWaiter,
    TRIAL_REBOOT_COMMAND,
};
pub use winrm::{WINRM_PORT, WinRmRemoteManager};

#[async_trait]
pub trait RemoteManager: Send + Sync {
    /// Copy a local file to `destination` on the guest.
    async fn upload_artifact(&self, source: &Path, destination: &str) -> WinprepResult<()>;

    /// Expand an archive already on the guest into `destination`.
    async fn extract_archive(&self, source: &str, destination: &str) -> WinprepResult<()>;

    /// Run `command` to completion and return its exit code.
    async fn execute_command(&self, command: &str) -> WinprepResult<i32>;

    /// As [`execute_command`](Self::execute_command), failing with
    /// `Timeout` once `timeout` elapses.
    async fn execute_command_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> WinprepResult<i32>;

    /// Is the remote-execution port accepting connections?
    async fn can_reach_vm(&self) -> WinprepResult<()>;

    /// Are the credentials accepted?
    async fn can_login_vm(&self) -> WinprepResult<()>;
}

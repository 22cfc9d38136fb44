//! Types shared by the construct pipeline.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::messenger::ConstructMessenger;
use super::validator::VmConnectionValidator;
use crate::enabler::WinRmEnabler;
use crate::guest::GuestManager;
use crate::remote::RemoteManager;

pub const PROVISION_DIR: &str = r"C:\provision\";

/// One ordered step of VM preparation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    ValidateConnection,
    CreateProvisionDir,
    UploadArtifacts,
    ExtractArchive,
    EnableRemoteExec,
    ExecuteSetupScript,
    WaitForReboot,
    ExecutePostRebootScript,
}

impl Phase {
    pub const ALL: [Phase; 8] = [
        Phase::ValidateConnection,
        Phase::CreateProvisionDir,
        Phase::UploadArtifacts,
        Phase::ExtractArchive,
        Phase::EnableRemoteExec,
        Phase::ExecuteSetupScript,
        Phase::WaitForReboot,
        Phase::ExecutePostRebootScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::ValidateConnection => "validate_connection",
            Phase::CreateProvisionDir => "create_provision_dir",
            Phase::UploadArtifacts => "upload_artifacts",
            Phase::ExtractArchive => "extract_archive",
            Phase::EnableRemoteExec => "enable_remote_exec",
            Phase::ExecuteSetupScript => "execute_setup_script",
            Phase::WaitForReboot => "wait_for_reboot",
            Phase::ExecutePostRebootScript => "execute_post_reboot_script",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local file and where it goes on the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Shown in progress messages.
    pub label: String,
    pub local_path: PathBuf,
    pub remote_path: String,
}

/// Everything one `prepare_vm` run needs to know about the guest.
#[derive(Debug, Clone)]
pub struct ProvisionSession {
    pub guest_address: String,
    pub username: String,
    pub artifacts: Vec<Artifact>,
    /// Archive on the guest to expand into `provision_dir`.
    pub archive: String,
    pub provision_dir: String,
    pub setup_command: String,
    pub post_reboot_command: String,
}

/// Fixed delays and deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ConstructTimings {
    /// Sleep after the setup script before the first reboot check.
    pub reboot_grace: Duration,
    pub reboot_poll_interval: Duration,
    pub reboot_timeout: Duration,
    pub post_reboot_timeout: Duration,
    /// Power-state checks after the post-reboot script.
    pub shutdown_poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ConstructTimings {
    fn default() -> Self {
        Self {
            reboot_grace: Duration::from_secs(60),
            reboot_poll_interval: crate::remote::REBOOT_POLL_INTERVAL,
            reboot_timeout: Duration::from_secs(60 * 60),
            post_reboot_timeout: Duration::from_secs(24 * 60 * 60),
            shutdown_poll_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Collaborators and state shared by all construct tasks.
pub struct ConstructContext {
    pub session: ProvisionSession,
    pub remote: Arc<dyn RemoteManager>,
    pub guest: Arc<dyn GuestManager>,
    pub enabler: Arc<dyn WinRmEnabler>,
    pub validator: VmConnectionValidator,
    pub messenger: Arc<dyn ConstructMessenger>,
    pub timings: ConstructTimings,
    pub token: CancellationToken,
}

pub type ConstructCtx = Arc<ConstructContext>;

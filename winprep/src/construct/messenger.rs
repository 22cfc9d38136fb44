//! Progress reporting for `construct`.
//!
//! Every phase has its own no-argument started and succeeded notification.
//! The orchestrator reaches them through `phase_started` / `phase_succeeded`,
//! which dispatch on [`Phase`]. The remaining notifications report sub-steps
//! and non-fatal problems. Implementations must return promptly.

use std::io::Write;

use parking_lot::Mutex;

use super::types::Phase;

pub trait ConstructMessenger: Send + Sync {
    fn validate_connection_started(&self);
    fn validate_connection_succeeded(&self);
    fn create_provision_dir_started(&self);
    fn create_provision_dir_succeeded(&self);
    fn upload_artifacts_started(&self);
    fn upload_artifacts_succeeded(&self);
    fn extract_archive_started(&self);
    fn extract_archive_succeeded(&self);
    fn enable_remote_exec_started(&self);
    fn enable_remote_exec_succeeded(&self);
    fn execute_setup_script_started(&self);
    fn execute_setup_script_succeeded(&self);
    fn wait_for_reboot_started(&self);
    fn wait_for_reboot_succeeded(&self);
    fn execute_post_reboot_script_started(&self);
    fn execute_post_reboot_script_succeeded(&self);

    fn upload_file_started(&self, artifact: &str);
    fn upload_file_succeeded(&self);

    fn winrm_disconnected_for_reboot(&self);
    fn reboot_has_started(&self);
    fn reboot_has_finished(&self);

    fn execute_post_reboot_warning(&self, warning: &str);

    /// One power-state check after the post-reboot script.
    fn restart_in_progress(&self);
    fn shutdown_completed(&self);

    fn os_version_file_creation_failed(&self, message: &str);
    fn exit_code_retrieval_failed(&self, message: &str);
    fn download_file_failed(&self, message: &str);

    fn phase_started(&self, phase: Phase) {
        match phase {
            Phase::ValidateConnection => self.validate_connection_started(),
            Phase::CreateProvisionDir => self.create_provision_dir_started(),
            Phase::UploadArtifacts => self.upload_artifacts_started(),
            Phase::ExtractArchive => self.extract_archive_started(),
            Phase::EnableRemoteExec => self.enable_remote_exec_started(),
            Phase::ExecuteSetupScript => self.execute_setup_script_started(),
            Phase::WaitForReboot => self.wait_for_reboot_started(),
            Phase::ExecutePostRebootScript => self.execute_post_reboot_script_started(),
        }
    }

    fn phase_succeeded(&self, phase: Phase) {
        match phase {
            Phase::ValidateConnection => self.validate_connection_succeeded(),
            Phase::CreateProvisionDir => self.create_provision_dir_succeeded(),
            Phase::UploadArtifacts => self.upload_artifacts_succeeded(),
            Phase::ExtractArchive => self.extract_archive_succeeded(),
            Phase::EnableRemoteExec => self.enable_remote_exec_succeeded(),
            Phase::ExecuteSetupScript => self.execute_setup_script_succeeded(),
            Phase::WaitForReboot => self.wait_for_reboot_succeeded(),
            Phase::ExecutePostRebootScript => self.execute_post_reboot_script_succeeded(),
        }
    }
}

/// Writes human-readable progress to a stream (stdout in the CLI).
pub struct ConsoleMessenger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleMessenger {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock();
        // Progress output is best effort
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl ConstructMessenger for ConsoleMessenger {
    fn validate_connection_started(&self) {
        self.write("\nValidating connection to the guest VM...");
    }

    fn validate_connection_succeeded(&self) {
        self.write("Succeeded.\n");
    }

    fn create_provision_dir_started(&self) {
        self.write("\nCreating provision dir on target VM...");
    }

    fn create_provision_dir_succeeded(&self) {
        self.write("Succeeded.\n");
    }

    fn upload_artifacts_started(&self) {
        self.write("\nTransferring artifacts to the guest VM...\n");
    }

    fn upload_artifacts_succeeded(&self) {
        self.write("\nAll files have been uploaded.\n");
    }

    fn extract_archive_started(&self) {
        self.write("\nExtracting artifacts...");
    }

    fn extract_archive_succeeded(&self) {
        self.write("Succeeded.\n");
    }

    fn enable_remote_exec_started(&self) {
        self.write("\nAttempting to enable WinRM on the guest vm...");
    }

    fn enable_remote_exec_succeeded(&self) {
        self.write("WinRM enabled on the guest VM\n");
    }

    fn execute_setup_script_started(&self) {
        self.write("\nExecuting setup script...\n");
    }

    fn execute_setup_script_succeeded(&self) {
        self.write("\nFinished executing setup script.\n");
    }

    fn wait_for_reboot_started(&self) {
        self.write("\nWaiting for the guest VM to reboot...");
    }

    fn wait_for_reboot_succeeded(&self) {
        self.write("Succeeded.\n");
    }

    fn execute_post_reboot_script_started(&self) {
        self.write("\nExecuting post-reboot script...\n");
    }

    fn execute_post_reboot_script_succeeded(&self) {
        self.write("\nSuccessfully ran post-reboot script.\n");
    }

    fn upload_file_started(&self, artifact: &str) {
        self.write(&format!("\tUploading {} to target VM...", artifact));
    }

    fn upload_file_succeeded(&self) {
        self.write("Succeeded.\n");
    }

    fn winrm_disconnected_for_reboot(&self) {
        self.write("\nWinRM has been disconnected so the VM can reboot. Waiting for reboot to start...\n");
    }

    fn reboot_has_started(&self) {
        self.write("\nThe reboot has started...");
    }

    fn reboot_has_finished(&self) {
        self.write("\nThe reboot has finished.\n");
    }

    fn execute_post_reboot_warning(&self, warning: &str) {
        self.write(&format!("\nWarning: {}\n", warning));
    }

    fn restart_in_progress(&self) {
        self.write("still preparing VM...\n");
    }

    fn shutdown_completed(&self) {
        self.write("VM has now been shutdown and is ready to be packaged as a stemcell.\n");
    }

    fn os_version_file_creation_failed(&self, message: &str) {
        self.write(&format!(
            "\nWarning: could not create the OS version file on the guest: {}\n",
            message
        ));
    }

    fn exit_code_retrieval_failed(&self, message: &str) {
        self.write(&format!(
            "\nWarning: could not read the exit code of the OS version check: {}\n",
            message
        ));
    }

    fn download_file_failed(&self, message: &str) {
        self.write(&format!(
            "\nWarning: could not download the OS version file from the guest: {}\n",
            message
        ));
    }
}

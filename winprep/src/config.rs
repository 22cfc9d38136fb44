//! `construct` configuration.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::construct::{Artifact, PROVISION_DIR, ProvisionSession};
use crate::errors::{WinprepError, WinprepResult};
use crate::guest::GovcOptions;

pub const LGPO_ZIP: &str = "LGPO.zip";
pub const STEMCELL_AUTOMATION_ZIP: &str = "StemcellAutomation.zip";

const SETUP_SCRIPT: &str = "Setup.ps1";
const POST_REBOOT_SCRIPT: &str = "PostReboot.ps1";

pub const DEFAULT_REBOOT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// `<major>.<minor>` with an optional patch component.
static STEMCELL_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+(\.\d+)?$").expect("valid stemcell version pattern"));

/// Everything the `construct` command needs to prepare one VM.
#[derive(Debug, Clone)]
pub struct ConstructOptions {
    pub vm_ip: String,
    pub vm_username: String,
    pub vm_password: String,
    pub stemcell_version: String,
    pub vcenter_url: String,
    pub vcenter_username: String,
    pub vcenter_password: String,
    pub vm_inventory_path: String,
    pub vcenter_ca_certs: Option<PathBuf>,
    /// Extra switches for the setup script, without the leading `-`.
    pub setup_flags: Vec<String>,
    pub artifact_dir: PathBuf,
    pub govc: PathBuf,
    pub reboot_timeout: Duration,
}

impl Default for ConstructOptions {
    fn default() -> Self {
        Self {
            vm_ip: String::new(),
            vm_username: String::new(),
            vm_password: String::new(),
            stemcell_version: String::new(),
            vcenter_url: String::new(),
            vcenter_username: String::new(),
            vcenter_password: String::new(),
            vm_inventory_path: String::new(),
            vcenter_ca_certs: None,
            setup_flags: Vec::new(),
            artifact_dir: PathBuf::from("."),
            govc: PathBuf::from("govc"),
            reboot_timeout: DEFAULT_REBOOT_TIMEOUT,
        }
    }
}

impl ConstructOptions {
    /// Reject options that cannot produce a working session.
    pub fn sanitize(&self) -> WinprepResult<()> {
        let required = [
            ("vm-ip", &self.vm_ip),
            ("vm-username", &self.vm_username),
            ("vm-password", &self.vm_password),
            ("stemcell-version", &self.stemcell_version),
            ("vcenter-url", &self.vcenter_url),
            ("vcenter-username", &self.vcenter_username),
            ("vcenter-password", &self.vcenter_password),
            ("vm-inventory-path", &self.vm_inventory_path),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(WinprepError::Config(format!(
                "missing required options: {}",
                missing.join(", ")
            )));
        }

        if !STEMCELL_VERSION.is_match(&self.stemcell_version) {
            return Err(WinprepError::Config(format!(
                "stemcell version '{}' must look like <major>.<minor>[.<patch>]",
                self.stemcell_version
            )));
        }

        for name in [LGPO_ZIP, STEMCELL_AUTOMATION_ZIP] {
            let path = self.artifact_dir.join(name);
            if !path.is_file() {
                return Err(WinprepError::Config(format!(
                    "cannot find {} in {}",
                    name,
                    self.artifact_dir.display()
                )));
            }
        }

        if let Some(ca) = &self.vcenter_ca_certs
            && !ca.is_file()
        {
            return Err(WinprepError::Config(format!(
                "vCenter CA certificate file {} does not exist",
                ca.display()
            )));
        }

        for flag in &self.setup_flags {
            if flag.is_empty() || !flag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(WinprepError::Config(format!("invalid setup flag '{}'", flag)));
            }
        }

        Ok(())
    }

    /// Derive the provisioning session for the orchestrator.
    pub fn session(&self) -> ProvisionSession {
        let artifacts = vec![
            artifact("LGPO", &self.artifact_dir, LGPO_ZIP),
            artifact(
                "stemcell preparation artifacts",
                &self.artifact_dir,
                STEMCELL_AUTOMATION_ZIP,
            ),
        ];

        let mut setup_command = format!(
            "powershell.exe {}{} -Version {}",
            PROVISION_DIR,
            SETUP_SCRIPT,
            stemcell_major_minor(&self.stemcell_version)
        );
        for flag in &self.setup_flags {
            setup_command.push_str(" -");
            setup_command.push_str(flag);
        }

        ProvisionSession {
            guest_address: self.vm_ip.clone(),
            username: self.vm_username.clone(),
            artifacts,
            archive: format!("{}{}", PROVISION_DIR, STEMCELL_AUTOMATION_ZIP),
            provision_dir: PROVISION_DIR.to_string(),
            setup_command,
            post_reboot_command: format!("powershell.exe {}{}", PROVISION_DIR, POST_REBOOT_SCRIPT),
        }
    }

    pub fn govc_options(&self) -> GovcOptions {
        GovcOptions {
            binary: self.govc.clone(),
            url: self.vcenter_url.clone(),
            username: self.vcenter_username.clone(),
            password: self.vcenter_password.clone(),
            ca_certs: self.vcenter_ca_certs.clone(),
            vm_inventory_path: self.vm_inventory_path.clone(),
            vm_username: self.vm_username.clone(),
            vm_password: self.vm_password.clone(),
        }
    }
}

fn artifact(label: &str, dir: &Path, name: &str) -> Artifact {
    Artifact {
        label: label.to_string(),
        local_path: dir.join(name),
        remote_path: format!("{}{}", PROVISION_DIR, name),
    }
}

/// `2019.12.3` → `2019.12`
pub fn stemcell_major_minor(version: &str) -> String {
    version.split('.').take(2).collect::<Vec<_>>().join(".")
}

//! Bootstraps the guest's remote-execution daemon.
//!
//! The WinRM module script lives two archives deep inside the stemcell
//! automation bundle:
//!
//! ```text
//! StemcellAutomation.zip ─→ bosh-psmodules.zip ─→ BOSH.WinRM.psm1
//! ```
//!
//! The script plus an `Enable-WinRM` call is sent as an encoded PowerShell
//! command through the management plane, since WinRM itself is not yet
//! listening.

use std::sync::Arc;

use async_trait::async_trait;

use crate::archive::Unarchiver;
use crate::assets::AssetSource;
use crate::errors::{WinprepError, WinprepResult};
use crate::guest::GuestManager;
use crate::util::encode_powershell_command;

pub const STEMCELL_AUTOMATION_ASSET: &str = "StemcellAutomation.zip";
pub const BOSH_PS_MODULES: &str = "bosh-psmodules.zip";
pub const WINRM_PS_SCRIPT: &str = "BOSH.WinRM.psm1";
pub const POWERSHELL_PATH: &str = r"C:\Windows\System32\WindowsPowerShell\V1.0\powershell.exe";

const ENABLE_DIRECTIVE: &str = "\nEnable-WinRM\n";

#[async_trait]
pub trait WinRmEnabler: Send + Sync {
    async fn enable(&self) -> WinprepResult<()>;
}

pub struct WinRmManager {
    guest: Arc<dyn GuestManager>,
    unarchiver: Arc<dyn Unarchiver>,
    assets: Arc<dyn AssetSource>,
}

impl WinRmManager {
    pub fn new(
        guest: Arc<dyn GuestManager>,
        unarchiver: Arc<dyn Unarchiver>,
        assets: Arc<dyn AssetSource>,
    ) -> Self {
        Self {
            guest,
            unarchiver,
            assets,
        }
    }

    /// Script text that enables WinRM when run by PowerShell.
    fn enable_script(&self) -> WinprepResult<String> {
        let bundle = self.assets.asset(STEMCELL_AUTOMATION_ASSET)?;
        let modules = self.unarchiver.unzip(&bundle, BOSH_PS_MODULES)?;
        let module = self.unarchiver.unzip(&modules, WINRM_PS_SCRIPT)?;

        let mut script = String::from_utf8_lossy(&module).into_owned();
        script.push_str(ENABLE_DIRECTIVE);
        Ok(script)
    }

    async fn run(&self) -> WinprepResult<()> {
        let script = self.enable_script()?;
        let args = format!("-EncodedCommand {}", encode_powershell_command(&script));

        let pid = self.guest.start_program_in_guest(POWERSHELL_PATH, &args).await?;
        tracing::debug!(pid, "Started WinRM enable script in guest");

        let exit_code = self.guest.exit_code_for_program_in_guest(pid).await?;
        if exit_code != 0 {
            return Err(WinprepError::RemoteCommand {
                command: "Enable-WinRM".to_string(),
                exit_code,
            }
            .context(format!("WinRM process on guest VM exited with code {}", exit_code)));
        }
        Ok(())
    }
}

#[async_trait]
impl WinRmEnabler for WinRmManager {
    async fn enable(&self) -> WinprepResult<()> {
        self.run()
            .await
            .map_err(|e| e.context("failed to enable remote execution"))?;
        tracing::info!("WinRM enabled on guest");
        Ok(())
    }
}

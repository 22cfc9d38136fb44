//! Guest OS build check, run before provisioning.
//!
//! Failures talking to the guest are reported as warnings and do not block
//! provisioning; only a definite mismatch does.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::io::AsyncReadExt;

use super::messenger::ConstructMessenger;
use crate::enabler::POWERSHELL_PATH;
use crate::errors::{WinprepError, WinprepResult};
use crate::guest::GuestManager;

pub const VERSION_LOG_PATH: &str = r"C:\Windows\Temp\version.log";

const MAX_VERSION_FILE_BYTES: i64 = 256;

/// Known Windows builds and the stemcell OS name each corresponds to.
const KNOWN_BUILDS: &[(&str, &str)] = &[("17763", "2019"), ("17134", "1803"), ("dev", "dev")];

/// Stemcell OS name for a Windows build number, if known.
pub fn os_version_from_build(build: &str) -> Option<&'static str> {
    KNOWN_BUILDS
        .iter()
        .find(|(b, _)| *b == build)
        .map(|(_, name)| *name)
}

pub struct OsVersionValidator {
    guest: Arc<dyn GuestManager>,
    messenger: Arc<dyn ConstructMessenger>,
}

impl OsVersionValidator {
    pub fn new(guest: Arc<dyn GuestManager>, messenger: Arc<dyn ConstructMessenger>) -> Self {
        Self { guest, messenger }
    }

    pub async fn validate(&self, stemcell_version: &str) -> WinprepResult<()> {
        let Some(build) = self.fetch_build().await? else {
            return Ok(());
        };

        let Some(guest_os) = os_version_from_build(&build) else {
            tracing::warn!(build = %build, "Unrecognized guest OS build, skipping version check");
            return Ok(());
        };

        if !stemcell_version.contains(guest_os) {
            return Err(WinprepError::Config(format!(
                "OS version of stembuild and guest OS VM do not match. Guest OS Version:'{}', Stembuild Version:'{}'",
                guest_os, stemcell_version
            )));
        }

        tracing::debug!(build = %build, guest_os, "Guest OS version matches");
        Ok(())
    }

    /// Build number reported by the guest, or `None` after a reported warning.
    async fn fetch_build(&self) -> WinprepResult<Option<String>> {
        let args = format!(
            "[System.Environment]::OSVersion.Version.Build > {}",
            VERSION_LOG_PATH
        );

        let pid = match self.guest.start_program_in_guest(POWERSHELL_PATH, &args).await {
            Ok(pid) => pid,
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                self.messenger.os_version_file_creation_failed(&e.to_string());
                return Ok(None);
            }
        };

        match self.guest.exit_code_for_program_in_guest(pid).await {
            Ok(0) => {}
            Ok(code) => {
                self.messenger.os_version_file_creation_failed(&format!(
                    "OS version file creation failed with non-zero exit code: {}",
                    code
                ));
                return Ok(None);
            }
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                self.messenger.exit_code_retrieval_failed(&e.to_string());
                return Ok(None);
            }
        }

        let mut download = match self.guest.download_file_in_guest(VERSION_LOG_PATH).await {
            Ok(download) => download,
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                self.messenger.download_file_failed(&e.to_string());
                return Ok(None);
            }
        };

        if download.size == 0 {
            self.messenger
                .download_file_failed(&format!("{} is empty", VERSION_LOG_PATH));
            return Ok(None);
        }

        let mut raw = Vec::with_capacity(download.size.clamp(0, MAX_VERSION_FILE_BYTES) as usize);
        if let Err(e) = download.reader.read_to_end(&mut raw).await {
            let e = WinprepError::from(e);
            if e.is_interrupted() {
                return Err(e);
            }
            self.messenger.download_file_failed(&e.to_string());
            return Ok(None);
        }

        Ok(Some(normalize_build(&raw)))
    }
}

/// Anything that is not part of a build identifier.
static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9]+").expect("valid pattern"));

/// The redirect writes UTF-16 with a BOM; keep only ASCII alphanumerics.
fn normalize_build(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    NON_ALPHANUMERIC.replace_all(&text, "").into_owned()
}

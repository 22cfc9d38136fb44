//! [`GuestManager`] backed by the `govc` vSphere CLI.
//!
//! Each operation spawns one `govc` subprocess. The subprocess is killed
//! when the session is cancelled or the operation future is dropped.
//! Downloads are staged in the session's scratch directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{GuestDownload, GuestManager};
use crate::cancel::{CancelReader, CancelWriter, ScratchDir};
use crate::errors::{WinprepError, WinprepResult};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Connection settings for the management plane and guest login.
#[derive(Debug, Clone)]
pub struct GovcOptions {
    pub binary: PathBuf,
    pub url: String,
    pub username: String,
    pub password: String,
    pub ca_certs: Option<PathBuf>,
    pub vm_inventory_path: String,
    pub vm_username: String,
    pub vm_password: String,
}

pub struct GovcGuestManager {
    options: GovcOptions,
    credential_url: String,
    scratch: Arc<ScratchDir>,
    token: CancellationToken,
}

struct GovcOutput {
    stdout: Vec<u8>,
    stderr: String,
    code: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessList {
    #[serde(default)]
    process_info: Vec<ProcessInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ProcessInfo {
    #[serde(default)]
    pid: i64,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    exit_code: i32,
}

impl GovcGuestManager {
    pub fn new(options: GovcOptions, scratch: Arc<ScratchDir>, token: CancellationToken) -> Self {
        let credential_url = credential_url(&options.username, &options.password, &options.url);
        Self {
            options,
            credential_url,
            scratch,
            token,
        }
    }

    /// `govc <subcommand> -u <url> [-tls-ca-certs=..] <args>`
    fn vm_args(&self, subcommand: &str, args: &[&str]) -> Vec<String> {
        let mut argv = vec![
            subcommand.to_string(),
            "-u".to_string(),
            self.credential_url.clone(),
        ];
        if let Some(ca) = &self.options.ca_certs {
            argv.push(format!("-tls-ca-certs={}", ca.display()));
        }
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    /// `govc <subcommand> -u <url> [-tls-ca-certs=..] -l <guest login> -vm <path> <args>`
    fn guest_args(&self, subcommand: &str, args: &[&str]) -> Vec<String> {
        let login = format!("{}:{}", self.options.vm_username, self.options.vm_password);
        let mut guest = vec!["-l", login.as_str(), "-vm", self.options.vm_inventory_path.as_str()];
        guest.extend_from_slice(args);
        self.vm_args(subcommand, &guest)
    }

    fn spawn(&self, argv: &[String]) -> WinprepResult<Child> {
        // argv carries credentials; log the subcommand only
        let subcommand = argv.first().map(String::as_str).unwrap_or_default();
        tracing::debug!(subcommand, "Running govc");

        Command::new(&self.options.binary)
            .args(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WinprepError::Transport(format!(
                    "vcenter_client - failed to start {}: {}",
                    self.options.binary.display(),
                    e
                ))
            })
    }

    async fn run(&self, argv: Vec<String>) -> WinprepResult<GovcOutput> {
        let subcommand = argv.first().cloned().unwrap_or_default();
        let child = self.spawn(&argv)?;

        let output = tokio::select! {
            _ = self.token.cancelled() => {
                tracing::debug!(subcommand = %subcommand, "Cancelled, killing govc");
                return Err(WinprepError::Interrupted);
            }
            output = child.wait_with_output() => output.map_err(|e| io_failure(&subcommand, e))?,
        };

        let code = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if code != 0 {
            tracing::debug!(subcommand = %subcommand, code, stderr = %stderr, "govc exited non-zero");
        }
        Ok(GovcOutput {
            stdout: output.stdout,
            stderr,
            code,
        })
    }

    /// Run govc with stdout copied into `dest`. Returns exit code and stderr.
    async fn run_to_file(&self, argv: Vec<String>, dest: &Path) -> WinprepResult<(i32, String)> {
        let subcommand = argv.first().cloned().unwrap_or_default();
        let mut child = self.spawn(&argv)?;
        let (Some(stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(WinprepError::Internal("govc output pipes not captured".into()));
        };

        let file = tokio::fs::File::create(dest).await.map_err(|e| {
            WinprepError::Storage(format!("Failed to create {}: {}", dest.display(), e))
        })?;
        let mut reader = CancelReader::new(stdout, self.token.clone());
        let mut writer = CancelWriter::new(file, self.token.clone());

        let transfer = async {
            let copy = async {
                tokio::io::copy(&mut reader, &mut writer).await?;
                writer.flush().await
            };
            let mut err_buf = Vec::new();
            let (copied, read) = tokio::join!(copy, stderr.read_to_end(&mut err_buf));
            copied?;
            read?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, err_buf))
        };

        let (status, err_buf) = tokio::select! {
            _ = self.token.cancelled() => {
                tracing::debug!(subcommand = %subcommand, "Cancelled, killing govc");
                return Err(WinprepError::Interrupted);
            }
            result = transfer => result.map_err(|e| io_failure(&subcommand, e))?,
        };

        let code = status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&err_buf).trim().to_string();
        if code != 0 {
            tracing::debug!(subcommand = %subcommand, code, stderr = %stderr, "govc exited non-zero");
        }
        Ok((code, stderr))
    }
}

#[async_trait]
impl GuestManager for GovcGuestManager {
    async fn start_program_in_guest(&self, command: &str, args: &str) -> WinprepResult<i64> {
        let output = self
            .run(self.guest_args("guest.start", &[command, args]))
            .await
            .map_err(|e| {
                e.context(format!(
                    "vcenter_client - could not run process: {} on guest os",
                    command
                ))
            })?;

        if output.code != 0 {
            return Err(WinprepError::Transport(format!(
                "vcenter_client - '{}' returned exit code: {}: {}",
                command, output.code, output.stderr
            )));
        }

        let pid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let pid = pid.parse::<i64>().map_err(|_| {
            WinprepError::InvalidOutput(format!(
                "vcenter_client - '{}' returned an invalid pid: {:?}",
                command, pid
            ))
        })?;
        tracing::debug!(pid, "Started program in guest");
        Ok(pid)
    }

    async fn exit_code_for_program_in_guest(&self, pid: i64) -> WinprepResult<i32> {
        let pid_arg = pid.to_string();
        loop {
            let output = self
                .run(self.guest_args("guest.ps", &["-p", &pid_arg, "-X", "-json"]))
                .await?;

            if output.code != 0 {
                return Err(WinprepError::Transport(format!(
                    "vcenter_client - fetching PID {} returned with exit code: {}",
                    pid, output.code
                )));
            }

            match parse_exit_code(pid, &output.stdout)? {
                Some(code) => return Ok(code),
                None => {
                    tokio::select! {
                        _ = self.token.cancelled() => return Err(WinprepError::Interrupted),
                        _ = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
                    }
                }
            }
        }
    }

    async fn download_file_in_guest(&self, path: &str) -> WinprepResult<GuestDownload> {
        let dest = self.scratch.path().join(format!("download-{}", Uuid::new_v4()));
        let (code, stderr) = self
            .run_to_file(self.guest_args("guest.download", &[path, "-"]), &dest)
            .await?;

        if code != 0 {
            if let Err(e) = tokio::fs::remove_file(&dest).await {
                tracing::debug!(path = %dest.display(), "Failed to remove partial download: {}", e);
            }
            return Err(WinprepError::Transport(format!(
                "vcenter_client - unable to download file: {}",
                stderr
            )));
        }

        let file = tokio::fs::File::open(&dest).await.map_err(|e| {
            WinprepError::Storage(format!("Failed to open {}: {}", dest.display(), e))
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| WinprepError::Storage(format!("Failed to stat {}: {}", dest.display(), e)))?
            .len() as i64;
        tracing::debug!(guest_path = path, size, "Downloaded file from guest");

        Ok(GuestDownload {
            reader: Box::pin(CancelReader::new(file, self.token.clone())),
            size,
        })
    }

    async fn is_powered_off(&self) -> WinprepResult<bool> {
        let output = self
            .run(self.vm_args("vm.info", &["-vm.ipath", &self.options.vm_inventory_path]))
            .await?;

        if output.code != 0 {
            return Err(WinprepError::Transport(format!(
                "vcenter_client - failed to get vm info, govc exit code: {}",
                output.code
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).contains("poweredOff"))
    }
}

fn io_failure(subcommand: &str, e: std::io::Error) -> WinprepError {
    if e.kind() == ErrorKind::Interrupted {
        return WinprepError::Interrupted;
    }
    WinprepError::Transport(format!("vcenter_client - govc {} failed: {}", subcommand, e))
}

/// Exit code of `pid` from `guest.ps -json` output, or `None` while it runs.
fn parse_exit_code(pid: i64, stdout: &[u8]) -> WinprepResult<Option<i32>> {
    let list: ProcessList = serde_json::from_slice(stdout).map_err(|_| {
        WinprepError::InvalidOutput(format!(
            "vcenter_client - received bad JSON output for PID {}: {}",
            pid,
            String::from_utf8_lossy(stdout)
        ))
    })?;

    let [process] = list.process_info.as_slice() else {
        return Err(WinprepError::InvalidOutput(format!(
            "vcenter_client - couldn't get exit code for PID {}",
            pid
        )));
    };

    if process.pid != 0 && process.pid != pid {
        return Err(WinprepError::InvalidOutput(format!(
            "vcenter_client - expected PID {}, got {}",
            pid, process.pid
        )));
    }

    match process.end_time.as_deref() {
        Some(t) if !t.is_empty() => Ok(Some(process.exit_code)),
        _ => Ok(None),
    }
}

/// `user:password@url` with both credentials query-escaped.
fn credential_url(username: &str, password: &str, url: &str) -> String {
    let user: String = url::form_urlencoded::byte_serialize(username.as_bytes()).collect();
    let pass: String = url::form_urlencoded::byte_serialize(password.as_bytes()).collect();
    format!("{}:{}@{}", user, pass, url)
}

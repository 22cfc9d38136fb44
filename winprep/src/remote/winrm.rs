//! WinRM (WS-Management over HTTP) implementation of [`RemoteManager`].
//!
//! Every command gets its own remote shell:
//!
//! ```text
//! Create shell → Command → Receive… (until Done) → Signal terminate → Delete shell
//! ```
//!
//! A command that outlives its timeout still gets the terminate signal and
//! the shell delete before the timeout is reported.
//!
//! Uploads reuse one shell for all chunks. The file is streamed from disk,
//! base64 encoded, appended to a temp file on the guest with `echo`, then
//! decoded into place by an encoded PowerShell command.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::RemoteManager;
use super::soap::{self, Header, OPERATION_TIMEOUT_FAULT};
use crate::cancel::CancelReader;
use crate::errors::{WinprepError, WinprepResult};
use crate::util::{encode_powershell_command, escape_powershell_literal};

pub const WINRM_PORT: u16 = 5985;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const OPERATION_TIMEOUT_SECS: u64 = 60;
/// Must outlive the server-side operation timeout so an idle Receive
/// returns a fault instead of a client-side timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(OPERATION_TIMEOUT_SECS + 30);

/// Raw bytes per upload chunk. A multiple of 3 so chunks encode without
/// padding and concatenate into one valid base64 document; 6000 encoded
/// characters keeps each `echo` under the cmd.exe line limit.
const UPLOAD_CHUNK_BYTES: usize = 4500;

pub struct WinRmRemoteManager {
    host: String,
    port: u16,
    username: String,
    password: String,
    endpoint: String,
    http: reqwest::Client,
    token: CancellationToken,
}

impl WinRmRemoteManager {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        token: CancellationToken,
    ) -> WinprepResult<Self> {
        Self::with_port(host, WINRM_PORT, username, password, token)
    }

    pub fn with_port(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
        token: CancellationToken,
    ) -> WinprepResult<Self> {
        let host = host.into();
        let endpoint = format!("http://{}:{}/wsman", host, port);
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| WinprepError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            host,
            port,
            username: username.into(),
            password: password.into(),
            endpoint,
            http,
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn header<'a>(&'a self, message_id: &'a str, shell_id: Option<&'a str>) -> Header<'a> {
        Header {
            endpoint: &self.endpoint,
            message_id,
            operation_timeout_secs: OPERATION_TIMEOUT_SECS,
            shell_id,
        }
    }

    // ========================================================================
    // HTTP
    // ========================================================================

    async fn send(&self, body: String) -> WinprepResult<String> {
        if self.token.is_cancelled() {
            return Err(WinprepError::Interrupted);
        }

        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                WinprepError::Transport(format!("WinRM request to {} failed: {}", self.host, e))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| WinprepError::Transport(format!("Failed to read WinRM response: {}", e)))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(WinprepError::Authentication(format!(
                "WinRM rejected credentials for {}",
                self.username
            )));
        }
        if !status.is_success() {
            let reason = soap::fault_reason(&text).unwrap_or_else(|| text.clone());
            if text.contains(OPERATION_TIMEOUT_FAULT) {
                return Err(WinprepError::Timeout(reason));
            }
            return Err(WinprepError::Transport(format!(
                "WinRM returned {}: {}",
                status, reason
            )));
        }

        Ok(text)
    }

    // ========================================================================
    // SHELL LIFECYCLE
    // ========================================================================

    async fn open_shell(&self) -> WinprepResult<String> {
        let message_id = Uuid::new_v4().to_string();
        let response = self
            .send(soap::create_shell(&self.header(&message_id, None)))
            .await?;
        let shell_id = soap::parse_shell_id(&response)?;
        tracing::trace!(host = %self.host, shell_id = %shell_id, "Opened remote shell");
        Ok(shell_id)
    }

    async fn close_shell(&self, shell_id: &str) {
        let message_id = Uuid::new_v4().to_string();
        if let Err(e) = self
            .send(soap::delete_shell(&self.header(&message_id, Some(shell_id))))
            .await
        {
            tracing::debug!(shell_id = %shell_id, "Failed to delete remote shell: {}", e);
        }
    }

    /// Run one command inside an open shell and collect its exit code.
    ///
    /// The command is always signalled to terminate afterwards, including
    /// when `timeout` elapses before it reports Done.
    async fn run_in_shell(
        &self,
        shell_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> WinprepResult<i32> {
        let message_id = Uuid::new_v4().to_string();
        let response = self
            .send(soap::command(&self.header(&message_id, Some(shell_id)), command))
            .await?;
        let command_id = soap::parse_command_id(&response)?;

        let receive = self.receive_until_done(shell_id, &command_id);
        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, receive)
                .await
                .unwrap_or_else(|_| {
                    Err(WinprepError::Timeout(format!(
                        "command `{}` did not finish within {}s",
                        summarize_command(command),
                        timeout.as_secs()
                    )))
                }),
            None => receive.await,
        };

        let message_id = Uuid::new_v4().to_string();
        if let Err(e) = self
            .send(soap::signal_terminate(
                &self.header(&message_id, Some(shell_id)),
                &command_id,
            ))
            .await
        {
            tracing::debug!(command_id = %command_id, "Failed to signal command termination: {}", e);
        }

        result
    }

    async fn receive_until_done(&self, shell_id: &str, command_id: &str) -> WinprepResult<i32> {
        let mut exit_code = None;
        loop {
            let message_id = Uuid::new_v4().to_string();
            let response = match self
                .send(soap::receive(&self.header(&message_id, Some(shell_id)), command_id))
                .await
            {
                Ok(response) => response,
                // No output within the operation timeout; still running
                Err(WinprepError::Timeout(_)) => continue,
                Err(e) => return Err(e),
            };

            let output = soap::parse_receive(&response)?;
            forward_output(&output.stdout, false);
            forward_output(&output.stderr, true);
            if output.exit_code.is_some() {
                exit_code = output.exit_code;
            }
            if output.done {
                break;
            }
        }

        exit_code.ok_or_else(|| {
            WinprepError::InvalidOutput(format!("command {} finished without an exit code", command_id))
        })
    }

    async fn run(&self, command: &str, timeout: Option<Duration>) -> WinprepResult<i32> {
        tracing::debug!(host = %self.host, command = %summarize_command(command), "Executing remote command");
        let shell_id = self.open_shell().await?;
        let result = self.run_in_shell(&shell_id, command, timeout).await;
        self.close_shell(&shell_id).await;
        let exit_code = result?;
        tracing::debug!(host = %self.host, exit_code, "Remote command finished");
        Ok(exit_code)
    }

    // ========================================================================
    // UPLOAD
    // ========================================================================

    async fn upload_in_shell(
        &self,
        shell_id: &str,
        source: &Path,
        destination: &str,
        temp_file: &str,
    ) -> WinprepResult<()> {
        let file = tokio::fs::File::open(source).await.map_err(|e| {
            WinprepError::Storage(format!("Failed to open {}: {}", source.display(), e))
        })?;
        let mut reader = CancelReader::new(file, self.token.clone());

        self.run_checked_in_shell(shell_id, &format!(r#"type nul > "{}""#, temp_file))
            .await?;

        let mut buf = vec![0u8; UPLOAD_CHUNK_BYTES];
        let mut total: u64 = 0;
        loop {
            let filled = fill_chunk(&mut reader, &mut buf).await?;
            if filled == 0 {
                break;
            }
            total += filled as u64;
            let chunk = BASE64.encode(&buf[..filled]);
            self.run_checked_in_shell(shell_id, &format!(r#">> "{}" echo {}"#, temp_file, chunk))
                .await?;
            if filled < buf.len() {
                break;
            }
        }

        let restore = restore_script(temp_file, destination);
        self.run_checked_in_shell(
            shell_id,
            &format!(
                "powershell.exe -NoProfile -NonInteractive -EncodedCommand {}",
                encode_powershell_command(&restore)
            ),
        )
        .await?;

        tracing::debug!(
            host = %self.host,
            source = %source.display(),
            destination = %destination,
            bytes = total,
            "Uploaded artifact"
        );
        Ok(())
    }

    async fn run_checked_in_shell(&self, shell_id: &str, command: &str) -> WinprepResult<()> {
        let exit_code = self.run_in_shell(shell_id, command, None).await?;
        if exit_code != 0 {
            return Err(WinprepError::RemoteCommand {
                command: summarize_command(command),
                exit_code,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteManager for WinRmRemoteManager {
    async fn upload_artifact(&self, source: &Path, destination: &str) -> WinprepResult<()> {
        let temp_file = format!(r"%TEMP%\winprep-{}.tmp", Uuid::new_v4());
        let shell_id = self.open_shell().await?;
        let result = self
            .upload_in_shell(&shell_id, source, destination, &temp_file)
            .await;
        self.close_shell(&shell_id).await;
        result.map_err(|e| e.context(format!("failed to upload {}", source.display())))
    }

    async fn extract_archive(&self, source: &str, destination: &str) -> WinprepResult<()> {
        let command = format!("powershell.exe Expand-Archive {} {} -Force", source, destination);
        let exit_code = self.execute_command(&command).await?;
        if exit_code != 0 {
            return Err(WinprepError::RemoteCommand { command, exit_code });
        }
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> WinprepResult<i32> {
        self.run(command, None).await
    }

    async fn execute_command_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> WinprepResult<i32> {
        self.run(command, Some(timeout)).await
    }

    async fn can_reach_vm(&self) -> WinprepResult<()> {
        let unreachable = || {
            WinprepError::Unreachable(format!(
                "host {} is unreachable. Please ensure WinRM is enabled and the IP is correct",
                self.host
            ))
        };

        let addr = format!("{}:{}", self.host, self.port);
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => {
                tracing::debug!(addr = %addr, "TCP connect failed: {}", e);
                Err(unreachable())
            }
            Err(_) => {
                tracing::debug!(addr = %addr, "TCP connect timed out");
                Err(unreachable())
            }
        }
    }

    async fn can_login_vm(&self) -> WinprepResult<()> {
        match self.open_shell().await {
            Ok(shell_id) => {
                self.close_shell(&shell_id).await;
                Ok(())
            }
            Err(e) if e.is_interrupted() => Err(e),
            Err(e) => {
                tracing::debug!(host = %self.host, "Login attempt failed: {}", e);
                Err(WinprepError::Authentication(
                    "username and password for given IP is invalid".into(),
                ))
            }
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Read until `buf` is full or the reader is exhausted.
async fn fill_chunk<R>(reader: &mut R, buf: &mut [u8]) -> WinprepResult<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// PowerShell that decodes the uploaded temp file into `destination`.
fn restore_script(temp_file: &str, destination: &str) -> String {
    let temp_file = temp_file.replace("%TEMP%", "$env:TEMP");
    format!(
        r#"$ErrorActionPreference = 'Stop'
$tmp = "{temp}"
$dest = {dest}
$dir = Split-Path -Parent $dest
if ($dir -and -not (Test-Path $dir)) {{ New-Item -ItemType Directory -Force -Path $dir | Out-Null }}
$encoded = [System.IO.File]::ReadAllText($tmp)
[System.IO.File]::WriteAllBytes($dest, [System.Convert]::FromBase64String($encoded))
Remove-Item -Force $tmp
"#,
        temp = temp_file,
        dest = escape_powershell_literal(destination),
    )
}

/// Keep logs and errors readable when a command embeds a large payload.
fn summarize_command(command: &str) -> String {
    const LIMIT: usize = 120;
    if command.len() <= LIMIT {
        return command.to_string();
    }
    let mut end = LIMIT;
    while !command.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &command[..end])
}

fn forward_output(bytes: &[u8], stderr: bool) {
    if bytes.is_empty() {
        return;
    }
    let text = String::from_utf8_lossy(bytes);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if stderr {
            tracing::warn!(target: "winprep::guest", "{}", line);
        } else {
            tracing::info!(target: "winprep::guest", "{}", line);
        }
    }
}

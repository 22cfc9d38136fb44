//! Test doubles shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::construct::ConstructMessenger;
use crate::errors::{WinprepError, WinprepResult};
use crate::guest::{GuestDownload, GuestManager};
use crate::remote::RemoteManager;

/// Scripted outcome of one `execute_command` call.
#[derive(Debug, Clone)]
pub enum Reply {
    Exit(i32),
    Fail(&'static str),
}

/// Remote manager whose command results are scripted per command line.
///
/// The last scripted reply repeats once the script is exhausted; unscripted
/// commands exit 0.
#[derive(Default)]
pub struct FakeRemote {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    pub reach_error: Mutex<Option<&'static str>>,
    pub login_error: Mutex<Option<&'static str>>,
}

impl FakeRemote {
    pub fn script(&self, command: &str, replies: Vec<Reply>) {
        self.scripts
            .lock()
            .insert(command.to_string(), replies.into_iter().collect());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == command).count()
    }

    fn next_reply(&self, command: &str) -> Reply {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(command) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::Exit(0)),
            Some(queue) => queue.front().cloned().unwrap_or(Reply::Exit(0)),
            None => Reply::Exit(0),
        }
    }
}

#[async_trait]
impl RemoteManager for FakeRemote {
    async fn upload_artifact(&self, source: &Path, destination: &str) -> WinprepResult<()> {
        self.calls
            .lock()
            .push(format!("upload {} {}", source.display(), destination));
        Ok(())
    }

    async fn extract_archive(&self, source: &str, destination: &str) -> WinprepResult<()> {
        self.calls
            .lock()
            .push(format!("extract {} {}", source, destination));
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> WinprepResult<i32> {
        self.calls.lock().push(command.to_string());
        match self.next_reply(command) {
            Reply::Exit(code) => Ok(code),
            Reply::Fail(msg) => Err(WinprepError::Transport(msg.to_string())),
        }
    }

    async fn execute_command_with_timeout(
        &self,
        command: &str,
        _timeout: Duration,
    ) -> WinprepResult<i32> {
        self.execute_command(command).await
    }

    async fn can_reach_vm(&self) -> WinprepResult<()> {
        self.calls.lock().push("can_reach_vm".into());
        match *self.reach_error.lock() {
            Some(msg) => Err(WinprepError::Unreachable(msg.to_string())),
            None => Ok(()),
        }
    }

    async fn can_login_vm(&self) -> WinprepResult<()> {
        self.calls.lock().push("can_login_vm".into());
        match *self.login_error.lock() {
            Some(msg) => Err(WinprepError::Authentication(msg.to_string())),
            None => Ok(()),
        }
    }
}

/// Guest manager returning fixed results and recording started programs.
pub struct FakeGuest {
    pub started: Mutex<Vec<(String, String)>>,
    pub start_error: Mutex<Option<&'static str>>,
    pub exit_code: Mutex<Result<i32, &'static str>>,
    pub download: Mutex<Result<Vec<u8>, &'static str>>,
    /// Successive power-state answers; the last one repeats.
    pub power_states: Mutex<VecDeque<Result<bool, &'static str>>>,
    pub power_checks: Mutex<usize>,
}

impl Default for FakeGuest {
    fn default() -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            start_error: Mutex::new(None),
            exit_code: Mutex::new(Ok(0)),
            download: Mutex::new(Ok(Vec::new())),
            power_states: Mutex::new(VecDeque::from([Ok(true)])),
            power_checks: Mutex::new(0),
        }
    }
}

#[async_trait]
impl GuestManager for FakeGuest {
    async fn start_program_in_guest(&self, command: &str, args: &str) -> WinprepResult<i64> {
        self.started
            .lock()
            .push((command.to_string(), args.to_string()));
        match *self.start_error.lock() {
            Some(msg) => Err(WinprepError::Transport(msg.to_string())),
            None => Ok(4242),
        }
    }

    async fn exit_code_for_program_in_guest(&self, _pid: i64) -> WinprepResult<i32> {
        (*self.exit_code.lock()).map_err(|msg| WinprepError::Transport(msg.to_string()))
    }

    async fn download_file_in_guest(&self, _path: &str) -> WinprepResult<GuestDownload> {
        let data = self
            .download
            .lock()
            .clone()
            .map_err(|msg| WinprepError::Transport(msg.to_string()))?;
        Ok(GuestDownload::from_bytes(data))
    }

    async fn is_powered_off(&self) -> WinprepResult<bool> {
        *self.power_checks.lock() += 1;
        let mut states = self.power_states.lock();
        let state = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().copied()
        };
        state
            .unwrap_or(Ok(true))
            .map_err(|msg| WinprepError::Transport(msg.to_string()))
    }
}

/// Messenger that records every notification as a string.
#[derive(Default)]
pub struct RecordingMessenger {
    events: Mutex<Vec<String>>,
}

impl RecordingMessenger {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }
}

impl ConstructMessenger for RecordingMessenger {
    fn validate_connection_started(&self) {
        self.push("validate_connection_started");
    }

    fn validate_connection_succeeded(&self) {
        self.push("validate_connection_succeeded");
    }

    fn create_provision_dir_started(&self) {
        self.push("create_provision_dir_started");
    }

    fn create_provision_dir_succeeded(&self) {
        self.push("create_provision_dir_succeeded");
    }

    fn upload_artifacts_started(&self) {
        self.push("upload_artifacts_started");
    }

    fn upload_artifacts_succeeded(&self) {
        self.push("upload_artifacts_succeeded");
    }

    fn extract_archive_started(&self) {
        self.push("extract_archive_started");
    }

    fn extract_archive_succeeded(&self) {
        self.push("extract_archive_succeeded");
    }

    fn enable_remote_exec_started(&self) {
        self.push("enable_remote_exec_started");
    }

    fn enable_remote_exec_succeeded(&self) {
        self.push("enable_remote_exec_succeeded");
    }

    fn execute_setup_script_started(&self) {
        self.push("execute_setup_script_started");
    }

    fn execute_setup_script_succeeded(&self) {
        self.push("execute_setup_script_succeeded");
    }

    fn wait_for_reboot_started(&self) {
        self.push("wait_for_reboot_started");
    }

    fn wait_for_reboot_succeeded(&self) {
        self.push("wait_for_reboot_succeeded");
    }

    fn execute_post_reboot_script_started(&self) {
        self.push("execute_post_reboot_script_started");
    }

    fn execute_post_reboot_script_succeeded(&self) {
        self.push("execute_post_reboot_script_succeeded");
    }

    fn upload_file_started(&self, artifact: &str) {
        self.push(format!("upload_file_started {}", artifact));
    }

    fn upload_file_succeeded(&self) {
        self.push("upload_file_succeeded");
    }

    fn winrm_disconnected_for_reboot(&self) {
        self.push("winrm_disconnected_for_reboot");
    }

    fn reboot_has_started(&self) {
        self.push("reboot_has_started");
    }

    fn reboot_has_finished(&self) {
        self.push("reboot_has_finished");
    }

    fn execute_post_reboot_warning(&self, warning: &str) {
        self.push(format!("post_reboot_warning {}", warning));
    }

    fn restart_in_progress(&self) {
        self.push("restart_in_progress");
    }

    fn shutdown_completed(&self) {
        self.push("shutdown_completed");
    }

    fn os_version_file_creation_failed(&self, message: &str) {
        self.push(format!("os_version_file_creation_failed {}", message));
    }

    fn exit_code_retrieval_failed(&self, message: &str) {
        self.push(format!("exit_code_retrieval_failed {}", message));
    }

    fn download_file_failed(&self, message: &str) {
        self.push(format!("download_file_failed {}", message));
    }
}

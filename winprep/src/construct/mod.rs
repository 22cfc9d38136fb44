//! VM preparation orchestrator.
//!
//! ## Architecture
//!
//! Preparation is a fixed, strictly sequential execution plan:
//!
//! ```text
//! preflight:  1. ValidateConnection       (reachable? credentials valid?)
//! stage:      2. CreateProvisionDir       (C:\provision)
//!             3. UploadArtifacts          (LGPO.zip, StemcellAutomation.zip)
//!             4. ExtractArchive           (expand the automation bundle)
//! bootstrap:  5. EnableRemoteExec         (WinRM via management plane)
//! setup:      6. ExecuteSetupScript       (Setup.ps1, schedules a reboot)
//!             7. WaitForReboot            (trial-reboot-and-abort polling)
//!             8. ExecutePostRebootScript  (PostReboot.ps1)
//! then:          wait for power off       (PostReboot.ps1 shuts the guest down)
//! ```
//!
//! The first failing phase ends the run with
//! `WinprepError::Phase { phase, .. }`; later phases never start. Nothing is
//! rolled back. The power-off wait is not a reported phase; its failures
//! carry no phase name.

mod messenger;
mod os_version;
mod shutdown;
mod tasks;
mod types;
mod validator;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::enabler::WinRmEnabler;
use crate::errors::WinprepResult;
use crate::guest::GuestManager;
use crate::pipeline::{ExecutionPlan, PipelineExecutor, PipelineMetrics, Stage};
use crate::remote::RemoteManager;

pub use messenger::{ConsoleMessenger, ConstructMessenger};
pub use os_version::{OsVersionValidator, VERSION_LOG_PATH, os_version_from_build};
pub use types::{
    Artifact, ConstructContext, ConstructCtx, ConstructTimings, PROVISION_DIR, Phase,
    ProvisionSession,
};
pub use validator::VmConnectionValidator;

use tasks::{
    CreateProvisionDirTask, EnableRemoteExecTask, ExecutePostRebootScriptTask,
    ExecuteSetupScriptTask, ExtractArchiveTask, UploadArtifactsTask, ValidateConnectionTask,
    WaitForRebootTask,
};

// ============================================================================
// EXECUTION PLAN
// ============================================================================

fn execution_plan() -> ExecutionPlan<ConstructCtx> {
    let stages: Vec<Stage<ConstructCtx>> = vec![
        // Must run first: nothing touches the guest until this passes
        Stage::new("preflight", vec![Box::new(ValidateConnectionTask)]),
        Stage::new(
            "stage",
            vec![
                Box::new(CreateProvisionDirTask),
                Box::new(UploadArtifactsTask),
                Box::new(ExtractArchiveTask),
            ],
        ),
        Stage::new("bootstrap", vec![Box::new(EnableRemoteExecTask)]),
        Stage::new(
            "setup",
            vec![
                Box::new(ExecuteSetupScriptTask),
                Box::new(WaitForRebootTask),
                Box::new(ExecutePostRebootScriptTask),
            ],
        ),
    ];

    ExecutionPlan::new(stages)
}

/// Drives one guest through every preparation phase.
///
/// # Example
///
/// ```ignore
/// let construct = VmConstruct::new(session, remote, guest, enabler, messenger, token);
/// construct.prepare_vm().await?;
/// ```
pub struct VmConstruct {
    ctx: ConstructCtx,
}

impl VmConstruct {
    pub fn new(
        session: ProvisionSession,
        remote: Arc<dyn RemoteManager>,
        guest: Arc<dyn GuestManager>,
        enabler: Arc<dyn WinRmEnabler>,
        messenger: Arc<dyn ConstructMessenger>,
        token: CancellationToken,
    ) -> Self {
        Self::with_timings(
            session,
            remote,
            guest,
            enabler,
            messenger,
            token,
            ConstructTimings::default(),
        )
    }

    pub fn with_timings(
        session: ProvisionSession,
        remote: Arc<dyn RemoteManager>,
        guest: Arc<dyn GuestManager>,
        enabler: Arc<dyn WinRmEnabler>,
        messenger: Arc<dyn ConstructMessenger>,
        token: CancellationToken,
        timings: ConstructTimings,
    ) -> Self {
        let validator = VmConnectionValidator::new(remote.clone());
        Self {
            ctx: Arc::new(ConstructContext {
                session,
                remote,
                guest,
                enabler,
                validator,
                messenger,
                timings,
                token,
            }),
        }
    }

    pub fn session(&self) -> &ProvisionSession {
        &self.ctx.session
    }

    /// Run all phases in order, stopping at the first failure, then wait
    /// for the guest to power off.
    pub async fn prepare_vm(&self) -> WinprepResult<PipelineMetrics> {
        tracing::info!(
            host = %self.ctx.session.guest_address,
            username = %self.ctx.session.username,
            artifacts = self.ctx.session.artifacts.len(),
            "Preparing VM"
        );

        let metrics = PipelineExecutor::execute(execution_plan(), self.ctx.clone()).await?;
        metrics.log_summary();

        shutdown::wait_for_power_off(&self.ctx).await?;
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WinprepError;
    use crate::remote::{ABORT_REBOOT_COMMAND, TRIAL_REBOOT_COMMAND};
    use crate::testing::{FakeGuest, FakeRemote, RecordingMessenger, Reply};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const SETUP: &str = r"powershell.exe C:\provision\Setup.ps1 -Version 2019.12";
    const POST_REBOOT: &str = r"powershell.exe C:\provision\PostReboot.ps1";

    #[derive(Default)]
    struct CountingEnabler(AtomicUsize);

    #[async_trait]
    impl WinRmEnabler for CountingEnabler {
        async fn enable(&self) -> WinprepResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session() -> ProvisionSession {
        ProvisionSession {
            guest_address: "10.0.0.5".into(),
            username: "Administrator".into(),
            artifacts: vec![Artifact {
                label: "LGPO".into(),
                local_path: PathBuf::from("/artifacts/LGPO.zip"),
                remote_path: r"C:\provision\LGPO.zip".into(),
            }],
            archive: r"C:\provision\StemcellAutomation.zip".into(),
            provision_dir: PROVISION_DIR.into(),
            setup_command: SETUP.into(),
            post_reboot_command: POST_REBOOT.into(),
        }
    }

    fn timings() -> ConstructTimings {
        ConstructTimings {
            reboot_grace: Duration::from_secs(60),
            reboot_poll_interval: Duration::from_secs(10),
            reboot_timeout: Duration::from_secs(600),
            post_reboot_timeout: Duration::from_secs(3600),
            shutdown_poll_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(600),
        }
    }

    fn construct(
        remote: &Arc<FakeRemote>,
        messenger: &Arc<RecordingMessenger>,
        token: CancellationToken,
    ) -> VmConstruct {
        construct_with_guest(remote, &Arc::new(FakeGuest::default()), messenger, token)
    }

    fn construct_with_guest(
        remote: &Arc<FakeRemote>,
        guest: &Arc<FakeGuest>,
        messenger: &Arc<RecordingMessenger>,
        token: CancellationToken,
    ) -> VmConstruct {
        VmConstruct::with_timings(
            session(),
            remote.clone(),
            guest.clone(),
            Arc::new(CountingEnabler::default()),
            messenger.clone(),
            token,
            timings(),
        )
    }

    #[test]
    fn test_plan_covers_every_phase_in_order() {
        let names = execution_plan().task_names();
        let expected: Vec<&str> = Phase::ALL.iter().map(|p| p.as_str()).collect();
        assert_eq!(names, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_calls_in_order() {
        let remote = Arc::new(FakeRemote::default());
        let messenger = Arc::new(RecordingMessenger::default());

        let metrics = construct(&remote, &messenger, CancellationToken::new())
            .prepare_vm()
            .await
            .unwrap();

        assert_eq!(
            remote.calls(),
            vec![
                "can_reach_vm".to_string(),
                "can_login_vm".to_string(),
                r#"if not exist "C:\provision" mkdir "C:\provision""#.to_string(),
                r"upload /artifacts/LGPO.zip C:\provision\LGPO.zip".to_string(),
                r"extract C:\provision\StemcellAutomation.zip C:\provision\".to_string(),
                SETUP.to_string(),
                TRIAL_REBOOT_COMMAND.to_string(),
                ABORT_REBOOT_COMMAND.to_string(),
                POST_REBOOT.to_string(),
            ]
        );
        assert_eq!(metrics.tasks().count(), 8);

        let events = messenger.events();
        let idx = |e: &str| events.iter().position(|x| x == e).unwrap();
        assert!(idx("execute_setup_script_succeeded") < idx("winrm_disconnected_for_reboot"));
        assert!(idx("wait_for_reboot_started") < idx("reboot_has_started"));
        assert!(idx("reboot_has_finished") < idx("wait_for_reboot_succeeded"));
        assert_eq!(idx("upload_file_started LGPO") + 1, idx("upload_file_succeeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reboot_timeout_fails_wait_phase() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(TRIAL_REBOOT_COMMAND, vec![Reply::Fail("connection refused")]);
        let messenger = Arc::new(RecordingMessenger::default());

        let err = construct(&remote, &messenger, CancellationToken::new())
            .prepare_vm()
            .await
            .unwrap_err();

        assert_eq!(err.failed_phase(), Some("wait_for_reboot"));
        assert!(err.to_string().contains("error polling for reboot"));
        assert_eq!(remote.count(POST_REBOOT), 0);
        assert!(!messenger.events().contains(&"wait_for_reboot_succeeded".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_reboot_transport_error_is_warning() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(POST_REBOOT, vec![Reply::Fail("connection reset by peer")]);
        let messenger = Arc::new(RecordingMessenger::default());

        construct(&remote, &messenger, CancellationToken::new())
            .prepare_vm()
            .await
            .unwrap();

        let events = messenger.events();
        assert!(events.contains(
            &"post_reboot_warning winrm connection event: connection reset by peer".to_string()
        ));
        assert!(events.contains(&"execute_post_reboot_script_succeeded".to_string()));
        assert_eq!(events.last().unwrap(), "shutdown_completed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_reboot_nonzero_fails() {
        let remote = Arc::new(FakeRemote::default());
        remote.script(POST_REBOOT, vec![Reply::Exit(3)]);
        let messenger = Arc::new(RecordingMessenger::default());

        let err = construct(&remote, &messenger, CancellationToken::new())
            .prepare_vm()
            .await
            .unwrap_err();

        assert_eq!(err.failed_phase(), Some("execute_post_reboot_script"));
        assert!(err.to_string().contains("failure in post-reboot script"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_runs_nothing() {
        let remote = Arc::new(FakeRemote::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let token = CancellationToken::new();
        token.cancel();

        let err = construct(&remote, &messenger, token)
            .prepare_vm()
            .await
            .unwrap_err();

        assert!(err.is_interrupted());
        assert_eq!(err.failed_phase(), Some("validate_connection"));
        assert!(remote.calls().is_empty());
        assert!(messenger.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_power_off_after_post_reboot() {
        let remote = Arc::new(FakeRemote::default());
        let guest = Arc::new(FakeGuest::default());
        *guest.power_states.lock() = [Ok(false), Ok(false), Ok(true)].into();
        let messenger = Arc::new(RecordingMessenger::default());

        let start = tokio::time::Instant::now();
        construct_with_guest(&remote, &guest, &messenger, CancellationToken::new())
            .prepare_vm()
            .await
            .unwrap();

        assert_eq!(*guest.power_checks.lock(), 3);
        let events = messenger.events();
        let tail: Vec<&str> = events.iter().rev().take(5).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "execute_post_reboot_script_succeeded",
                "restart_in_progress",
                "restart_in_progress",
                "restart_in_progress",
                "shutdown_completed",
            ]
        );
        // grace, one reboot tick, three power ticks
        assert!(start.elapsed() >= Duration::from_secs(60 + 10 + 3 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_state_error_fails_run() {
        let remote = Arc::new(FakeRemote::default());
        let guest = Arc::new(FakeGuest::default());
        *guest.power_states.lock() = [Err("vm.info failed")].into();
        let messenger = Arc::new(RecordingMessenger::default());

        let err = construct_with_guest(&remote, &guest, &messenger, CancellationToken::new())
            .prepare_vm()
            .await
            .unwrap_err();

        assert_eq!(err.failed_phase(), None);
        assert_eq!(err.to_string(), "error waiting for VM shutdown: vm.info failed");
        assert!(!messenger.events().contains(&"shutdown_completed".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_off_timeout() {
        let remote = Arc::new(FakeRemote::default());
        let guest = Arc::new(FakeGuest::default());
        *guest.power_states.lock() = [Ok(false)].into();
        let messenger = Arc::new(RecordingMessenger::default());

        let err = construct_with_guest(&remote, &guest, &messenger, CancellationToken::new())
            .prepare_vm()
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), WinprepError::Timeout(_)));
        assert!((9..=10).contains(&*guest.power_checks.lock()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_reboot_grace() {
        let remote = Arc::new(FakeRemote::default());
        let messenger = Arc::new(RecordingMessenger::default());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            canceller.cancel();
        });

        let err = construct(&remote, &messenger, token)
            .prepare_vm()
            .await
            .unwrap_err();

        assert!(err.is_interrupted());
        assert_eq!(err.failed_phase(), Some("wait_for_reboot"));
        assert_eq!(remote.count(TRIAL_REBOOT_COMMAND), 0);
        assert_eq!(remote.count(POST_REBOOT), 0);
        let events = messenger.events();
        assert!(!events.contains(&"wait_for_reboot_succeeded".to_string()));
        assert!(!events.contains(&"execute_post_reboot_script_started".to_string()));
    }

    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_phase_failure_logged_once() {
        use tracing_subscriber::layer::SubscriberExt;

        let counter = ErrorCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let remote = Arc::new(FakeRemote::default());
        remote.script(SETUP, vec![Reply::Exit(120)]);
        let messenger = Arc::new(RecordingMessenger::default());

        let err = tracing::subscriber::with_default(subscriber, || {
            runtime.block_on(
                construct(&remote, &messenger, CancellationToken::new()).prepare_vm(),
            )
        })
        .unwrap_err();

        assert_eq!(err.failed_phase(), Some("execute_setup_script"));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}

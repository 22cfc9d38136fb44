//! Pipeline tasks, one per [`Phase`].
//!
//! Every task opens with [`task_start`] and closes with [`task_succeeded`],
//! so the messenger sees exactly one started/succeeded pair per completed
//! phase and nothing for phases that never ran.

mod bootstrap;
mod provision;
mod reboot;
mod scripts;
mod validate;

pub(crate) use bootstrap::EnableRemoteExecTask;
pub(crate) use provision::{CreateProvisionDirTask, ExtractArchiveTask, UploadArtifactsTask};
pub(crate) use reboot::WaitForRebootTask;
pub(crate) use scripts::{ExecutePostRebootScriptTask, ExecuteSetupScriptTask};
pub(crate) use validate::ValidateConnectionTask;

use super::types::{ConstructCtx, Phase};
use crate::errors::{WinprepError, WinprepResult};

fn task_start(ctx: &ConstructCtx, phase: Phase) -> WinprepResult<()> {
    if ctx.token.is_cancelled() {
        return Err(WinprepError::Interrupted);
    }
    tracing::info!(
        phase = phase.as_str(),
        host = %ctx.session.guest_address,
        "Phase started"
    );
    ctx.messenger.phase_started(phase);
    Ok(())
}

fn task_succeeded(ctx: &ConstructCtx, phase: Phase) {
    tracing::info!(phase = phase.as_str(), "Phase succeeded");
    ctx.messenger.phase_succeeded(phase);
}

fn log_task_error(phase: Phase, err: &WinprepError) {
    tracing::error!(phase = phase.as_str(), "Phase failed: {}", err);
}

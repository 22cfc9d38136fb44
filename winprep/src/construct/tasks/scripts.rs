//! Tasks: run the provisioning scripts on the guest.

use async_trait::async_trait;

use super::{log_task_error, task_start, task_succeeded};
use crate::construct::types::{ConstructCtx, Phase};
use crate::errors::{WinprepError, WinprepResult};
use crate::pipeline::PipelineTask;

pub(crate) struct ExecuteSetupScriptTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for ExecuteSetupScriptTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::ExecuteSetupScript;
        task_start(&ctx, phase)?;

        run_setup(&ctx)
            .await
            .inspect_err(|e| log_task_error(phase, e))?;

        task_succeeded(&ctx, phase);
        // The setup script schedules a reboot that drops the connection
        ctx.messenger.winrm_disconnected_for_reboot();
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::ExecuteSetupScript.as_str()
    }
}

async fn run_setup(ctx: &ConstructCtx) -> WinprepResult<()> {
    let command = &ctx.session.setup_command;
    let exit_code = ctx.remote.execute_command(command).await?;
    if exit_code != 0 {
        return Err(WinprepError::RemoteCommand {
            command: command.clone(),
            exit_code,
        });
    }
    Ok(())
}

pub(crate) struct ExecutePostRebootScriptTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for ExecutePostRebootScriptTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::ExecutePostRebootScript;
        task_start(&ctx, phase)?;

        run_post_reboot(&ctx)
            .await
            .inspect_err(|e| log_task_error(phase, e))?;

        task_succeeded(&ctx, phase);
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::ExecutePostRebootScript.as_str()
    }
}

/// The post-reboot script ends by shutting the guest down, which usually
/// severs the connection before an exit code arrives. A lost connection is
/// therefore only a warning; an explicit non-zero exit is a failure.
async fn run_post_reboot(ctx: &ConstructCtx) -> WinprepResult<()> {
    let command = &ctx.session.post_reboot_command;
    match ctx
        .remote
        .execute_command_with_timeout(command, ctx.timings.post_reboot_timeout)
        .await
    {
        Ok(0) => Ok(()),
        Ok(exit_code) => Err(WinprepError::RemoteCommand {
            command: command.clone(),
            exit_code,
        }
        .context("failure in post-reboot script")),
        Err(e) if e.is_interrupted() => Err(e),
        Err(e) => {
            let warning = format!("winrm connection event: {}", e);
            tracing::warn!("{}", warning);
            ctx.messenger.execute_post_reboot_warning(&warning);
            Ok(())
        }
    }
}

//! Task: wait out the reboot triggered by the setup script.

use async_trait::async_trait;

use super::{log_task_error, task_start, task_succeeded};
use crate::construct::types::{ConstructCtx, Phase};
use crate::errors::{WinprepError, WinprepResult};
use crate::pipeline::PipelineTask;
use crate::poller::IntervalPoller;
use crate::remote::{RebootChecker, RebootWaiter};

pub(crate) struct WaitForRebootTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for WaitForRebootTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::WaitForReboot;
        task_start(&ctx, phase)?;
        ctx.messenger.reboot_has_started();

        wait_for_reboot(&ctx)
            .await
            .inspect_err(|e| log_task_error(phase, e))?;

        ctx.messenger.reboot_has_finished();
        task_succeeded(&ctx, phase);
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::WaitForReboot.as_str()
    }
}

async fn wait_for_reboot(ctx: &ConstructCtx) -> WinprepResult<()> {
    // The guest may still be up when the setup script returns
    tracing::debug!(
        grace_secs = ctx.timings.reboot_grace.as_secs(),
        "Waiting before checking for reboot"
    );
    tokio::select! {
        _ = ctx.token.cancelled() => return Err(WinprepError::Interrupted),
        _ = tokio::time::sleep(ctx.timings.reboot_grace) => {}
    }

    let waiter = RebootWaiter::new(
        IntervalPoller::new(ctx.timings.reboot_poll_interval, ctx.token.clone()),
        RebootChecker::new(ctx.remote.clone()),
        ctx.timings.reboot_timeout,
    );
    waiter.wait_for_reboot_finished().await
}

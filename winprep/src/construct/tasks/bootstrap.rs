//! Task: enable WinRM in the guest through the management plane.

use async_trait::async_trait;

use super::{log_task_error, task_start, task_succeeded};
use crate::construct::types::{ConstructCtx, Phase};
use crate::errors::WinprepResult;
use crate::pipeline::PipelineTask;

pub(crate) struct EnableRemoteExecTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for EnableRemoteExecTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::EnableRemoteExec;
        task_start(&ctx, phase)?;

        ctx.enabler
            .enable()
            .await
            .inspect_err(|e| log_task_error(phase, e))?;

        task_succeeded(&ctx, phase);
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::EnableRemoteExec.as_str()
    }
}

//! Task: make sure the guest is reachable and accepts our credentials.

use async_trait::async_trait;

use super::{log_task_error, task_start, task_succeeded};
use crate::construct::types::{ConstructCtx, Phase};
use crate::errors::WinprepResult;
use crate::pipeline::PipelineTask;

pub(crate) struct ValidateConnectionTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for ValidateConnectionTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::ValidateConnection;
        task_start(&ctx, phase)?;

        ctx.validator
            .validate()
            .await
            .inspect_err(|e| log_task_error(phase, e))?;

        task_succeeded(&ctx, phase);
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::ValidateConnection.as_str()
    }
}

//! Tasks: stage provisioning artifacts on the guest.
//!
//! - CreateProvisionDir: ensure the provision directory exists
//! - UploadArtifacts: copy each local artifact to its guest path
//! - ExtractArchive: expand the automation bundle in place
//!
//! Nothing here is rolled back on failure; partial state stays on the guest
//! for diagnosis.

use async_trait::async_trait;

use super::{log_task_error, task_start, task_succeeded};
use crate::construct::types::{ConstructCtx, Phase};
use crate::errors::{WinprepError, WinprepResult};
use crate::pipeline::PipelineTask;

pub(crate) struct CreateProvisionDirTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for CreateProvisionDirTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::CreateProvisionDir;
        task_start(&ctx, phase)?;

        create_dir(&ctx)
            .await
            .inspect_err(|e| log_task_error(phase, e))?;

        task_succeeded(&ctx, phase);
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::CreateProvisionDir.as_str()
    }
}

async fn create_dir(ctx: &ConstructCtx) -> WinprepResult<()> {
    let dir = ctx.session.provision_dir.trim_end_matches('\\');
    let command = mkdir_command(dir);
    let exit_code = ctx.remote.execute_command(&command).await?;
    if exit_code != 0 {
        return Err(WinprepError::RemoteCommand { command, exit_code }
            .context(format!("directory `{}` could not be created", dir)));
    }
    Ok(())
}

/// Idempotent mkdir for cmd.exe.
pub(crate) fn mkdir_command(dir: &str) -> String {
    format!(r#"if not exist "{dir}" mkdir "{dir}""#)
}

pub(crate) struct UploadArtifactsTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for UploadArtifactsTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::UploadArtifacts;
        task_start(&ctx, phase)?;

        for artifact in &ctx.session.artifacts {
            ctx.messenger.upload_file_started(&artifact.label);
            tracing::debug!(
                local = %artifact.local_path.display(),
                remote = %artifact.remote_path,
                "Uploading artifact"
            );
            ctx.remote
                .upload_artifact(&artifact.local_path, &artifact.remote_path)
                .await
                .inspect_err(|e| log_task_error(phase, e))?;
            ctx.messenger.upload_file_succeeded();
        }

        task_succeeded(&ctx, phase);
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::UploadArtifacts.as_str()
    }
}

pub(crate) struct ExtractArchiveTask;

#[async_trait]
impl PipelineTask<ConstructCtx> for ExtractArchiveTask {
    async fn run(self: Box<Self>, ctx: ConstructCtx) -> WinprepResult<()> {
        let phase = Phase::ExtractArchive;
        task_start(&ctx, phase)?;

        ctx.remote
            .extract_archive(&ctx.session.archive, &ctx.session.provision_dir)
            .await
            .inspect_err(|e| log_task_error(phase, e))?;

        task_succeeded(&ctx, phase);
        Ok(())
    }

    fn name(&self) -> &str {
        Phase::ExtractArchive.as_str()
    }
}

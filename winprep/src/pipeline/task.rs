use async_trait::async_trait;

use crate::errors::WinprepResult;

/// A unit of work run by the [`PipelineExecutor`](super::PipelineExecutor).
///
/// The context is cloned per task; share state through `Arc` and interior
/// mutability.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> WinprepResult<()>;

    /// Stable name, used as the phase label in errors and metrics.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;

//! Table-driven pipeline execution.
//!
//! ```text
//! ExecutionPlan → Stages → Tasks
//!
//! - ExecutionPlan: ordered list of stages, consumed by the executor
//! - Stage: a labelled group of tasks, run one after another
//! - Task: one atomic unit of work; its name identifies it in errors and metrics
//! ```
//!
//! Execution is strictly sequential. The first failing task terminates the
//! run: its error is wrapped as [`WinprepError::Phase`](crate::errors::WinprepError::Phase)
//! carrying the task name, and no later task is started.
//!
//! ## Example
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![
//!     Stage::new("preflight", vec![Box::new(ValidateTask)]),
//!     Stage::new("provision", vec![Box::new(UploadTask), Box::new(ExtractTask)]),
//! ]);
//! let metrics = PipelineExecutor::execute(plan, ctx).await?;
//! tracing::info!(total_ms = metrics.total_duration_ms, "done");
//! ```

mod executor;
mod metrics;
mod stage;
mod task;

pub use executor::{ExecutionPlan, PipelineExecutor};
pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use stage::Stage;
pub use task::{BoxedTask, PipelineTask};

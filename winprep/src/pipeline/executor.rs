use std::time::Instant;

use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::Stage;
use crate::errors::{WinprepError, WinprepResult};

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<Ctx>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<Ctx>>) -> Self {
        Self { stages }
    }

    /// Task names in the order they will run.
    pub fn task_names(&self) -> Vec<String> {
        self.stages.iter().flat_map(|s| s.task_names()).collect()
    }

    pub fn into_stages(self) -> Vec<Stage<Ctx>> {
        self.stages
    }
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Run every task of every stage in order.
    ///
    /// Stops at the first failure and returns it wrapped as
    /// `WinprepError::Phase { phase: <task name> }`.
    pub async fn execute<Ctx>(plan: ExecutionPlan<Ctx>, ctx: Ctx) -> WinprepResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::new();

        for stage in plan.into_stages() {
            let stage_start = Instant::now();
            let label = stage.label;
            let mut task_metrics = Vec::with_capacity(stage.tasks.len());

            tracing::debug!(stage = label, "Entering stage");

            for task in stage.tasks {
                let name = task.name().to_string();
                let task_start = Instant::now();

                if let Err(source) = task.run(ctx.clone()).await {
                    tracing::debug!(stage = label, phase = %name, "Stopping pipeline");
                    return Err(WinprepError::Phase {
                        phase: name,
                        source: Box::new(source),
                    });
                }

                task_metrics.push(TaskMetrics {
                    name,
                    duration_ms: task_start.elapsed().as_millis(),
                });
            }

            stage_metrics.push(StageMetrics {
                label,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        })
    }
}

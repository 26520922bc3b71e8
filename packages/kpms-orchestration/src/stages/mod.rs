// Stage implementations
pub mod fitting_stage;
pub mod latent_stage;
pub mod prep_stage;

// Re-exports
pub use fitting_stage::FittingStage;
pub use latent_stage::LatentDimensionStage;
pub use prep_stage::PrepStage;

use kpms_storage::{PcaTask, TaskKey};
use std::path::PathBuf;

use crate::error::{PipelineError, Result};
use crate::external::output_root;
use crate::pipeline::StageContext;
use crate::stage::StageId;

/// Absolute output directory of a task
pub(crate) fn project_dir(ctx: &StageContext, task: &PcaTask) -> Result<PathBuf> {
    Ok(output_root(ctx.collaborators.roots.as_ref())?.join(&task.output_dir))
}

/// Run collaborator calls on the blocking pool
pub(crate) async fn run_blocking<T, F>(stage: StageId, key: TaskKey, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        PipelineError::StageExecutionFailed(format!(
            "Stage {}: blocking task for {} did not complete: {}",
            stage, key, e
        ))
    })?
}

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use kpms_storage::{DerivedRow, DerivedTable, EntityStore, PcaFitting, TaskKey};
use std::collections::BTreeSet;
use tracing::info;

use super::{project_dir, run_blocking};
use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler};
use crate::project_config::load_dj_config;
use crate::stage::StageId;

/// Fitting stage: fit PCA on the formatted keypoints and save the model
/// into the task's output directory
pub struct FittingStage;

#[async_trait]
impl StageHandler for FittingStage {
    fn stage_id(&self) -> StageId {
        StageId::Fitting
    }

    async fn key_source(&self, store: &dyn EntityStore) -> Result<BTreeSet<TaskKey>> {
        Ok(store.derived_keys(DerivedTable::FormattedDataset).await?)
    }

    async fn make(&self, key: TaskKey, ctx: &StageContext) -> Result<DerivedRow> {
        let task = ctx.store.get_pca_task(key).await?;
        let dataset = ctx.store.get_formatted_dataset(key).await?;
        let project_dir = project_dir(ctx, &task)?;

        info!(
            "FittingStage: {} ({} recordings) in {}",
            key,
            dataset.coordinates.len(),
            project_dir.display()
        );

        let ctx = ctx.clone();
        run_blocking(StageId::Fitting, key, move || {
            let toolkit = &ctx.collaborators.toolkit;
            let config = ctx
                .locks
                .with_lock(&project_dir, || load_dj_config(&project_dir))?;
            config.validate()?;

            let data = toolkit
                .format_data(&config, &dataset.coordinates, &dataset.confidences)
                .context("formatting keypoint data")?;
            let model = toolkit
                .fit_model(&data, &config)
                .context("fitting PCA model")?;

            ctx.locks
                .with_lock(&project_dir, || toolkit.save_model(&model, &project_dir))
                .with_context(|| format!("saving PCA model to {}", project_dir.display()))?;
            Ok(())
        })
        .await?;

        Ok(DerivedRow::PcaFitting(PcaFitting {
            key,
            pca_fitting_time: Utc::now(),
        }))
    }
}

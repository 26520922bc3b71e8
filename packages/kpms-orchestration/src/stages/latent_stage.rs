use anyhow::Context;
use async_trait::async_trait;
use kpms_storage::{DerivedRow, DerivedTable, EntityStore, LatentDimension, TaskKey};
use std::collections::BTreeSet;
use tracing::info;

use super::{project_dir, run_blocking};
use crate::error::Result;
use crate::pipeline::{StageContext, StageHandler};
use crate::stage::StageId;
use crate::variance::{cumulative_sum, estimate_latent_dimension, validate_threshold};

/// Latent dimension stage: components needed to explain the configured
/// variance threshold
pub struct LatentDimensionStage;

#[async_trait]
impl StageHandler for LatentDimensionStage {
    fn stage_id(&self) -> StageId {
        StageId::LatentDimension
    }

    async fn key_source(&self, store: &dyn EntityStore) -> Result<BTreeSet<TaskKey>> {
        Ok(store.derived_keys(DerivedTable::PcaFitting).await?)
    }

    async fn make(&self, key: TaskKey, ctx: &StageContext) -> Result<DerivedRow> {
        let threshold = ctx.config.variance_threshold;
        validate_threshold(threshold)?;

        let task = ctx.store.get_pca_task(key).await?;
        let project_dir = project_dir(ctx, &task)?;

        let toolkit = ctx.collaborators.toolkit.clone();
        let locks = ctx.locks.clone();
        let model = run_blocking(StageId::LatentDimension, key, move || {
            let model = locks
                .with_lock(&project_dir, || toolkit.load_model(&project_dir))
                .with_context(|| format!("loading PCA model from {}", project_dir.display()))?;
            Ok(model)
        })
        .await?;

        let cs = cumulative_sum(&model.explained_variance_ratio);
        let estimate = estimate_latent_dimension(&cs, threshold)?;
        info!("LatentDimensionStage: {} -> {}", key, estimate.description);

        Ok(DerivedRow::LatentDimension(LatentDimension {
            key,
            variance_threshold: threshold,
            variance_percentage: estimate.variance_percentage,
            latent_dimension: estimate.latent_dimension,
            latent_dim_desc: estimate.description,
        }))
    }
}

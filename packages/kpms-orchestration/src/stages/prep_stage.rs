use anyhow::Context;
use async_trait::async_trait;
use kpms_storage::{
    Bodyparts, DerivedRow, EntityStore, FormatMethod, FormattedDataset, TaskKey, TaskMode,
    VideoFile, VideoStats,
};
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{project_dir, run_blocking};
use crate::error::{PipelineError, Result};
use crate::external::{find_full_path, search_roots};
use crate::pipeline::{StageContext, StageHandler};
use crate::project_config::{check_bodyparts, load_dj_config, save_dj_config};
use crate::stage::StageId;

/// Pose-estimation project config inside `kpset_config_dir`
pub const SOURCE_CONFIG_FILE: &str = "config.yaml";

/// Prep stage: project config + formatted keypoints (`FormattedDataset`)
///
/// `trigger` tasks set up a fresh project from the pose-estimation config;
/// `load` tasks reuse the `kpms_dj_config.yml` already in the output
/// directory. Either way the config is rewritten with the task's video
/// directory and body parts before keypoints are loaded.
pub struct PrepStage;

/// Everything `prepare` needs, resolved before leaving the async context
struct PrepInputs {
    key: TaskKey,
    task_mode: TaskMode,
    format: FormatMethod,
    bodyparts: Bodyparts,
    project_dir: PathBuf,
    config_dir: PathBuf,
    videos_dir: PathBuf,
    patterns: Vec<String>,
    /// (video_id, absolute path), in stored order
    videos: Vec<(i64, PathBuf)>,
}

#[async_trait]
impl StageHandler for PrepStage {
    fn stage_id(&self) -> StageId {
        StageId::Prep
    }

    async fn key_source(&self, store: &dyn EntityStore) -> Result<BTreeSet<TaskKey>> {
        Ok(store.task_keys_with_videos().await?)
    }

    async fn make(&self, key: TaskKey, ctx: &StageContext) -> Result<DerivedRow> {
        let store = ctx.store.as_ref();
        let kpset = store.get_keypoint_set(key.kpset_id).await?;
        // Format and body part checks run before anything touches the output directory
        if kpset.format_method != FormatMethod::DeepLabCut {
            return Err(PipelineError::UnsupportedFormat(kpset.format_method));
        }

        let bodyparts = store.get_bodyparts(key).await?;
        check_bodyparts(&bodyparts)?;
        let task = store.get_pca_task(key).await?;
        let videos = store.video_files(key.kpset_id).await?;
        if videos.is_empty() {
            return Err(PipelineError::MissingUpstream(format!(
                "keypoint set {} has no video files",
                key.kpset_id
            )));
        }

        let roots = search_roots(ctx.collaborators.roots.as_ref());
        let config_dir = find_full_path(&roots, &kpset.config_dir)?;
        let videos_dir = find_full_path(&roots, &kpset.videos_dir)?;
        let resolved = videos
            .iter()
            .map(|video| -> Result<(i64, PathBuf)> {
                Ok((video.video_id, find_full_path(&roots, &video.video_path)?))
            })
            .collect::<Result<Vec<_>>>()?;

        let inputs = PrepInputs {
            key,
            task_mode: task.task_mode,
            format: kpset.format_method,
            bodyparts,
            project_dir: project_dir(ctx, &task)?,
            patterns: keypoint_patterns(&videos_dir, &videos),
            config_dir,
            videos_dir,
            videos: resolved,
        };

        info!(
            "PrepStage: {} ({} mode, {} videos) -> {}",
            key,
            inputs.task_mode,
            inputs.videos.len(),
            inputs.project_dir.display()
        );

        let ctx = ctx.clone();
        let dataset = run_blocking(StageId::Prep, key, move || prepare(inputs, &ctx)).await?;
        Ok(DerivedRow::FormattedDataset(dataset))
    }
}

fn prepare(inputs: PrepInputs, ctx: &StageContext) -> Result<FormattedDataset> {
    let toolkit = &ctx.collaborators.toolkit;

    ctx.locks.with_lock(&inputs.project_dir, || -> Result<()> {
        let mut config = match inputs.task_mode {
            TaskMode::Trigger => {
                let source = inputs.config_dir.join(SOURCE_CONFIG_FILE);
                toolkit
                    .setup_project(&inputs.project_dir, &source)
                    .with_context(|| {
                        format!("setting up project {}", inputs.project_dir.display())
                    })?;
                toolkit
                    .load_config(&inputs.project_dir)
                    .context("loading generated project config")?
            }
            TaskMode::Load => load_dj_config(&inputs.project_dir)?,
        };
        config.overlay(&inputs.videos_dir, &inputs.bodyparts);
        config.validate()?;
        let path = save_dj_config(&inputs.project_dir, &config)?;
        debug!("PrepStage: {} wrote {}", inputs.key, path.display());
        Ok(())
    })?;

    let loaded = ctx
        .collaborators
        .toolkit
        .load_keypoints(&inputs.patterns, inputs.format)
        .context("loading keypoints")?;

    let reader = &ctx.collaborators.video_reader;
    let video_stats = inputs
        .videos
        .par_iter()
        .map(|(video_id, path)| -> Result<VideoStats> {
            let metadata = reader
                .read(path)
                .with_context(|| format!("reading video metadata of {}", path.display()))?;
            Ok(VideoStats {
                video_id: *video_id,
                height: metadata.height,
                width: metadata.width,
                frame_count: metadata.frame_count,
                frame_rate: truncate_frame_rate(metadata.frame_rate),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let frame_rates: Vec<u32> = video_stats.iter().map(|stats| stats.frame_rate).collect();
    let average = average_frame_rate(&frame_rates);

    Ok(FormattedDataset {
        key: inputs.key,
        coordinates: loaded.coordinates,
        confidences: loaded.confidences,
        formatted_bodyparts: loaded.bodyparts,
        video_stats,
        frame_rates,
        average_frame_rate: average,
    })
}

/// `<videos_dir>/<file stem>*` for every video
pub fn keypoint_patterns(videos_dir: &Path, videos: &[VideoFile]) -> Vec<String> {
    videos
        .iter()
        .map(|video| {
            let stem = Path::new(&video.video_path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            videos_dir
                .join(format!("{}*", stem))
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// Whole frames per second (truncated; NaN and negatives become 0)
pub fn truncate_frame_rate(frame_rate: f64) -> u32 {
    frame_rate as u32
}

/// Truncated plain mean; 0 for no videos
pub fn average_frame_rate(frame_rates: &[u32]) -> u32 {
    if frame_rates.is_empty() {
        return 0;
    }
    let total: u64 = frame_rates.iter().map(|&fps| u64::from(fps)).sum();
    (total / frame_rates.len() as u64) as u32
}

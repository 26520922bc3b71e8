//! Collaborator ports
//!
//! Video decoding, keypoint parsing and PCA fitting live outside this crate.
//! Stages reach them only through the traits below; calls are blocking and
//! run on the tokio blocking pool.

use kpms_storage::{FormatMethod, NdArray, RecordingArrays};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::project_config::ProjectConfig;

// ═══════════════════════════════════════════════════════════════════════════
// Root directories
// ═══════════════════════════════════════════════════════════════════════════

/// Data roots that relative paths in the entity store are resolved against
pub trait RootDirectories: Send + Sync {
    fn root_dirs(&self) -> Vec<PathBuf>;

    /// Where output directories live; `None` falls back to the first root
    fn processed_dir(&self) -> Option<PathBuf>;
}

/// Fixed root list, usually built from `PipelineConfig`
#[derive(Debug, Clone, Default)]
pub struct StaticRootDirectories {
    roots: Vec<PathBuf>,
    processed: Option<PathBuf>,
}

impl StaticRootDirectories {
    pub fn new(roots: Vec<PathBuf>, processed: Option<PathBuf>) -> Self {
        Self { roots, processed }
    }
}

impl RootDirectories for StaticRootDirectories {
    fn root_dirs(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }

    fn processed_dir(&self) -> Option<PathBuf> {
        self.processed.clone()
    }
}

/// Roots searched by `find_full_path`: the data roots, then the processed
/// directory if it is not one of them
pub fn search_roots(dirs: &dyn RootDirectories) -> Vec<PathBuf> {
    let mut roots = dirs.root_dirs();
    if let Some(processed) = dirs.processed_dir() {
        if !roots.contains(&processed) {
            roots.push(processed);
        }
    }
    roots
}

/// Directory output directories are relative to
pub fn output_root(dirs: &dyn RootDirectories) -> Result<PathBuf> {
    dirs.processed_dir()
        .or_else(|| dirs.root_dirs().into_iter().next())
        .ok_or_else(|| PipelineError::config("No root data directory configured"))
}

/// Resolve `relative` against the first root under which it exists
///
/// An absolute path is returned unchanged when it exists.
pub fn find_full_path(roots: &[PathBuf], relative: impl AsRef<Path>) -> Result<PathBuf> {
    let relative = relative.as_ref();
    if relative.is_absolute() {
        return if relative.exists() {
            Ok(relative.to_path_buf())
        } else {
            Err(PipelineError::PathNotFound(relative.to_path_buf()))
        };
    }

    roots
        .iter()
        .map(|root| root.join(relative))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| PipelineError::PathNotFound(relative.to_path_buf()))
}

// ═══════════════════════════════════════════════════════════════════════════
// Video metadata
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub height: u32,
    pub width: u32,
    pub frame_count: u64,
    /// Frames per second as reported by the container
    pub frame_rate: f64,
}

pub trait VideoMetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> anyhow::Result<VideoMetadata>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Keypoint toolkit
// ═══════════════════════════════════════════════════════════════════════════

/// Output of `KeypointToolkit::load_keypoints`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedKeypoints {
    pub coordinates: RecordingArrays,
    pub confidences: RecordingArrays,
    /// Order matches the bodypart axis of the arrays
    pub bodyparts: Vec<String>,
}

/// Fitting input produced by `KeypointToolkit::format_data`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelInput {
    pub recordings: Vec<String>,
    /// Stacked, padded keypoint coordinates
    pub y: Option<NdArray>,
    pub conf: Option<NdArray>,
    /// 1 for real frames, 0 for padding
    pub mask: Option<NdArray>,
}

/// Fitted PCA model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaModel {
    /// Per component, in decreasing order
    pub explained_variance_ratio: Vec<f64>,
}

/// Keypoint-modelling library
pub trait KeypointToolkit: Send + Sync {
    /// Create a project in `project_dir` from the pose-estimation `config.yaml`
    fn setup_project(&self, project_dir: &Path, source_config: &Path) -> anyhow::Result<()>;

    /// Read the config document generated by `setup_project`
    fn load_config(&self, project_dir: &Path) -> anyhow::Result<ProjectConfig>;

    /// Load keypoints for the files matching `patterns` (`<dir>/<stem>*`)
    fn load_keypoints(
        &self,
        patterns: &[String],
        format: FormatMethod,
    ) -> anyhow::Result<LoadedKeypoints>;

    fn format_data(
        &self,
        config: &ProjectConfig,
        coordinates: &RecordingArrays,
        confidences: &RecordingArrays,
    ) -> anyhow::Result<ModelInput>;

    fn fit_model(&self, data: &ModelInput, config: &ProjectConfig) -> anyhow::Result<PcaModel>;

    fn save_model(&self, model: &PcaModel, project_dir: &Path) -> anyhow::Result<()>;

    fn load_model(&self, project_dir: &Path) -> anyhow::Result<PcaModel>;
}

/// Collaborators handed to every stage
#[derive(Clone)]
pub struct Collaborators {
    pub roots: Arc<dyn RootDirectories>,
    pub video_reader: Arc<dyn VideoMetadataReader>,
    pub toolkit: Arc<dyn KeypointToolkit>,
}

impl Collaborators {
    pub fn new(
        roots: Arc<dyn RootDirectories>,
        video_reader: Arc<dyn VideoMetadataReader>,
        toolkit: Arc<dyn KeypointToolkit>,
    ) -> Self {
        Self {
            roots,
            video_reader,
            toolkit,
        }
    }
}

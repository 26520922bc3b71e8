//! Entity models
//!
//! Manual entities (`KeypointSet`, `Bodyparts`, `PcaTask`) are written by
//! operators. Derived entities (`FormattedDataset`, `PcaFitting`,
//! `LatentDimension`) are written once per `TaskKey` by the pipeline and never
//! updated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, StorageError};

// ═══════════════════════════════════════════════════════════════════════════
// Lookup values
// ═══════════════════════════════════════════════════════════════════════════

/// Pose estimation method that produced a keypoint set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatMethod {
    #[serde(rename = "deeplabcut")]
    DeepLabCut,
    Sleap,
    Anipose,
    SleapAnipose,
    Nwb,
    Facemap,
}

impl FormatMethod {
    pub const ALL: [FormatMethod; 6] = [
        FormatMethod::DeepLabCut,
        FormatMethod::Sleap,
        FormatMethod::Anipose,
        FormatMethod::SleapAnipose,
        FormatMethod::Nwb,
        FormatMethod::Facemap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatMethod::DeepLabCut => "deeplabcut",
            FormatMethod::Sleap => "sleap",
            FormatMethod::Anipose => "anipose",
            FormatMethod::SleapAnipose => "sleap-anipose",
            FormatMethod::Nwb => "nwb",
            FormatMethod::Facemap => "facemap",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FormatMethod::DeepLabCut => {
                "`.csv` and `.h5/.hdf5` files generated by DeepLabcut analysis"
            }
            FormatMethod::Sleap => "`.slp` and `.h5/.hdf5` files generated by SLEAP analysis",
            FormatMethod::Anipose => "`.csv` files generated by anipose analysis",
            FormatMethod::SleapAnipose => "`.h5/.hdf5` files generated by sleap-anipose analysis",
            FormatMethod::Nwb => "`.nwb` files with Neurodata Without Borders (NWB) format",
            FormatMethod::Facemap => "`.h5` files generated by Facemap analysis",
        }
    }
}

impl FromStr for FormatMethod {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        FormatMethod::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| StorageError::config(format!("Unknown format method: {}", s)))
    }
}

impl fmt::Display for FormatMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lookup row describing a supported pose estimation method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoseEstimationMethod {
    pub format_method: FormatMethod,
    pub pose_estimation_desc: String,
}

impl PoseEstimationMethod {
    /// Seed contents of the lookup table, one row per `FormatMethod`
    pub fn contents() -> Vec<Self> {
        FormatMethod::ALL
            .iter()
            .map(|m| Self {
                format_method: *m,
                pose_estimation_desc: m.description().to_string(),
            })
            .collect()
    }
}

/// How the Prep stage obtains the project config document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskMode {
    /// Read the config document already present in the output directory
    Load,
    /// Generate a fresh config document from the source project defaults
    Trigger,
}

impl TaskMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskMode::Load => "load",
            TaskMode::Trigger => "trigger",
        }
    }
}

impl FromStr for TaskMode {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "load" => Ok(TaskMode::Load),
            "trigger" => Ok(TaskMode::Trigger),
            _ => Err(StorageError::config(format!("Invalid task mode: {}", s))),
        }
    }
}

impl fmt::Display for TaskMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Manual entities
// ═══════════════════════════════════════════════════════════════════════════

/// Keypoint data and video set used to train a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeypointSet {
    pub kpset_id: i64,
    pub format_method: FormatMethod,
    /// Relative to a root data directory
    pub config_dir: String,
    /// Relative to a root data directory
    pub videos_dir: String,
    #[serde(default)]
    pub description: String,
}

impl KeypointSet {
    pub fn new(
        kpset_id: i64,
        format_method: FormatMethod,
        config_dir: impl Into<String>,
        videos_dir: impl Into<String>,
    ) -> Self {
        Self {
            kpset_id,
            format_method,
            config_dir: config_dir.into(),
            videos_dir: videos_dir.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Part of `KeypointSet`: one video used for training
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFile {
    pub kpset_id: i64,
    pub video_id: i64,
    /// Relative to a root data directory
    pub video_path: String,
}

impl VideoFile {
    pub fn new(kpset_id: i64, video_id: i64, video_path: impl Into<String>) -> Self {
        Self {
            kpset_id,
            video_id,
            video_path: video_path.into(),
        }
    }
}

/// Primary key shared by `Bodyparts`, `PcaTask` and every derived stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub kpset_id: i64,
    pub bodyparts_id: i64,
}

impl TaskKey {
    pub fn new(kpset_id: i64, bodyparts_id: i64) -> Self {
        Self {
            kpset_id,
            bodyparts_id,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kpset_id={}, bodyparts_id={}",
            self.kpset_id, self.bodyparts_id
        )
    }
}

/// Body-part selection for one keypoint set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bodyparts {
    pub key: TaskKey,
    pub anterior_bodyparts: Vec<String>,
    pub posterior_bodyparts: Vec<String>,
    pub use_bodyparts: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// Intent to run the pipeline for one body-part selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcaTask {
    pub key: TaskKey,
    /// Relative to the processed data directory
    pub output_dir: String,
    pub task_mode: TaskMode,
}

impl PcaTask {
    pub fn new(key: TaskKey, output_dir: impl Into<String>, task_mode: TaskMode) -> Self {
        Self {
            key,
            output_dir: output_dir.into(),
            task_mode,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Derived entities
// ═══════════════════════════════════════════════════════════════════════════

/// Dense row-major array of `f64`
///
/// Decoding goes through [`NdArray::new`], so a stored blob whose shape
/// and data disagree is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNdArray")]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawNdArray {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl TryFrom<RawNdArray> for NdArray {
    type Error = StorageError;

    fn try_from(raw: RawNdArray) -> Result<Self> {
        NdArray::new(raw.shape, raw.data)
    }
}

impl NdArray {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(StorageError::serialization(format!(
                "Array shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Recording name → array
pub type RecordingArrays = BTreeMap<String, NdArray>;

/// Per-video metadata captured during Prep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoStats {
    pub video_id: i64,
    pub height: u32,
    pub width: u32,
    pub frame_count: u64,
    pub frame_rate: u32,
}

/// Prep stage result: keypoints formatted for fitting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedDataset {
    pub key: TaskKey,
    /// (n_frames, n_bodyparts, 2|3) per recording
    pub coordinates: RecordingArrays,
    /// (n_frames, n_bodyparts) per recording
    pub confidences: RecordingArrays,
    /// Order matches the bodypart axis of `coordinates` and `confidences`
    pub formatted_bodyparts: Vec<String>,
    pub video_stats: Vec<VideoStats>,
    pub frame_rates: Vec<u32>,
    pub average_frame_rate: u32,
}

/// Fitting stage result; the model itself lives in the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcaFitting {
    pub key: TaskKey,
    pub pca_fitting_time: DateTime<Utc>,
}

/// Number of principal components explaining a variance threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatentDimension {
    pub key: TaskKey,
    pub variance_threshold: f64,
    pub variance_percentage: f64,
    pub latent_dimension: u32,
    pub latent_dim_desc: String,
}

/// Tables written by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DerivedTable {
    FormattedDataset,
    PcaFitting,
    LatentDimension,
}

impl DerivedTable {
    pub const ALL: [DerivedTable; 3] = [
        DerivedTable::FormattedDataset,
        DerivedTable::PcaFitting,
        DerivedTable::LatentDimension,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            DerivedTable::FormattedDataset => "formatted_dataset",
            DerivedTable::PcaFitting => "pca_fitting",
            DerivedTable::LatentDimension => "latent_dimension",
        }
    }
}

impl fmt::Display for DerivedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// One row of a derived table
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedRow {
    FormattedDataset(FormattedDataset),
    PcaFitting(PcaFitting),
    LatentDimension(LatentDimension),
}

impl DerivedRow {
    pub fn key(&self) -> TaskKey {
        match self {
            DerivedRow::FormattedDataset(row) => row.key,
            DerivedRow::PcaFitting(row) => row.key,
            DerivedRow::LatentDimension(row) => row.key,
        }
    }

    pub fn table(&self) -> DerivedTable {
        match self {
            DerivedRow::FormattedDataset(_) => DerivedTable::FormattedDataset,
            DerivedRow::PcaFitting(_) => DerivedTable::PcaFitting,
            DerivedRow::LatentDimension(_) => DerivedTable::LatentDimension,
        }
    }
}

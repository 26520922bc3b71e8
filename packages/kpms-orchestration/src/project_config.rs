//! Keypoint project config document (`kpms_dj_config.yml`)
//!
//! The toolkit generates a `config.yml` when a project is set up. The
//! pipeline keeps its own copy next to it with the video directory and body
//! part selection filled in; Fitting reads only that copy.

use kpms_storage::Bodyparts;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

pub const DJ_CONFIG_FILE: &str = "kpms_dj_config.yml";

/// Project config; keys the pipeline does not touch are kept as-is
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_dir: Option<String>,

    /// Every bodypart tracked by the pose-estimation project
    #[serde(default)]
    pub bodyparts: Vec<String>,

    #[serde(default)]
    pub use_bodyparts: Vec<String>,

    #[serde(default)]
    pub anterior_bodyparts: Vec<String>,

    #[serde(default)]
    pub posterior_bodyparts: Vec<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ProjectConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Set the video directory and body part selection of a task
    pub fn overlay(&mut self, video_dir: &Path, bodyparts: &Bodyparts) {
        self.video_dir = Some(video_dir.to_string_lossy().into_owned());
        self.anterior_bodyparts = bodyparts.anterior_bodyparts.clone();
        self.posterior_bodyparts = bodyparts.posterior_bodyparts.clone();
        self.use_bodyparts = bodyparts.use_bodyparts.clone();
    }

    /// Check the selected body parts are tracked by the project
    ///
    /// Skipped while `bodyparts` is unknown. A mismatch means the generated
    /// or existing document disagrees with the task, not that the task
    /// itself is malformed.
    pub fn validate(&self) -> Result<()> {
        if self.bodyparts.is_empty() {
            return Ok(());
        }
        match self
            .use_bodyparts
            .iter()
            .find(|bp| !self.bodyparts.contains(bp))
        {
            Some(unknown) => Err(PipelineError::ConfigMismatch(format!(
                "use_bodyparts entry '{}' is not a tracked bodypart",
                unknown
            ))),
            None => Ok(()),
        }
    }
}

/// Anterior and posterior parts must be among the used parts
///
/// Needs only the `Bodyparts` row, so it runs before anything is written.
pub fn check_bodyparts(bodyparts: &Bodyparts) -> Result<()> {
    for (field, parts) in [
        ("anterior_bodyparts", &bodyparts.anterior_bodyparts),
        ("posterior_bodyparts", &bodyparts.posterior_bodyparts),
    ] {
        if let Some(unknown) = parts
            .iter()
            .find(|bp| !bodyparts.use_bodyparts.contains(bp))
        {
            return Err(PipelineError::config(format!(
                "{} entry '{}' is not in use_bodyparts ({})",
                field, unknown, bodyparts.key
            )));
        }
    }
    Ok(())
}

pub fn dj_config_path(project_dir: &Path) -> PathBuf {
    project_dir.join(DJ_CONFIG_FILE)
}

/// Write `kpms_dj_config.yml` into `project_dir`
///
/// The document is written to a temporary file and renamed into place.
pub fn save_dj_config(project_dir: &Path, config: &ProjectConfig) -> Result<PathBuf> {
    std::fs::create_dir_all(project_dir)?;
    let path = dj_config_path(project_dir);
    let tmp = project_dir.join(format!(".{}.tmp", DJ_CONFIG_FILE));
    std::fs::write(&tmp, config.to_yaml_string()?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}

/// Read `kpms_dj_config.yml` from `project_dir`
pub fn load_dj_config(project_dir: &Path) -> Result<ProjectConfig> {
    let path = dj_config_path(project_dir);
    if !path.exists() {
        return Err(PipelineError::MissingArtifact(path));
    }
    let content = std::fs::read_to_string(&path)?;
    ProjectConfig::from_yaml_str(&content)
}

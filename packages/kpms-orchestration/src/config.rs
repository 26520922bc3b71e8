//! Pipeline configuration (YAML file + environment overrides)
//!
//! ```yaml
//! version: 1
//! database: kpms.db
//! root_dirs: [/data/raw]
//! processed_dir: /data/processed
//! stages:
//!   parallel_workers: 1
//!   variance_threshold: 0.9
//! log_level: info
//! ```
//!
//! Environment variables override the file: `KPMS_DATABASE`,
//! `KPMS_ROOT_DIRS` (`:`-separated), `KPMS_PROCESSED_DIR`,
//! `KPMS_VARIANCE_THRESHOLD`, `KPMS_PARALLEL_WORKERS`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::external::StaticRootDirectories;
use crate::pipeline::StageConfig;
use crate::variance::validate_threshold;

pub const ENV_DATABASE: &str = "KPMS_DATABASE";
pub const ENV_ROOT_DIRS: &str = "KPMS_ROOT_DIRS";
pub const ENV_PROCESSED_DIR: &str = "KPMS_PROCESSED_DIR";
pub const ENV_VARIANCE_THRESHOLD: &str = "KPMS_VARIANCE_THRESHOLD";
pub const ENV_PARALLEL_WORKERS: &str = "KPMS_PARALLEL_WORKERS";

const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Schema version (always 1)
    #[serde(default = "default_version")]
    pub version: u32,

    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Roots that keypoint and video paths are relative to
    #[serde(default)]
    pub root_dirs: Vec<PathBuf>,

    /// Root of task output directories; first root dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_dir: Option<PathBuf>,

    #[serde(default)]
    pub stages: StageConfig,

    /// Default `tracing` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> u32 {
    SUPPORTED_VERSION
}

fn default_database() -> PathBuf {
    PathBuf::from("kpms.db")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            database: default_database(),
            root_dirs: Vec::new(),
            processed_dir: None,
            stages: StageConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    /// Parse a YAML document (not validated)
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        if config.version != SUPPORTED_VERSION {
            return Err(PipelineError::config(format!(
                "Unsupported config version {} (supported: {})",
                config.version, SUPPORTED_VERSION
            )));
        }
        Ok(config)
    }

    /// Load a YAML file (not validated)
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply `KPMS_*` variables from the process environment
    pub fn with_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(database) = var(ENV_DATABASE) {
            self.database = PathBuf::from(database);
        }
        if let Some(roots) = var(ENV_ROOT_DIRS) {
            self.root_dirs = roots
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(processed) = var(ENV_PROCESSED_DIR) {
            self.processed_dir = Some(PathBuf::from(processed));
        }
        if let Some(threshold) = var(ENV_VARIANCE_THRESHOLD) {
            self.stages.variance_threshold = threshold.trim().parse().map_err(|e| {
                PipelineError::config(format!("{}={}: {}", ENV_VARIANCE_THRESHOLD, threshold, e))
            })?;
        }
        if let Some(workers) = var(ENV_PARALLEL_WORKERS) {
            self.stages.parallel_workers = workers.trim().parse().map_err(|e| {
                PipelineError::config(format!("{}={}: {}", ENV_PARALLEL_WORKERS, workers, e))
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_dirs.is_empty() {
            return Err(PipelineError::config(
                "At least one root data directory is required",
            ));
        }
        validate_threshold(self.stages.variance_threshold)
            .map_err(|e| PipelineError::config(e.to_string()))?;
        Ok(())
    }

    pub fn root_directories(&self) -> StaticRootDirectories {
        StaticRootDirectories::new(self.root_dirs.clone(), self.processed_dir.clone())
    }
}

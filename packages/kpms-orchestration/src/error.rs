use kpms_storage::{ErrorKind, FormatMethod, StorageError};
use std::path::PathBuf;
use thiserror::Error;

use crate::stage::StageId;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Unsupported format method for keypoint loading: {0}")]
    UnsupportedFormat(FormatMethod),

    #[error("Missing upstream row: {0}")]
    MissingUpstream(String),

    #[error("Path not found under any root directory: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Missing artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Project config does not match the task: {0}")]
    ConfigMismatch(String),

    #[error("Variance error: {0}")]
    Variance(String),

    #[error("Stage not found: {0}")]
    StageNotFound(String),

    #[error("No handler registered for stage {0}")]
    HandlerNotRegistered(StageId),

    #[error("DAG cycle detected")]
    DagCycleDetected,

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("Stage execution failed: {0}")]
    StageExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External call failed: {0:#}")]
    External(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn parse<E: std::fmt::Display>(e: E) -> Self {
        Self::Parse(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    /// Classify for reporting
    ///
    /// Storage errors are split by kind: a missing row means the upstream
    /// stage has not produced it yet, a config error is an operator mistake,
    /// everything else is an infrastructure failure.
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::UnsupportedFormat(_)
            | PipelineError::Variance(_)
            | PipelineError::StageNotFound(_)
            | PipelineError::HandlerNotRegistered(_)
            | PipelineError::DagCycleDetected
            | PipelineError::MissingDependency(_)
            | PipelineError::Parse(_)
            | PipelineError::Config(_) => ErrorCategory::Configuration,

            PipelineError::MissingUpstream(_) => ErrorCategory::UpstreamIncomplete,

            PipelineError::Storage(e) => match e.kind {
                ErrorKind::NotFound => ErrorCategory::UpstreamIncomplete,
                ErrorKind::Config => ErrorCategory::Configuration,
                _ => ErrorCategory::External,
            },

            PipelineError::PathNotFound(_)
            | PipelineError::MissingArtifact(_)
            | PipelineError::ConfigMismatch(_)
            | PipelineError::StageExecutionFailed(_)
            | PipelineError::Io(_)
            | PipelineError::Yaml(_)
            | PipelineError::External(_) => ErrorCategory::External,
        }
    }
}

/// Error category of a failed key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid entity or configuration (e.g., unsupported format); raised before any mutation
    Configuration,
    /// Required upstream row is missing
    UpstreamIncomplete,
    /// I/O, missing file, collaborator or storage failure
    External,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::UpstreamIncomplete => "upstream_incomplete",
            ErrorCategory::External => "external",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "configuration" => Ok(ErrorCategory::Configuration),
            "upstream_incomplete" => Ok(ErrorCategory::UpstreamIncomplete),
            "external" => Ok(ErrorCategory::External),
            _ => Err(PipelineError::parse(format!(
                "Invalid error category: {}",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

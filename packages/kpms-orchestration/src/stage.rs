use kpms_storage::DerivedTable;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Keypoint loading + project config (writes `FormattedDataset`)
    Prep,
    Fitting,
    LatentDimension,
}

impl StageId {
    pub const ALL: [StageId; 3] = [StageId::Prep, StageId::Fitting, StageId::LatentDimension];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Prep => "prep",
            StageId::Fitting => "fitting",
            StageId::LatentDimension => "latent_dimension",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "prep" => Ok(StageId::Prep),
            "fitting" => Ok(StageId::Fitting),
            "latent_dimension" => Ok(StageId::LatentDimension),
            _ => Err(PipelineError::parse(format!("Invalid stage ID: {}", s))),
        }
    }

    /// Table the stage writes its rows into
    pub fn table(&self) -> DerivedTable {
        match self {
            StageId::Prep => DerivedTable::FormattedDataset,
            StageId::Fitting => DerivedTable::PcaFitting,
            StageId::LatentDimension => DerivedTable::LatentDimension,
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

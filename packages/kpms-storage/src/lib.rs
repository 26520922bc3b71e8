//! kpms-storage - entity store for the keypoint PCA pipeline
//!
//! ## Core Principles
//!
//! 1. **Composite keys**: every derived row is keyed by its full upstream key
//! 2. **Insert once**: derived rows are never updated; correction = delete + re-populate
//! 3. **No orphans**: part rows and derived rows cascade with their parents
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kpms_storage::{EntityStore, SqliteEntityStore, TaskKey, DerivedTable};
//!
//! let store = SqliteEntityStore::open("kpms.db")?;
//! store.seed_lookups().await?;
//!
//! // Keys with a FormattedDataset row but no PcaFitting row yet
//! let prepared = store.derived_keys(DerivedTable::FormattedDataset).await?;
//! let fitted = store.derived_keys(DerivedTable::PcaFitting).await?;
//! let pending: Vec<TaskKey> = prepared.difference(&fitted).copied().collect();
//! ```

pub mod domain;
pub mod error;

#[cfg(feature = "sqlite")]
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{
    Bodyparts, DerivedRow, DerivedTable, EntityStore, Fetched, FormatMethod, FormattedDataset,
    KeypointSet, LatentDimension, NdArray, PcaFitting, PcaTask, PoseEstimationMethod,
    RecordingArrays, SchemaRegistry, TableDef, TableTier, TaskKey, TaskMode, VideoFile,
    VideoStats,
};

#[cfg(feature = "sqlite")]
pub use infrastructure::SqliteEntityStore;

//! Domain layer for the entity store
//!
//! # Domain Models
//!
//! - `KeypointSet` (+ `VideoFile` part rows), `Bodyparts`, `PcaTask`: manual
//! - `FormattedDataset`, `PcaFitting`, `LatentDimension`: derived, one row per `TaskKey`
//!
//! # Port Trait
//!
//! - `EntityStore`: primary storage abstraction
//!
//! # Examples
//!
//! ```rust,ignore
//! use kpms_storage::domain::{EntityStore, FormatMethod, KeypointSet, VideoFile};
//!
//! async fn example(store: impl EntityStore) -> Result<()> {
//!     store.seed_lookups().await?;
//!
//!     let kpset = KeypointSet::new(1, FormatMethod::DeepLabCut, "dlc_project", "dlc_project/videos");
//!     let videos = vec![VideoFile::new(1, 1, "dlc_project/videos/mouse1.mp4")];
//!     store.insert_keypoint_set(&kpset, &videos).await?;
//!
//!     let pending = store.task_keys_with_videos().await?;
//!     Ok(())
//! }
//! ```

pub mod fetch;
pub mod models;
pub mod schema;

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::Result;

pub use fetch::Fetched;
pub use models::{
    Bodyparts, DerivedRow, DerivedTable, FormatMethod, FormattedDataset, KeypointSet,
    LatentDimension, NdArray, PcaFitting, PcaTask, PoseEstimationMethod, RecordingArrays,
    TaskKey, TaskMode, VideoFile, VideoStats,
};
pub use schema::{SchemaRegistry, TableDef, TableTier};

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait: EntityStore
// ═══════════════════════════════════════════════════════════════════════════

/// Entity storage abstraction
///
/// # Core Operations
///
/// 1. **Lookup / manual entities**: seed, insert, fetch, delete (cascading)
/// 2. **Key sources**: key sets the pipeline resolves pending work from
/// 3. **Derived rows**: insert-once, fetch, delete for re-population
///
/// Single-row getters fail with `ErrorKind::NotFound` when nothing matches and
/// `ErrorKind::MultipleRows` when the key is ambiguous.
#[async_trait]
pub trait EntityStore: Send + Sync {
    // ═══════════════════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert the `PoseEstimationMethod` contents; existing rows are kept
    ///
    /// # Returns
    ///
    /// Number of rows newly inserted
    async fn seed_lookups(&self) -> Result<usize>;

    async fn list_pose_estimation_methods(&self) -> Result<Vec<PoseEstimationMethod>>;

    // ═══════════════════════════════════════════════════════════════════════
    // Manual entities
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert a keypoint set together with its video files in one transaction
    ///
    /// # Errors
    ///
    /// Fails with `ErrorKind::Constraint` (and inserts nothing) if the set
    /// exists, a video belongs to another set, or the format method is unknown.
    async fn insert_keypoint_set(&self, kpset: &KeypointSet, videos: &[VideoFile]) -> Result<()>;

    /// Add video files to an existing keypoint set (all or nothing)
    async fn insert_video_files(&self, kpset_id: i64, videos: &[VideoFile]) -> Result<()>;

    async fn get_keypoint_set(&self, kpset_id: i64) -> Result<KeypointSet>;

    /// Video files of a keypoint set, ordered by `video_id`
    async fn video_files(&self, kpset_id: i64) -> Result<Vec<VideoFile>>;

    /// Delete a keypoint set with its part rows and everything downstream
    ///
    /// # Returns
    ///
    /// `true` if the set existed
    async fn delete_keypoint_set(&self, kpset_id: i64) -> Result<bool>;

    async fn insert_bodyparts(&self, bodyparts: &Bodyparts) -> Result<()>;

    async fn get_bodyparts(&self, key: TaskKey) -> Result<Bodyparts>;

    async fn insert_pca_task(&self, task: &PcaTask) -> Result<()>;

    async fn get_pca_task(&self, key: TaskKey) -> Result<PcaTask>;

    // ═══════════════════════════════════════════════════════════════════════
    // Key sources
    // ═══════════════════════════════════════════════════════════════════════

    /// `PcaTask` keys whose keypoint set has at least one video file
    async fn task_keys_with_videos(&self) -> Result<BTreeSet<TaskKey>>;

    /// Keys already present in a derived table
    async fn derived_keys(&self, table: DerivedTable) -> Result<BTreeSet<TaskKey>>;

    /// Whether a derived table already holds a row for `key`
    async fn contains_derived(&self, table: DerivedTable, key: TaskKey) -> Result<bool>;

    // ═══════════════════════════════════════════════════════════════════════
    // Derived rows
    // ═══════════════════════════════════════════════════════════════════════

    /// Insert one derived row
    ///
    /// # Errors
    ///
    /// Fails with `ErrorKind::Constraint` if the key is already present or its
    /// upstream row is missing.
    async fn insert_derived(&self, row: &DerivedRow) -> Result<()>;

    async fn get_formatted_dataset(&self, key: TaskKey) -> Result<FormattedDataset>;

    async fn get_pca_fitting(&self, key: TaskKey) -> Result<PcaFitting>;

    async fn get_latent_dimension(&self, key: TaskKey) -> Result<LatentDimension>;

    /// Delete a derived row and every row downstream of it
    ///
    /// # Returns
    ///
    /// `true` if the row existed
    async fn delete_derived(&self, table: DerivedTable, key: TaskKey) -> Result<bool>;

    /// Row count per registered table, in registration order
    async fn table_counts(&self) -> Result<Vec<(&'static str, usize)>>;
}

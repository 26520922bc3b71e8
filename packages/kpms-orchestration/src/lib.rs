/*
 * KPMS Orchestration - Incremental keypoint PCA pipeline
 *
 * Populates derived tables of the entity store stage by stage, computing
 * each key at most once.
 *
 * Architecture:
 * - Pipeline DAG (Prep → Fitting → LatentDimension)
 * - Key Resolver (key source − computed keys)
 * - Stage Executor (re-check, compute, insert one row)
 * - Population Driver (per-key failure isolation, bounded concurrency)
 * - Collaborator ports (video metadata, keypoint toolkit, root directories)
 */

// Public modules
pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod external;
pub mod locks;
pub mod orchestrator;
pub mod pipeline;
pub mod project_config;
pub mod resolver;
pub mod stage;
pub mod stages;
pub mod variance;

// Re-exports
pub use config::PipelineConfig;
pub use dag::{PipelineDAG, StageNode};
pub use error::{ErrorCategory, PipelineError, Result};
pub use executor::{execute_key, KeyOutcome};
pub use external::{
    find_full_path, Collaborators, KeypointToolkit, LoadedKeypoints, ModelInput, PcaModel,
    RootDirectories, StaticRootDirectories, VideoMetadata, VideoMetadataReader,
};
pub use locks::DirectoryLocks;
pub use orchestrator::{
    default_handlers, KeyFailure, PipelineReport, PopulateReport, PopulationDriver,
};
pub use pipeline::{StageConfig, StageContext, StageHandler};
pub use project_config::{
    check_bodyparts, load_dj_config, save_dj_config, ProjectConfig, DJ_CONFIG_FILE,
};
pub use resolver::{pending_keys, resolve_pending};
pub use stage::StageId;
pub use stages::{FittingStage, LatentDimensionStage, PrepStage};
pub use variance::{cumulative_sum, estimate_latent_dimension, LatentDimensionEstimate};

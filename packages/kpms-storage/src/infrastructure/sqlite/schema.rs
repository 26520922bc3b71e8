//! Table definitions for the SQLite adapter
//!
//! Every foreign key cascades on delete, so removing a row removes its part
//! rows and everything computed from it.

use crate::domain::schema::{SchemaRegistry, TableDef, TableTier};
use crate::Result;

pub const POSE_ESTIMATION_METHOD: &str = "pose_estimation_method";
pub const KEYPOINT_SET: &str = "keypoint_set";
pub const VIDEO_FILE: &str = "video_file";
pub const BODYPARTS: &str = "bodyparts";
pub const PCA_TASK: &str = "pca_task";

const TASK_KEY: &[&str] = &["kpset_id", "bodyparts_id"];

/// Build the registry for the keypoint PCA schema
pub fn kpms_registry(name: &str) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::new(name);

    registry.register(TableDef {
        name: POSE_ESTIMATION_METHOD,
        tier: TableTier::Lookup,
        primary_key: &["format_method"],
        parents: &[],
        references: &[],
        ddl: "CREATE TABLE IF NOT EXISTS pose_estimation_method (
                format_method TEXT PRIMARY KEY,
                pose_estimation_desc TEXT NOT NULL DEFAULT ''
            );",
    })?;

    registry.register(TableDef {
        name: KEYPOINT_SET,
        tier: TableTier::Manual,
        primary_key: &["kpset_id"],
        parents: &[],
        references: &[POSE_ESTIMATION_METHOD],
        ddl: "CREATE TABLE IF NOT EXISTS keypoint_set (
                kpset_id INTEGER PRIMARY KEY,
                format_method TEXT NOT NULL,
                kpset_config_dir TEXT NOT NULL,
                kpset_videos_dir TEXT NOT NULL,
                kpset_desc TEXT NOT NULL DEFAULT '',
                FOREIGN KEY (format_method) REFERENCES pose_estimation_method(format_method)
            );",
    })?;

    registry.register(TableDef {
        name: VIDEO_FILE,
        tier: TableTier::Part,
        primary_key: &["kpset_id", "video_id"],
        parents: &[KEYPOINT_SET],
        references: &[],
        ddl: "CREATE TABLE IF NOT EXISTS video_file (
                kpset_id INTEGER NOT NULL,
                video_id INTEGER NOT NULL,
                video_path TEXT NOT NULL,
                PRIMARY KEY (kpset_id, video_id),
                FOREIGN KEY (kpset_id) REFERENCES keypoint_set(kpset_id) ON DELETE CASCADE
            );",
    })?;

    registry.register(TableDef {
        name: BODYPARTS,
        tier: TableTier::Manual,
        primary_key: TASK_KEY,
        parents: &[KEYPOINT_SET],
        references: &[],
        ddl: "CREATE TABLE IF NOT EXISTS bodyparts (
                kpset_id INTEGER NOT NULL,
                bodyparts_id INTEGER NOT NULL,
                anterior_bodyparts TEXT NOT NULL,
                posterior_bodyparts TEXT NOT NULL,
                use_bodyparts TEXT NOT NULL,
                bodyparts_desc TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (kpset_id, bodyparts_id),
                FOREIGN KEY (kpset_id) REFERENCES keypoint_set(kpset_id) ON DELETE CASCADE
            );",
    })?;

    registry.register(TableDef {
        name: PCA_TASK,
        tier: TableTier::Manual,
        primary_key: TASK_KEY,
        parents: &[BODYPARTS],
        references: &[],
        ddl: "CREATE TABLE IF NOT EXISTS pca_task (
                kpset_id INTEGER NOT NULL,
                bodyparts_id INTEGER NOT NULL,
                output_dir TEXT NOT NULL DEFAULT '',
                task_mode TEXT NOT NULL CHECK (task_mode IN ('load', 'trigger')),
                PRIMARY KEY (kpset_id, bodyparts_id),
                FOREIGN KEY (kpset_id, bodyparts_id)
                    REFERENCES bodyparts(kpset_id, bodyparts_id) ON DELETE CASCADE
            );",
    })?;

    registry.register(TableDef {
        name: "formatted_dataset",
        tier: TableTier::Imported,
        primary_key: TASK_KEY,
        parents: &[PCA_TASK],
        references: &[],
        ddl: "CREATE TABLE IF NOT EXISTS formatted_dataset (
                kpset_id INTEGER NOT NULL,
                bodyparts_id INTEGER NOT NULL,
                coordinates BLOB NOT NULL,
                confidences BLOB NOT NULL,
                formatted_bodyparts TEXT NOT NULL,
                video_stats TEXT NOT NULL,
                frame_rates TEXT NOT NULL,
                average_frame_rate INTEGER NOT NULL,
                PRIMARY KEY (kpset_id, bodyparts_id),
                FOREIGN KEY (kpset_id, bodyparts_id)
                    REFERENCES pca_task(kpset_id, bodyparts_id) ON DELETE CASCADE
            );",
    })?;

    registry.register(TableDef {
        name: "pca_fitting",
        tier: TableTier::Computed,
        primary_key: TASK_KEY,
        parents: &["formatted_dataset"],
        references: &[],
        ddl: "CREATE TABLE IF NOT EXISTS pca_fitting (
                kpset_id INTEGER NOT NULL,
                bodyparts_id INTEGER NOT NULL,
                pca_fitting_time TEXT NOT NULL,
                PRIMARY KEY (kpset_id, bodyparts_id),
                FOREIGN KEY (kpset_id, bodyparts_id)
                    REFERENCES formatted_dataset(kpset_id, bodyparts_id) ON DELETE CASCADE
            );",
    })?;

    registry.register(TableDef {
        name: "latent_dimension",
        tier: TableTier::Imported,
        primary_key: TASK_KEY,
        parents: &["pca_fitting"],
        references: &[],
        ddl: "CREATE TABLE IF NOT EXISTS latent_dimension (
                kpset_id INTEGER NOT NULL,
                bodyparts_id INTEGER NOT NULL,
                variance_threshold REAL NOT NULL,
                variance_percentage REAL NOT NULL,
                latent_dimension INTEGER NOT NULL,
                latent_dim_desc TEXT NOT NULL,
                PRIMARY KEY (kpset_id, bodyparts_id),
                FOREIGN KEY (kpset_id, bodyparts_id)
                    REFERENCES pca_fitting(kpset_id, bodyparts_id) ON DELETE CASCADE
            );",
    })?;

    Ok(registry)
}

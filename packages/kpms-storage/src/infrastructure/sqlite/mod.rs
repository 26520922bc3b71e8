//! SQLite adapter for EntityStore
//!
//! File-based persistent storage using SQLite; `in_memory()` for tests.
//! Foreign keys are enabled on every connection.

pub mod schema;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::domain::models::{
    Bodyparts, DerivedRow, DerivedTable, FormattedDataset, KeypointSet, LatentDimension,
    PcaFitting, PcaTask, PoseEstimationMethod, TaskKey, VideoFile,
};
use crate::domain::{EntityStore, Fetched, SchemaRegistry};
use crate::{Result, StorageError};

/// SQLite-based EntityStore implementation
#[derive(Clone)]
pub struct SqliteEntityStore {
    conn: Arc<Mutex<Connection>>,
    registry: Arc<SchemaRegistry>,
}

impl SqliteEntityStore {
    /// Open (or create) a store at the given path
    ///
    /// Missing parent directories are created.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::activate(conn, schema::kpms_registry("kpms")?)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::activate(conn, schema::kpms_registry("kpms")?)
    }

    /// Create every registered table that does not exist yet
    pub fn activate(conn: Connection, registry: SchemaRegistry) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for table in registry.tables() {
            conn.execute_batch(table.ddl)?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    fn fetch_by_key<T>(
        &self,
        table: &str,
        columns: &str,
        key: TaskKey,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM {} WHERE kpset_id = ?1 AND bodyparts_id = ?2",
            columns, table
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![key.kpset_id, key.bodyparts_id], map)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Fetched::from_rows(rows).into_result(format!("{} {}", table, key))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Column helpers
// ═══════════════════════════════════════════════════════════════════════════

fn conversion_error(idx: usize, ty: Type, err: StorageError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(err))
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = StorageError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Type::Text, e.into()))
}

fn blob_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: Vec<u8> = row.get(idx)?;
    bincode::deserialize(&raw).map_err(|e| conversion_error(idx, Type::Blob, e.into()))
}

fn task_key(row: &Row<'_>) -> rusqlite::Result<TaskKey> {
    Ok(TaskKey::new(row.get(0)?, row.get(1)?))
}

fn check_video_owner(kpset_id: i64, videos: &[VideoFile]) -> Result<()> {
    match videos.iter().find(|v| v.kpset_id != kpset_id) {
        Some(v) => Err(StorageError::config(format!(
            "Video {} belongs to keypoint set {}, not {}",
            v.video_id, v.kpset_id, kpset_id
        ))),
        None => Ok(()),
    }
}

fn insert_videos(tx: &rusqlite::Transaction<'_>, videos: &[VideoFile]) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO video_file (kpset_id, video_id, video_path) VALUES (?1, ?2, ?3)",
    )?;
    for video in videos {
        stmt.execute(params![video.kpset_id, video.video_id, &video.video_path])?;
    }
    Ok(())
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn seed_lookups(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let mut inserted = 0;
        for method in PoseEstimationMethod::contents() {
            inserted += conn.execute(
                "INSERT OR IGNORE INTO pose_estimation_method (format_method, pose_estimation_desc)
                 VALUES (?1, ?2)",
                params![method.format_method.as_str(), &method.pose_estimation_desc],
            )?;
        }
        Ok(inserted)
    }

    async fn list_pose_estimation_methods(&self) -> Result<Vec<PoseEstimationMethod>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT format_method, pose_estimation_desc FROM pose_estimation_method
             ORDER BY format_method",
        )?;
        let methods = stmt
            .query_map([], |row| {
                Ok(PoseEstimationMethod {
                    format_method: parse_column(row, 0)?,
                    pose_estimation_desc: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(methods)
    }

    async fn insert_keypoint_set(&self, kpset: &KeypointSet, videos: &[VideoFile]) -> Result<()> {
        check_video_owner(kpset.kpset_id, videos)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO keypoint_set (kpset_id, format_method, kpset_config_dir, kpset_videos_dir, kpset_desc)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kpset.kpset_id,
                kpset.format_method.as_str(),
                &kpset.config_dir,
                &kpset.videos_dir,
                &kpset.description
            ],
        )?;
        insert_videos(&tx, videos)?;
        tx.commit()?;
        Ok(())
    }

    async fn insert_video_files(&self, kpset_id: i64, videos: &[VideoFile]) -> Result<()> {
        check_video_owner(kpset_id, videos)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_videos(&tx, videos)?;
        tx.commit()?;
        Ok(())
    }

    async fn get_keypoint_set(&self, kpset_id: i64) -> Result<KeypointSet> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT kpset_id, format_method, kpset_config_dir, kpset_videos_dir, kpset_desc
             FROM keypoint_set WHERE kpset_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![kpset_id], |row| {
                Ok(KeypointSet {
                    kpset_id: row.get(0)?,
                    format_method: parse_column(row, 1)?,
                    config_dir: row.get(2)?,
                    videos_dir: row.get(3)?,
                    description: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Fetched::from_rows(rows).into_result(format!("keypoint_set kpset_id={}", kpset_id))
    }

    async fn video_files(&self, kpset_id: i64) -> Result<Vec<VideoFile>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT kpset_id, video_id, video_path FROM video_file
             WHERE kpset_id = ?1 ORDER BY video_id",
        )?;
        let videos = stmt
            .query_map(params![kpset_id], |row| {
                Ok(VideoFile {
                    kpset_id: row.get(0)?,
                    video_id: row.get(1)?,
                    video_path: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(videos)
    }

    async fn delete_keypoint_set(&self, kpset_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM keypoint_set WHERE kpset_id = ?1",
            params![kpset_id],
        )?;
        Ok(deleted > 0)
    }

    async fn insert_bodyparts(&self, bodyparts: &Bodyparts) -> Result<()> {
        let anterior = serde_json::to_string(&bodyparts.anterior_bodyparts)?;
        let posterior = serde_json::to_string(&bodyparts.posterior_bodyparts)?;
        let used = serde_json::to_string(&bodyparts.use_bodyparts)?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO bodyparts (kpset_id, bodyparts_id, anterior_bodyparts, posterior_bodyparts, use_bodyparts, bodyparts_desc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                bodyparts.key.kpset_id,
                bodyparts.key.bodyparts_id,
                anterior,
                posterior,
                used,
                &bodyparts.description
            ],
        )?;
        Ok(())
    }

    async fn get_bodyparts(&self, key: TaskKey) -> Result<Bodyparts> {
        self.fetch_by_key(
            "bodyparts",
            "kpset_id, bodyparts_id, anterior_bodyparts, posterior_bodyparts, use_bodyparts, bodyparts_desc",
            key,
            |row| {
                Ok(Bodyparts {
                    key: task_key(row)?,
                    anterior_bodyparts: json_column(row, 2)?,
                    posterior_bodyparts: json_column(row, 3)?,
                    use_bodyparts: json_column(row, 4)?,
                    description: row.get(5)?,
                })
            },
        )
    }

    async fn insert_pca_task(&self, task: &PcaTask) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pca_task (kpset_id, bodyparts_id, output_dir, task_mode)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                task.key.kpset_id,
                task.key.bodyparts_id,
                &task.output_dir,
                task.task_mode.as_str()
            ],
        )?;
        Ok(())
    }

    async fn get_pca_task(&self, key: TaskKey) -> Result<PcaTask> {
        self.fetch_by_key(
            "pca_task",
            "kpset_id, bodyparts_id, output_dir, task_mode",
            key,
            |row| {
                Ok(PcaTask {
                    key: task_key(row)?,
                    output_dir: row.get(2)?,
                    task_mode: parse_column(row, 3)?,
                })
            },
        )
    }

    async fn task_keys_with_videos(&self) -> Result<BTreeSet<TaskKey>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT t.kpset_id, t.bodyparts_id FROM pca_task t
             WHERE EXISTS (SELECT 1 FROM video_file v WHERE v.kpset_id = t.kpset_id)",
        )?;
        let keys = stmt
            .query_map([], task_key)?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(keys)
    }

    async fn derived_keys(&self, table: DerivedTable) -> Result<BTreeSet<TaskKey>> {
        let conn = self.conn.lock();
        let sql = format!("SELECT kpset_id, bodyparts_id FROM {}", table.table_name());
        let mut stmt = conn.prepare(&sql)?;
        let keys = stmt
            .query_map([], task_key)?
            .collect::<rusqlite::Result<BTreeSet<_>>>()?;
        Ok(keys)
    }

    async fn contains_derived(&self, table: DerivedTable, key: TaskKey) -> Result<bool> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE kpset_id = ?1 AND bodyparts_id = ?2)",
            table.table_name()
        );
        let exists: bool =
            conn.query_row(&sql, params![key.kpset_id, key.bodyparts_id], |row| row.get(0))?;
        Ok(exists)
    }

    async fn insert_derived(&self, row: &DerivedRow) -> Result<()> {
        let conn = self.conn.lock();
        match row {
            DerivedRow::FormattedDataset(ds) => {
                conn.execute(
                    "INSERT INTO formatted_dataset (kpset_id, bodyparts_id, coordinates, confidences,
                        formatted_bodyparts, video_stats, frame_rates, average_frame_rate)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        ds.key.kpset_id,
                        ds.key.bodyparts_id,
                        bincode::serialize(&ds.coordinates)?,
                        bincode::serialize(&ds.confidences)?,
                        serde_json::to_string(&ds.formatted_bodyparts)?,
                        serde_json::to_string(&ds.video_stats)?,
                        serde_json::to_string(&ds.frame_rates)?,
                        ds.average_frame_rate
                    ],
                )?;
            }
            DerivedRow::PcaFitting(fit) => {
                conn.execute(
                    "INSERT INTO pca_fitting (kpset_id, bodyparts_id, pca_fitting_time)
                     VALUES (?1, ?2, ?3)",
                    params![fit.key.kpset_id, fit.key.bodyparts_id, fit.pca_fitting_time],
                )?;
            }
            DerivedRow::LatentDimension(ld) => {
                conn.execute(
                    "INSERT INTO latent_dimension (kpset_id, bodyparts_id, variance_threshold,
                        variance_percentage, latent_dimension, latent_dim_desc)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        ld.key.kpset_id,
                        ld.key.bodyparts_id,
                        ld.variance_threshold,
                        ld.variance_percentage,
                        ld.latent_dimension,
                        &ld.latent_dim_desc
                    ],
                )?;
            }
        }
        Ok(())
    }

    async fn get_formatted_dataset(&self, key: TaskKey) -> Result<FormattedDataset> {
        self.fetch_by_key(
            "formatted_dataset",
            "kpset_id, bodyparts_id, coordinates, confidences, formatted_bodyparts, video_stats, frame_rates, average_frame_rate",
            key,
            |row| {
                Ok(FormattedDataset {
                    key: task_key(row)?,
                    coordinates: blob_column(row, 2)?,
                    confidences: blob_column(row, 3)?,
                    formatted_bodyparts: json_column(row, 4)?,
                    video_stats: json_column(row, 5)?,
                    frame_rates: json_column(row, 6)?,
                    average_frame_rate: row.get(7)?,
                })
            },
        )
    }

    async fn get_pca_fitting(&self, key: TaskKey) -> Result<PcaFitting> {
        self.fetch_by_key(
            "pca_fitting",
            "kpset_id, bodyparts_id, pca_fitting_time",
            key,
            |row| {
                Ok(PcaFitting {
                    key: task_key(row)?,
                    pca_fitting_time: row.get(2)?,
                })
            },
        )
    }

    async fn get_latent_dimension(&self, key: TaskKey) -> Result<LatentDimension> {
        self.fetch_by_key(
            "latent_dimension",
            "kpset_id, bodyparts_id, variance_threshold, variance_percentage, latent_dimension, latent_dim_desc",
            key,
            |row| {
                Ok(LatentDimension {
                    key: task_key(row)?,
                    variance_threshold: row.get(2)?,
                    variance_percentage: row.get(3)?,
                    latent_dimension: row.get(4)?,
                    latent_dim_desc: row.get(5)?,
                })
            },
        )
    }

    async fn delete_derived(&self, table: DerivedTable, key: TaskKey) -> Result<bool> {
        let conn = self.conn.lock();
        let sql = format!(
            "DELETE FROM {} WHERE kpset_id = ?1 AND bodyparts_id = ?2",
            table.table_name()
        );
        let deleted = conn.execute(&sql, params![key.kpset_id, key.bodyparts_id])?;
        Ok(deleted > 0)
    }

    async fn table_counts(&self) -> Result<Vec<(&'static str, usize)>> {
        let conn = self.conn.lock();
        let mut counts = Vec::with_capacity(self.registry.tables().len());
        for table in self.registry.tables() {
            let sql = format!("SELECT COUNT(*) FROM {}", table.name);
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            counts.push((table.name, count as usize));
        }
        Ok(counts)
    }
}

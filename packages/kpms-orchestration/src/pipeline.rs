use async_trait::async_trait;
use kpms_storage::{DerivedRow, DerivedTable, EntityStore, TaskKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::Result;
use crate::external::Collaborators;
use crate::locks::DirectoryLocks;
use crate::stage::StageId;

/// Stage context passed to handlers
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn EntityStore>,
    pub collaborators: Collaborators,
    pub locks: DirectoryLocks,
    pub config: StageConfig,
}

impl StageContext {
    pub fn new(
        store: Arc<dyn EntityStore>,
        collaborators: Collaborators,
        config: StageConfig,
    ) -> Self {
        Self {
            store,
            collaborators,
            locks: DirectoryLocks::new(),
            config,
        }
    }
}

/// Stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StageConfig {
    /// Keys of one stage computed concurrently; `0` = 75% of cores
    pub parallel_workers: usize,
    /// Cumulative explained variance the latent dimension must exceed
    pub variance_threshold: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            parallel_workers: 1,
            variance_threshold: 0.90,
        }
    }
}

impl StageConfig {
    pub fn effective_workers(&self) -> usize {
        match self.parallel_workers {
            0 => (num_cpus::get() * 3 / 4).max(1), // 75% of cores
            n => n,
        }
    }
}

/// Stage handler trait (pluggable stages)
///
/// `key_source` lists every key the stage could compute; the resolver
/// subtracts the keys already present in `table()`. `make` computes one row
/// and must not write it; the executor inserts it.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// Stage identifier
    fn stage_id(&self) -> StageId;

    /// Table the stage populates
    fn table(&self) -> DerivedTable {
        self.stage_id().table()
    }

    /// Keys eligible for this stage
    async fn key_source(&self, store: &dyn EntityStore) -> Result<BTreeSet<TaskKey>>;

    /// Compute the row for `key`, including any file side effects
    async fn make(&self, key: TaskKey, ctx: &StageContext) -> Result<DerivedRow>;
}

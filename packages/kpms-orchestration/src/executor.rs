use kpms_storage::{ErrorKind, TaskKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::pipeline::{StageContext, StageHandler};

/// What happened to one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyOutcome {
    Inserted,
    /// Another pass (or worker) already wrote the row
    AlreadyComputed,
}

/// Compute and insert the row of one key
///
/// Re-checks the key right before computing, so a key resolved as pending
/// but written meanwhile is skipped. On error nothing is inserted and the key
/// stays pending.
pub async fn execute_key(
    handler: &dyn StageHandler,
    key: TaskKey,
    ctx: &StageContext,
) -> Result<KeyOutcome> {
    let stage = handler.stage_id();
    let table = handler.table();

    if ctx.store.contains_derived(table, key).await? {
        debug!("Stage {}: {} already computed, skipping", stage, key);
        return Ok(KeyOutcome::AlreadyComputed);
    }

    let row = handler.make(key, ctx).await?;
    if row.key() != key || row.table() != table {
        return Err(PipelineError::StageExecutionFailed(format!(
            "Stage {} returned a {} row for {} while computing {}",
            stage,
            row.table(),
            row.key(),
            key
        )));
    }

    let err = match ctx.store.insert_derived(&row).await {
        Ok(()) => return Ok(KeyOutcome::Inserted),
        Err(e) => e,
    };

    // Lost a race with a concurrent writer of the same key
    if err.kind == ErrorKind::Constraint && ctx.store.contains_derived(table, key).await? {
        warn!(
            "Stage {}: {} inserted concurrently, keeping existing row",
            stage, key
        );
        return Ok(KeyOutcome::AlreadyComputed);
    }
    Err(err.into())
}

use kpms_storage::{EntityStore, TaskKey};
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::Result;
use crate::pipeline::StageHandler;

/// Keys of `source` that are not yet in `computed`, ascending
pub fn pending_keys(source: &BTreeSet<TaskKey>, computed: &BTreeSet<TaskKey>) -> BTreeSet<TaskKey> {
    source.difference(computed).copied().collect()
}

/// Pending work of one stage: key source minus keys already computed
///
/// Read-only and repeatable. Nothing eligible yields an empty set.
pub async fn resolve_pending(
    handler: &dyn StageHandler,
    store: &dyn EntityStore,
) -> Result<BTreeSet<TaskKey>> {
    let source = handler.key_source(store).await?;
    if source.is_empty() {
        debug!("Stage {}: no eligible keys", handler.stage_id());
        return Ok(BTreeSet::new());
    }

    let computed = store.derived_keys(handler.table()).await?;
    let pending = pending_keys(&source, &computed);
    debug!(
        "Stage {}: {} eligible, {} computed, {} pending",
        handler.stage_id(),
        source.len(),
        computed.len(),
        pending.len()
    );
    Ok(pending)
}

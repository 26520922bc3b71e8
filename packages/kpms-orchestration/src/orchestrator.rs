use futures::StreamExt;
use kpms_storage::TaskKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::dag::PipelineDAG;
use crate::error::{ErrorCategory, PipelineError, Result};
use crate::executor::{execute_key, KeyOutcome};
use crate::pipeline::{StageContext, StageHandler};
use crate::resolver::resolve_pending;
use crate::stage::StageId;
use crate::stages::{FittingStage, LatentDimensionStage, PrepStage};

/// A key whose computation failed; it stays pending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFailure {
    pub key: TaskKey,
    pub category: ErrorCategory,
    pub error: String,
}

/// Result of populating one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulateReport {
    pub stage: StageId,
    /// Keys resolved as pending at the start of the pass
    pub pending: usize,
    pub inserted: Vec<TaskKey>,
    /// Pending keys found computed when their turn came
    pub skipped: Vec<TaskKey>,
    pub failed: Vec<KeyFailure>,
    pub duration_ms: u64,
}

impl PopulateReport {
    fn new(stage: StageId, pending: usize) -> Self {
        Self {
            stage,
            pending,
            inserted: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Result of one pass over every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub stages: Vec<PopulateReport>,
    pub duration_ms: u64,
}

impl PipelineReport {
    pub fn inserted_total(&self) -> usize {
        self.stages.iter().map(|s| s.inserted.len()).sum()
    }

    pub fn failed_total(&self) -> usize {
        self.stages.iter().map(|s| s.failed.len()).sum()
    }

    pub fn stage(&self, stage: StageId) -> Option<&PopulateReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

/// Population driver: runs pending keys of every stage in DAG order
///
/// A failing key is logged and reported; the remaining keys still run.
/// Calling again resumes with whatever is still pending.
pub struct PopulationDriver {
    dag: Arc<PipelineDAG>,
    handlers: HashMap<StageId, Arc<dyn StageHandler>>,
    ctx: StageContext,
}

impl PopulationDriver {
    /// Create a driver for the default pipeline, without handlers
    pub fn new(ctx: StageContext) -> Result<Self> {
        let dag = PipelineDAG::default_pipeline()?;
        Ok(Self::with_dag(dag, ctx))
    }

    /// Create with custom DAG
    pub fn with_dag(dag: PipelineDAG, ctx: StageContext) -> Self {
        Self {
            dag: Arc::new(dag),
            handlers: HashMap::new(),
            ctx,
        }
    }

    /// Default pipeline with the Prep, Fitting and LatentDimension handlers
    pub fn with_default_stages(ctx: StageContext) -> Result<Self> {
        let mut driver = Self::new(ctx)?;
        for handler in default_handlers() {
            driver.register_handler(handler);
        }
        Ok(driver)
    }

    /// Register a stage handler
    pub fn register_handler(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.stage_id(), handler);
    }

    pub fn dag(&self) -> &PipelineDAG {
        &self.dag
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    fn handler(&self, stage: StageId) -> Result<Arc<dyn StageHandler>> {
        if self.dag.get_stage(stage).is_none() {
            return Err(PipelineError::StageNotFound(stage.to_string()));
        }
        self.handlers
            .get(&stage)
            .cloned()
            .ok_or(PipelineError::HandlerNotRegistered(stage))
    }

    /// Keys `populate(stage)` would compute right now
    pub async fn pending(&self, stage: StageId) -> Result<BTreeSet<TaskKey>> {
        let handler = self.handler(stage)?;
        resolve_pending(handler.as_ref(), self.ctx.store.as_ref()).await
    }

    /// Compute every pending key of one stage
    ///
    /// Errors only when the stage itself cannot run (unknown stage, missing
    /// handler, store failure while resolving); per-key failures end up in
    /// the report.
    pub async fn populate(&self, stage: StageId) -> Result<PopulateReport> {
        let start = Instant::now();
        let handler = self.handler(stage)?;
        let pending = resolve_pending(handler.as_ref(), self.ctx.store.as_ref()).await?;
        let mut report = PopulateReport::new(stage, pending.len());

        if pending.is_empty() {
            info!("Stage {}: nothing pending", stage);
            return Ok(report);
        }

        let workers = self.ctx.config.effective_workers().min(pending.len());
        info!(
            "Stage {}: {} pending keys ({} worker{})",
            stage,
            pending.len(),
            workers,
            if workers > 1 { "s" } else { "" }
        );

        let mut outcomes = if workers <= 1 {
            let mut outcomes = Vec::with_capacity(pending.len());
            for key in pending {
                let outcome = execute_key(handler.as_ref(), key, &self.ctx).await;
                outcomes.push((key, outcome));
            }
            outcomes
        } else {
            let tasks = pending.into_iter().map(|key| {
                let handler = handler.clone();
                let ctx = self.ctx.clone();
                async move {
                    let task =
                        tokio::spawn(async move { execute_key(handler.as_ref(), key, &ctx).await });
                    let outcome = match task.await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(PipelineError::StageExecutionFailed(format!(
                            "Task for {} did not complete: {}",
                            key, e
                        ))),
                    };
                    (key, outcome)
                }
            });
            futures::stream::iter(tasks)
                .buffer_unordered(workers)
                .collect::<Vec<_>>()
                .await
        };
        outcomes.sort_by_key(|(key, _)| *key);

        for (key, outcome) in outcomes {
            match outcome {
                Ok(KeyOutcome::Inserted) => {
                    info!("Stage {}: inserted {}", stage, key);
                    report.inserted.push(key);
                }
                Ok(KeyOutcome::AlreadyComputed) => report.skipped.push(key),
                Err(e) => {
                    let category = e.category();
                    error!("Stage {}: {} failed [{}]: {}", stage, key, category, e);
                    report.failed.push(KeyFailure {
                        key,
                        category,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Stage {} completed - {} inserted, {} skipped, {} failed in {}ms",
            stage,
            report.inserted.len(),
            report.skipped.len(),
            report.failed.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// One pass over every stage in DAG order
    ///
    /// Stages of one phase run concurrently. Keys that fail in one stage
    /// simply have no row for the next stage to pick up.
    pub async fn populate_all(&self) -> Result<PipelineReport> {
        let run_id = format!("run-{}", Uuid::new_v4());
        let start = Instant::now();
        info!("Run {}: execution plan:\n{}", run_id, self.dag.execution_plan());

        let mut stages = Vec::new();
        for (phase_idx, group) in self.dag.execution_order().iter().enumerate() {
            info!(
                "Run {}: Phase {} - {} stages",
                run_id,
                phase_idx + 1,
                group.len()
            );
            let results =
                futures::future::join_all(group.iter().map(|stage| self.populate(*stage))).await;
            for result in results {
                stages.push(result?);
            }
        }

        let report = PipelineReport {
            run_id,
            stages,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Run {} completed - {} rows inserted, {} keys failed in {}ms",
            report.run_id,
            report.inserted_total(),
            report.failed_total(),
            report.duration_ms
        );
        Ok(report)
    }
}

/// Handlers of the default pipeline
pub fn default_handlers() -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(PrepStage),
        Arc::new(FittingStage),
        Arc::new(LatentDimensionStage),
    ]
}

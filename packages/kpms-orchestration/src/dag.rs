use crate::error::{PipelineError, Result};
use crate::stage::StageId;
use std::collections::{BTreeMap, BTreeSet};

/// Stage node in DAG
#[derive(Debug, Clone)]
pub struct StageNode {
    pub id: StageId,
    pub name: &'static str,
    pub dependencies: Vec<StageId>,
}

impl StageNode {
    pub fn new(id: StageId, name: &'static str, dependencies: Vec<StageId>) -> Self {
        Self {
            id,
            name,
            dependencies,
        }
    }
}

/// Pipeline DAG with topological sort
#[derive(Debug, Clone)]
pub struct PipelineDAG {
    stages: BTreeMap<StageId, StageNode>,
    execution_order: Vec<Vec<StageId>>, // Vec of independent groups
}

impl PipelineDAG {
    /// Create a new DAG from stage definitions
    pub fn new(stages: Vec<StageNode>) -> Result<Self> {
        let mut stage_map = BTreeMap::new();
        for stage in stages {
            if stage_map.contains_key(&stage.id) {
                return Err(PipelineError::config(format!(
                    "Stage {} declared twice",
                    stage.id
                )));
            }
            stage_map.insert(stage.id, stage);
        }

        // Validate dependencies exist
        for stage in stage_map.values() {
            for dep in &stage.dependencies {
                if !stage_map.contains_key(dep) {
                    return Err(PipelineError::MissingDependency(format!(
                        "Stage {} depends on non-existent stage {}",
                        stage.id, dep
                    )));
                }
            }
        }

        let execution_order = Self::topological_sort(&stage_map)?;

        Ok(Self {
            stages: stage_map,
            execution_order,
        })
    }

    /// Create default pipeline (Prep → Fitting → LatentDimension)
    pub fn default_pipeline() -> Result<Self> {
        let stages = vec![
            StageNode::new(StageId::Prep, "Formatted Dataset", vec![]),
            StageNode::new(StageId::Fitting, "PCA Fitting", vec![StageId::Prep]),
            StageNode::new(
                StageId::LatentDimension,
                "Latent Dimension",
                vec![StageId::Fitting],
            ),
        ];

        Self::new(stages)
    }

    /// Topological sort grouping stages whose dependencies are all satisfied
    ///
    /// Groups are emitted in dependency order; stages inside a group are in
    /// `StageId` order.
    fn topological_sort(stages: &BTreeMap<StageId, StageNode>) -> Result<Vec<Vec<StageId>>> {
        let mut remaining: BTreeMap<StageId, usize> = stages
            .values()
            .map(|stage| (stage.id, stage.dependencies.len()))
            .collect();

        let mut result = Vec::new();

        while !remaining.is_empty() {
            let ready: Vec<StageId> = remaining
                .iter()
                .filter(|(_, &degree)| degree == 0)
                .map(|(&id, _)| id)
                .collect();

            if ready.is_empty() {
                return Err(PipelineError::DagCycleDetected);
            }

            for stage_id in &ready {
                remaining.remove(stage_id);

                for dependent in stages.values() {
                    if let Some(degree) = remaining.get_mut(&dependent.id) {
                        let hits = dependent
                            .dependencies
                            .iter()
                            .filter(|dep| *dep == stage_id)
                            .count();
                        *degree = degree.saturating_sub(hits);
                    }
                }
            }

            result.push(ready);
        }

        Ok(result)
    }

    /// Get execution order
    pub fn execution_order(&self) -> &[Vec<StageId>] {
        &self.execution_order
    }

    /// Flattened execution order
    pub fn stages_in_order(&self) -> Vec<StageId> {
        self.execution_order.iter().flatten().copied().collect()
    }

    /// Get stage node
    pub fn get_stage(&self, id: StageId) -> Option<&StageNode> {
        self.stages.get(&id)
    }

    /// Direct upstream stages of `id`
    pub fn upstream(&self, id: StageId) -> &[StageId] {
        self.stages
            .get(&id)
            .map(|stage| stage.dependencies.as_slice())
            .unwrap_or(&[])
    }

    /// Stages that (transitively) depend on `id`, in execution order
    pub fn downstream(&self, id: StageId) -> Vec<StageId> {
        let mut affected = BTreeSet::from([id]);
        let mut result = Vec::new();
        for stage_id in self.stages_in_order() {
            if stage_id == id {
                continue;
            }
            if self
                .upstream(stage_id)
                .iter()
                .any(|dep| affected.contains(dep))
            {
                affected.insert(stage_id);
                result.push(stage_id);
            }
        }
        result
    }

    /// Get execution plan as string (for logging)
    pub fn execution_plan(&self) -> String {
        self.execution_order
            .iter()
            .enumerate()
            .map(|(i, group)| {
                let stage_names: Vec<_> = group
                    .iter()
                    .filter_map(|id| self.stages.get(id))
                    .map(|stage| format!("{} [{}]", stage.name, stage.id.table()))
                    .collect();

                if group.len() > 1 {
                    format!("Phase {}: {} (independent)", i + 1, stage_names.join(" ∥ "))
                } else {
                    format!("Phase {}: {}", i + 1, stage_names.join(""))
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

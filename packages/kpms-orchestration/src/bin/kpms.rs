//! KPMS pipeline CLI
//!
//! Operator commands against the entity store. Population itself needs the
//! video and keypoint collaborators and is driven from the library
//! (`PopulationDriver`).
//!
//! # Usage
//!
//! ```bash
//! # Create tables and seed pose-estimation methods
//! kpms --config kpms.yml init
//!
//! # Show stage order
//! kpms plan
//!
//! # Keys each stage would compute next
//! kpms pending --stage fitting
//!
//! # Drop a FormattedDataset row and everything computed from it
//! kpms reset --kpset-id 1 --bodyparts-id 1 --stage prep
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use kpms_orchestration::{
    default_handlers, resolve_pending, PipelineConfig, PipelineDAG, StageId,
};
use kpms_storage::{EntityStore, SqliteEntityStore, TaskKey};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kpms")]
#[command(about = "Keypoint PCA pipeline - entity store and stage status", long_about = None)]
struct Cli {
    /// Pipeline config file (YAML); KPMS_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the schema and seed lookup tables
    Init,

    /// Print the stage execution plan
    Plan,

    /// List pending keys per stage
    Pending {
        /// Only this stage (prep, fitting, latent_dimension)
        #[arg(short, long, value_parser = parse_stage)]
        stage: Option<StageId>,
    },

    /// Row count per table
    Status,

    /// Delete a derived row and its downstream rows so it is recomputed
    Reset {
        #[arg(long)]
        kpset_id: i64,

        #[arg(long)]
        bodyparts_id: i64,

        /// Stage whose row is deleted
        #[arg(short, long, default_value = "prep", value_parser = parse_stage)]
        stage: StageId,
    },

    /// Print the effective configuration
    Config,
}

fn parse_stage(s: &str) -> Result<StageId, String> {
    StageId::from_str(s).map_err(|e| e.to_string())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_yaml(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn open_store(config: &PipelineConfig) -> anyhow::Result<SqliteEntityStore> {
    SqliteEntityStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Err(e) = config.validate() {
        warn!("Configuration is not usable for population: {}", e);
    }

    match cli.command {
        Commands::Init => {
            let store = open_store(&config)?;
            let seeded = store.seed_lookups().await?;
            info!(
                "Initialized {} ({} lookup rows added)",
                config.database.display(),
                seeded
            );
            for method in store.list_pose_estimation_methods().await? {
                println!(
                    "{:<15} {}",
                    method.format_method.as_str(),
                    method.pose_estimation_desc
                );
            }
        }
        Commands::Plan => {
            let dag = PipelineDAG::default_pipeline()?;
            println!("{}", dag.execution_plan());
        }
        Commands::Pending { stage } => {
            let store = open_store(&config)?;
            for handler in default_handlers() {
                if stage.is_some_and(|s| s != handler.stage_id()) {
                    continue;
                }
                let pending = resolve_pending(handler.as_ref(), &store).await?;
                println!("{} ({} pending)", handler.stage_id(), pending.len());
                for key in pending {
                    println!("  {}", key);
                }
            }
        }
        Commands::Status => {
            let store = open_store(&config)?;
            for (table, count) in store.table_counts().await? {
                println!("{:<24} {}", table, count);
            }
        }
        Commands::Reset {
            kpset_id,
            bodyparts_id,
            stage,
        } => {
            let store = open_store(&config)?;
            let key = TaskKey::new(kpset_id, bodyparts_id);
            let dag = PipelineDAG::default_pipeline()?;
            if store.delete_derived(stage.table(), key).await? {
                let downstream: Vec<_> = dag
                    .downstream(stage)
                    .iter()
                    .map(|s| s.table().table_name())
                    .collect();
                println!(
                    "Deleted {} row for {} (cascaded to: {})",
                    stage.table(),
                    key,
                    if downstream.is_empty() {
                        "none".to_string()
                    } else {
                        downstream.join(", ")
                    }
                );
            } else {
                println!("No {} row for {}", stage.table(), key);
            }
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use lead_harvester_lib::crawling::{ApiHarvestRunner, Normalizer, PassStatus, PauseSignal};
use lead_harvester_lib::domain::canonical_key;
use lead_harvester_lib::infrastructure::config::defaults;
use lead_harvester_lib::infrastructure::logging::log_system_info;
use lead_harvester_lib::infrastructure::{
    AppConfig, CheckpointStore, DatabaseConnection, PropertyStore, SqliteCheckpointStore,
    SqlitePropertyStore, init_logging_with_config,
};

#[derive(Parser)]
#[command(name = "lead-harvester", version, about = "Resumable property listing harvester")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, env = "LEAD_HARVESTER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print a source's checkpoint as JSON
    Progress {
        #[arg(default_value = defaults::DASHBOARD_SOURCE)]
        source: String,
    },
    /// Forget a source's checkpoint so the next pass starts from the beginning
    Reset { source: String },
    /// List sources with a stored checkpoint
    Sources,
    /// Run one secondary API pass
    Api {
        /// Partition codes to crawl; defaults to the configured plan
        partitions: Vec<String>,
        /// Work items before pausing (0 = unlimited)
        #[arg(long)]
        batch_limit: Option<u64>,
    },
    /// Count stored records, or show one by address
    Records {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    init_logging_with_config(&config.logging, &config.log_dir())?;
    log_system_info();

    let db = DatabaseConnection::new(&config.database_url()).await?;
    db.migrate().await?;
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(SqliteCheckpointStore::new(db.pool().clone()));
    let store: Arc<dyn PropertyStore> = Arc::new(SqlitePropertyStore::new(db.pool().clone()));

    match cli.command {
        Command::Progress { source } => {
            let progress = checkpoints.load(&source).await?;
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Command::Reset { source } => {
            checkpoints.reset(&source).await?;
            println!("Checkpoint for '{source}' cleared");
        }
        Command::Sources => {
            for source in checkpoints.list_sources().await? {
                println!("{source}");
            }
        }
        Command::Api {
            partitions,
            batch_limit,
        } => {
            if !config.secondary_api.enabled {
                bail!("secondary_api.enabled is false; set it in the config file or LEAD_HARVESTER__SECONDARY_API__ENABLED");
            }
            if !partitions.is_empty() {
                config.plan.partitions = partitions.iter().map(|p| p.to_uppercase()).collect();
            }
            if let Some(limit) = batch_limit {
                config.plan.batch_limit = limit;
            }
            config.validate()?;

            let pause = PauseSignal::new(config.plan.batch_limit);
            let normalizer = Arc::new(Normalizer::new(store.clone()));
            let runner = ApiHarvestRunner::new(&config, checkpoints.clone(), normalizer.clone(), pause.clone())?;

            let ctrl_c = pause.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("⏸️ Interrupt received, pausing after the current item");
                    ctrl_c.pause();
                }
            });

            let outcome = runner.run_pass().await?;
            let stats = normalizer.stats();
            info!(
                "✅ API pass finished: {:?}, {} items, {} inserted, {} merged",
                outcome.status, outcome.counters.items_completed, stats.inserted, stats.merged
            );
            if outcome.status == PassStatus::Exhausted {
                warn!("⚠️ The work plan is empty; check plan.partitions and plan.sub_areas");
            }
            println!("{}", serde_json::to_string_pretty(&outcome.counters)?);
        }
        Command::Records { state, address } => {
            if let Some(address) = address {
                match store.get(&canonical_key(&address)).await? {
                    Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                    None => println!("No record for '{address}'"),
                }
            } else if let Some(state) = state {
                println!("{}", store.count_by_state(&state.to_uppercase()).await?);
            } else {
                println!("{}", store.count().await?);
            }
        }
    }

    Ok(())
}

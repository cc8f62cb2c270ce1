//! tickwise - daily price ingestion and indicator pipeline.
//!
//! Subcommands:
//! - `run [--force] [--as-of DATE]`: one pipeline run, report on stdout
//! - `schedule`: run on the configured cron expression until Ctrl-C
//! - `seed`: write the configured symbols into the reference table

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tickwise::pipeline::{DailyOrchestrator, RunOptions};
use tickwise::scheduler::DailySchedule;
use tickwise::storage::PersistenceGateway;
use tickwise::ProviderRouter;
use tickwise_common::logging::init_logging;
use tickwise_common::Config;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tickwise", version, about = "Daily price ingestion and technical indicators")]
struct Cli {
    /// Config file (defaults to $TICKWISE_CONFIG or ~/.tickwise/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the pipeline once
    Run {
        /// Run even on a weekend
        #[arg(long)]
        force: bool,

        /// Date to run for (YYYY-MM-DD, default today UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Run on the configured cron schedule
    Schedule,
    /// Seed the symbol table from configuration
    Seed,
}

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();
    let cli = Cli::parse();

    let config = Config::load_with_env(cli.config.as_deref())?;
    init_logging(&config.observability);
    config.validate().context("Invalid configuration")?;

    info!("tickwise v{}", env!("CARGO_PKG_VERSION"));

    let store = PersistenceGateway::from_settings(&config.storage)
        .with_context(|| format!("Failed to open {}", config.storage.db_path.display()))?;
    let seeded = store
        .upsert_symbols(&config.symbols)
        .await
        .context("Failed to seed symbols")?;

    if matches!(cli.command, Command::Seed) {
        info!(symbols = seeded, "Seeded symbol table");
        return Ok(());
    }

    let router = Arc::new(ProviderRouter::from_config(&config));
    let orchestrator = DailyOrchestrator::from_config(&config, router, store);

    let startup_duration = startup_start.elapsed();
    info!(
        duration_ms = startup_duration.as_millis() as u64,
        providers = config.enabled_providers().len(),
        symbols = seeded,
        "Pipeline initialized"
    );

    match cli.command {
        Command::Run { force, as_of } => {
            let options = RunOptions {
                as_of: as_of.unwrap_or_else(|| Utc::now().date_naive()),
                force_run: force,
            };
            let report = orchestrator.run(options).await.context("Run failed")?;
            println!("{}", report.to_json()?);
        }
        Command::Schedule => {
            let schedule = DailySchedule::parse(&config.run.cron)?;
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            };
            schedule.run_loop(&orchestrator, shutdown).await?;
        }
        Command::Seed => {}
    }

    Ok(())
}

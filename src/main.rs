use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxscore_harvester::models::{HarvestMode, WriteMode};
use boxscore_harvester::{AbortSignal, AppConfig, Harvester, RunOutcome, RunParams, Season};

#[derive(Debug, Parser)]
#[command(
    name = "boxscore-harvester",
    version,
    about = "Harvest box-score pages into a warehouse table"
)]
struct Cli {
    #[arg(long, value_enum, default_value = "current")]
    mode: HarvestMode,

    /// Target date (YYYY-MM-DD). Defaults to yesterday, UTC.
    #[arg(long)]
    date: Option<NaiveDate>,

    #[arg(long)]
    workers: Option<usize>,

    /// Process jobs one at a time.
    #[arg(long)]
    serial: bool,

    /// Attempts per job before it is given up on.
    #[arg(long)]
    retries: Option<u32>,

    #[arg(long)]
    destination: Option<String>,

    #[arg(long, value_enum)]
    write_mode: Option<WriteMode>,

    /// TOML file with `[[season]]` entries to backfill, one replace run each.
    #[arg(long)]
    seasons: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct SeasonsFile {
    season: Vec<Season>,
}

impl Cli {
    fn run_params(&self, config: &AppConfig) -> RunParams {
        let target_date = self
            .date
            .unwrap_or_else(|| Utc::now().date_naive() - chrono::Duration::days(1));

        let mut params = RunParams::from_config(config, self.mode, target_date);
        params.serial = self.serial;
        if let Some(workers) = self.workers {
            params.workers = workers;
        }
        if let Some(retries) = self.retries {
            params.retry_ceiling = retries;
        }
        if let Some(destination) = &self.destination {
            params.destination = destination.clone();
        }
        if let Some(write_mode) = self.write_mode {
            params.write_mode = write_mode;
        }
        params
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Failed to load configuration")?;

    // Dropping the guard flushes the file writer.
    let _log_guard = init_tracing(&config)?;

    if config.metrics.enabled {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.metrics.port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics on port {}", config.metrics.port);
    }

    info!("Starting Boxscore Harvester...");

    let params = cli.run_params(&config);
    if params.workers == 0 || params.retry_ceiling == 0 {
        anyhow::bail!("--workers and --retries must be greater than 0");
    }

    let abort = AbortSignal::new();
    let signal = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight jobs");
            signal.raise();
        }
    });

    let harvester = Harvester::from_config(config)
        .await
        .context("Failed to set up harvester")?;

    let outcomes = match &cli.seasons {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file: SeasonsFile = toml::from_str(&raw)
                .with_context(|| format!("Invalid seasons file {}", path.display()))?;
            harvester.run_seasons(&file.season, &params, &abort).await
        }
        None => {
            let outcome = harvester.run(&params, &abort).await;
            vec![(params.destination.clone(), outcome)]
        }
    };

    let mut crashed = 0;
    for (destination, outcome) in &outcomes {
        info!("{}: {}", destination, serde_json::to_string(outcome)?);
        if matches!(outcome, RunOutcome::Crashed(_)) {
            crashed += 1;
        }
    }

    info!("Shutting down...");
    if crashed > 0 {
        anyhow::bail!("{} of {} runs crashed", crashed, outcomes.len());
    }
    Ok(())
}

fn init_tracing(config: &AppConfig) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("boxscore_harvester=debug"))?;

    let (file_layer, guard) = match &config.logging.directory {
        Some(directory) => {
            let prefix = config
                .logging
                .file_prefix
                .as_deref()
                .unwrap_or("boxscore-harvester.log");
            let appender = tracing_appender::rolling::daily(directory, prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    Ok(guard)
}

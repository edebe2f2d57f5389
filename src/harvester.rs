//! End-to-end run pipeline: listing, discovery, orchestration, assembly,
//! sink write and the closing notification.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::assembler;
use crate::browser::{self, SessionProvider};
use crate::config::{AppConfig, ListingConfig};
use crate::discovery;
use crate::extractor::{Extract, PageExtractor};
use crate::models::{HarvestMode, WriteMode};
use crate::orchestrator::{
    AbortSignal, DispatchMode, HarvestReport, Orchestrator, OrchestratorParams,
};
use crate::plugins::PluginManager;
use crate::plugins::traits::{NotificationKind, RunNotification, SinkRequest};
use crate::utils::error::{AppError, Result};

/// Everything that varies between two runs of the same deployment.
#[derive(Debug, Clone)]
pub struct RunParams {
    pub mode: HarvestMode,
    pub target_date: NaiveDate,
    pub workers: usize,
    pub serial: bool,
    pub retry_ceiling: u32,
    pub destination: String,
    pub write_mode: WriteMode,
    /// Replaces the configured listing URL for this run only.
    pub listing_url: Option<String>,
}

impl RunParams {
    /// Parameters taken from configuration, for `target_date`.
    pub fn from_config(config: &AppConfig, mode: HarvestMode, target_date: NaiveDate) -> Self {
        Self {
            mode,
            target_date,
            workers: config.harvest.workers,
            serial: false,
            retry_ceiling: config.harvest.retry_ceiling,
            destination: config.sink.destination.clone(),
            write_mode: config.sink.write_mode,
            listing_url: None,
        }
    }
}

/// One season of a historical backfill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub destination: String,
    pub listing_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        succeeded: usize,
        permanently_failed: usize,
        aborted: usize,
        rows: usize,
    },
    NoJobs,
    Crashed(String),
}

pub struct Harvester {
    config: AppConfig,
    provider: Arc<dyn SessionProvider>,
    extractor: Arc<dyn Extract>,
    plugins: PluginManager,
}

impl Harvester {
    pub fn new(
        config: AppConfig,
        provider: Arc<dyn SessionProvider>,
        extractor: Arc<dyn Extract>,
        plugins: PluginManager,
    ) -> Self {
        Self {
            config,
            provider,
            extractor,
            plugins,
        }
    }

    /// Wires the configured session backend, page extractor, sink and notifiers.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let provider = browser::build_provider(&config.browser)?;
        let extractor = PageExtractor::new(
            Arc::clone(&provider),
            config.extractor.clone(),
            &config.browser,
        )?;

        let plugins = PluginManager::new();
        plugins.initialize_from_config(&config).await?;

        Ok(Self::new(config, provider, Arc::new(extractor), plugins))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Runs the whole pipeline once and always sends exactly one notification.
    ///
    /// Per-job failures never reach this level; only listing, assembly and
    /// sink errors turn the run into [`RunOutcome::Crashed`].
    pub async fn run(&self, params: &RunParams, abort: &AbortSignal) -> RunOutcome {
        info!(
            "Starting {:?} harvest for {} into '{}'",
            params.mode, params.target_date, params.destination
        );

        let (outcome, notification) = match self.execute(params, abort).await {
            Ok((outcome, body)) => {
                let notification = self.notification_for(&outcome, body);
                (outcome, notification)
            }
            Err(e) => {
                let chain = error_chain(&e);
                error!("Harvest crashed: {}", chain);
                let outcome = RunOutcome::Crashed(e.to_string());
                (outcome.clone(), self.notification_for(&outcome, chain))
            }
        };

        self.plugins.notify_all(&notification).await;
        outcome
    }

    /// Backfills several seasons, one full run each, replacing every
    /// destination. Stops early once `abort` is raised.
    pub async fn run_seasons(
        &self,
        seasons: &[Season],
        base: &RunParams,
        abort: &AbortSignal,
    ) -> Vec<(String, RunOutcome)> {
        let mut outcomes = Vec::with_capacity(seasons.len());

        for season in seasons {
            if abort.is_raised() {
                warn!("Backfill aborted before season '{}'", season.destination);
                break;
            }

            let params = RunParams {
                mode: HarvestMode::Historical,
                destination: season.destination.clone(),
                write_mode: WriteMode::Replace,
                listing_url: Some(season.listing_url.clone()),
                ..base.clone()
            };

            let outcome = self.run(&params, abort).await;
            outcomes.push((season.destination.clone(), outcome));
        }

        outcomes
    }

    async fn execute(
        &self,
        params: &RunParams,
        abort: &AbortSignal,
    ) -> Result<(RunOutcome, String)> {
        let listing = self.listing_config(params);
        let markup = discovery::fetch_listing_with_retry(
            self.provider.as_ref(),
            &listing,
            params.mode,
            self.config.browser.page_load_timeout(),
            self.config.browser.render_wait(),
        )
        .await?;

        let rows = discovery::parse_listing(&markup, &listing)?;
        let discovered = discovery::discover(&rows, &listing, params.mode, params.target_date)?;
        info!(
            "Discovered {} jobs from {} listing rows ({} duplicates, {} rejected)",
            discovered.jobs.len(),
            rows.len(),
            discovered.duplicates,
            discovered.rejected
        );

        if discovered.jobs.is_empty() {
            return Ok((
                RunOutcome::NoJobs,
                format!("No events found for {}", params.target_date),
            ));
        }

        let orchestrator =
            Orchestrator::new(Arc::clone(&self.extractor), Arc::clone(&self.provider));
        let report = orchestrator
            .run(discovered.jobs, &self.orchestrator_params(params), abort)
            .await;

        let succeeded = report.succeeded.len();
        let permanently_failed = report.permanently_failed.len();
        let aborted = report.aborted.len();
        let summary = summarize(&report);

        let table = assembler::finalize(
            report.records,
            &self.config.assembler,
            &self.config.extractor.context_columns,
        )?;

        let rows = if table.is_empty() {
            warn!("No rows extracted; skipping write to '{}'", params.destination);
            0
        } else {
            let request = SinkRequest {
                destination: params.destination.clone(),
                write_mode: params.write_mode,
                column_overrides: self.config.sink.column_overrides.clone(),
            };
            self.plugins
                .write_table(self.config.sink.kind.plugin_type(), &table, &request)
                .await?
        };

        info!(
            "Harvest finished: {} succeeded, {} permanently failed, {} aborted, {} rows written",
            succeeded, permanently_failed, aborted, rows
        );

        let outcome = RunOutcome::Completed {
            succeeded,
            permanently_failed,
            aborted,
            rows,
        };
        Ok((outcome, summary))
    }

    fn listing_config(&self, params: &RunParams) -> ListingConfig {
        let mut listing = self.config.listing.clone();
        if let Some(url) = &params.listing_url {
            listing.url = url.clone();
        }
        listing
    }

    fn orchestrator_params(&self, params: &RunParams) -> OrchestratorParams {
        let dispatch = if params.serial {
            DispatchMode::Serial
        } else {
            DispatchMode::Concurrent {
                workers: params.workers,
            }
        };

        OrchestratorParams {
            dispatch,
            retry_ceiling: params.retry_ceiling,
            pacing_delay: Duration::from_millis(self.config.harvest.pacing_delay_ms),
            pass_delay: Duration::from_millis(self.config.harvest.pass_delay_ms),
        }
    }

    fn notification_for(&self, outcome: &RunOutcome, body: String) -> RunNotification {
        let prefix = &self.config.notifications.subject_prefix;
        let (kind, subject) = match outcome {
            RunOutcome::Completed { succeeded, .. } => (
                NotificationKind::Completed,
                format!("{}: COMPLETED # OF GAMES {}", prefix, succeeded),
            ),
            RunOutcome::NoJobs => (NotificationKind::NoJobs, format!("{}: NO GAMES", prefix)),
            RunOutcome::Crashed(_) => (
                NotificationKind::Crashed,
                format!("{}: SCRIPT CRASHED", prefix),
            ),
        };

        RunNotification {
            kind,
            subject,
            body,
        }
    }
}

fn summarize(report: &HarvestReport) -> String {
    let mut body = format!(
        "Succeeded: {}\nPermanently failed: {}\nAborted: {}\nPasses: {}\n",
        report.succeeded.len(),
        report.permanently_failed.len(),
        report.aborted.len(),
        report.passes
    );

    for job in &report.permanently_failed {
        body.push_str(&format!("Failed: {} {}\n", job.external_id, job.url));
    }
    body
}

fn error_chain(error: &AppError) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(&format!("\nCaused by: {}", cause));
        source = cause.source();
    }
    chain
}

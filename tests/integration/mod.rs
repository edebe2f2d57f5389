// Integration tests for Boxscore Harvester
// These tests verify that all components work together correctly

pub mod discovery_tests;
pub mod pipeline_tests;

use async_trait::async_trait;
use boxscore_harvester::{
    AppConfig, Harvester,
    browser::{BrowserSession, HttpSessionProvider, SessionProvider},
    config::{SessionBackend, SinkKind},
    extractor::{Extract, PageExtractor},
    models::{CellValue, ExtractionResult, FailureReason, HarvestJob, Record},
    plugins::{
        PluginManager,
        notifiers::LogNotifier,
        sinks::SqliteSink,
        traits::{NotificationResult, NotifierPlugin, RunNotification},
    },
};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const LISTING_PATH: &str = "/stats/teams/boxscores";

/// Test configuration pointing every URL at a mock server
pub fn get_test_config(server_uri: &str) -> AppConfig {
    let mut config = AppConfig::default();

    config.browser.backend = SessionBackend::Http;
    config.browser.page_load_timeout_secs = 5;
    config.browser.render_wait_secs = 1;
    config.browser.user_agents = vec!["BoxscoreHarvester-Test/1.0".to_string()];
    config.browser.referer = Some(format!("{}/", server_uri));

    config.listing.url = format!("{}{}", server_uri, LISTING_PATH);
    config.listing.base_url = server_uri.to_string();
    config.listing.fetch_attempts = 2;
    config.listing.retry_base_delay_ms = 2;

    config.harvest.workers = 2;
    config.harvest.pass_delay_ms = 0;

    config.sink.kind = SinkKind::Sqlite;
    config.sink.database_url = "sqlite::memory:".to_string();
    config.sink.max_connections = 1;
    config.sink.destination = "boxscores".to_string();

    config
}

/// Listing markup; rows are `(matchup, href, date)`.
pub fn listing_page(rows: &[(&str, &str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(matchup, href, date)| {
            format!(
                r#"<tr><td><a href="/team/1610612738">Team</a></td><td><a href="{href}">{matchup}</a></td><td><a href="/stats">{date}</a></td><td>W</td></tr>"#
            )
        })
        .collect();

    format!(
        r#"<html><body><table><thead><tr><th>Team</th><th>Match Up</th><th>Game Date</th><th>W/L</th></tr></thead><tbody class="Crom_body__UYOcU">{body}</tbody></table></body></html>"#
    )
}

const HEADER: &str = "<tr><th>PLAYER</th><th>MIN</th><th>FGM</th><th>FGA</th><th>FG%</th><th>3PM</th><th>3PA</th><th>3P%</th><th>PTS</th><th>+/-</th></tr>";

fn player_row(name: &str, points: u32) -> String {
    format!(
        r#"<tr><td><span class="GameBoxscoreTablePlayer_gbpNameFull__cf_sn">{name}</span><span>{short}</span></td><td>30:12</td><td>8</td><td>15</td><td>53.3</td><td>2</td><td>5</td><td>40.0</td><td>{points}</td><td>+6</td></tr>"#,
        short = name.split_whitespace().last().unwrap_or(name),
    )
}

fn stats_table(players: &[(&str, u32)], dnp: Option<&str>) -> String {
    let mut rows: String = players
        .iter()
        .map(|(name, points)| player_row(name, *points))
        .collect();
    if let Some(name) = dnp {
        rows.push_str(&format!(
            r#"<tr><td><span class="GameBoxscoreTablePlayer_gbpNameFull__cf_sn">{name}</span></td><td>DNP - Coach's Decision</td></tr>"#
        ));
    }
    let total: u32 = players.iter().map(|(_, points)| points).sum();

    format!(
        r#"<div class="StatsTable_st__g2iuW"><table>{HEADER}{rows}<tr><td>TOTALS</td><td>240:00</td><td></td><td></td><td></td><td></td><td></td><td></td><td>{total}</td><td></td></tr></table></div>"#
    )
}

/// Detail markup with the away table first and the home table second.
pub fn box_score_page(
    away: &[(&str, u32)],
    home: &[(&str, u32)],
    home_dnp: Option<&str>,
) -> String {
    format!(
        "<html><body>{}{}</body></html>",
        stats_table(away, None),
        stats_table(home, home_dnp)
    )
}

pub async fn memory_pool() -> anyhow::Result<SqlitePool> {
    // One connection: every connection to sqlite::memory: is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    Ok(pool)
}

/// Keeps every notification it is asked to send.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<RunNotification>>>,
}

#[async_trait]
impl NotifierPlugin for RecordingNotifier {
    fn name(&self) -> &str {
        "Recording Notifier"
    }

    fn plugin_type(&self) -> &str {
        "recording"
    }

    async fn notify(
        &self,
        notification: &RunNotification,
    ) -> boxscore_harvester::Result<NotificationResult> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(NotificationResult {
            success: true,
            message_id: Some(format!("recording-{}", self.sent.lock().unwrap().len())),
            error: None,
        })
    }
}

/// Harvester over the plain HTTP backend writing into `pool`.
pub async fn create_test_harvester(
    config: AppConfig,
    pool: SqlitePool,
) -> anyhow::Result<(Harvester, RecordingNotifier)> {
    let provider: Arc<dyn SessionProvider> =
        Arc::new(HttpSessionProvider::new(config.browser.clone())?);
    let extractor = PageExtractor::new(
        Arc::clone(&provider),
        config.extractor.clone(),
        &config.browser,
    )?;

    let notifier = RecordingNotifier::default();
    let plugins = PluginManager::new();
    plugins.register_notifier(Box::new(LogNotifier::new())).await;
    plugins.register_notifier(Box::new(notifier.clone())).await;
    plugins.register_sink(Box::new(SqliteSink::from_pool(pool))).await;

    let harvester = Harvester::new(config, provider, Arc::new(extractor), plugins);
    Ok((harvester, notifier))
}

/// Fails each job a scripted number of times, then yields one row for it.
pub struct ScriptedExtractor {
    failures_before_success: HashMap<String, u32>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedExtractor {
    pub fn new(script: &[(&str, u32)]) -> Self {
        Self {
            failures_before_success: script
                .iter()
                .map(|(id, failures)| (id.to_string(), *failures))
                .collect(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn attempts(&self, external_id: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(external_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Extract for ScriptedExtractor {
    async fn extract(&self, job: &HarvestJob) -> ExtractionResult {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(job.external_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let allowed = self
            .failures_before_success
            .get(&job.external_id)
            .copied()
            .unwrap_or(0);
        if attempt <= allowed {
            return ExtractionResult::failed(
                job.clone(),
                FailureReason::Fetch(format!("attempt {} refused", attempt)),
            );
        }

        let columns = vec!["PLAYER".to_string(), "game_id".to_string()];
        ExtractionResult::Rows(vec![Record::from_positional(
            &columns,
            vec![
                CellValue::text(format!("player-{}", job.external_id)),
                CellValue::text(job.external_id.clone()),
            ],
        )])
    }
}

/// Session provider for extractor fakes: hands out nothing, counts sweeps.
#[derive(Default)]
pub struct SweepCountingProvider {
    pub sweeps: AtomicUsize,
}

impl SweepCountingProvider {
    pub fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for SweepCountingProvider {
    fn name(&self) -> &str {
        "sweep-counting"
    }

    async fn acquire_session(&self) -> boxscore_harvester::Result<Box<dyn BrowserSession>> {
        Err(boxscore_harvester::AppError::Session(
            "no sessions in this test".to_string(),
        ))
    }

    fn release_session(&self, _session: Box<dyn BrowserSession>) {}

    async fn terminate_orphans(&self) -> boxscore_harvester::Result<usize> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    fn live_sessions(&self) -> usize {
        0
    }
}

pub fn job(external_id: &str) -> HarvestJob {
    HarvestJob::new(
        external_id,
        chrono::NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
        boxscore_harvester::models::Matchup::parse("LAL @ BOS").unwrap(),
        format!("https://www.nba.com/game/{}/box-score", external_id),
    )
}

/// Wraps the HTTP backend with a host that refuses sessions until an orphan
/// sweep has run.
pub struct ExhaustedHostProvider {
    inner: HttpSessionProvider,
    exhausted: AtomicBool,
    refused: AtomicUsize,
    pub sweeps: AtomicUsize,
}

impl ExhaustedHostProvider {
    pub fn new(inner: HttpSessionProvider) -> Self {
        Self {
            inner,
            exhausted: AtomicBool::new(true),
            refused: AtomicUsize::new(0),
            sweeps: AtomicUsize::new(0),
        }
    }

    pub fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }

    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for ExhaustedHostProvider {
    fn name(&self) -> &str {
        "exhausted-host"
    }

    async fn acquire_session(&self) -> boxscore_harvester::Result<Box<dyn BrowserSession>> {
        if self.exhausted.load(Ordering::SeqCst) {
            self.refused.fetch_add(1, Ordering::SeqCst);
            return Err(boxscore_harvester::AppError::Session(
                "chrome failed to launch: too many processes".to_string(),
            ));
        }
        self.inner.acquire_session().await
    }

    fn release_session(&self, session: Box<dyn BrowserSession>) {
        self.inner.release_session(session);
    }

    async fn terminate_orphans(&self) -> boxscore_harvester::Result<usize> {
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        self.exhausted.store(false, Ordering::SeqCst);
        self.inner.terminate_orphans().await
    }

    fn live_sessions(&self) -> usize {
        self.inner.live_sessions()
    }
}

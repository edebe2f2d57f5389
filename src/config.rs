use config::{Config, ConfigError, Environment, File};
use regex::Regex;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;
use url::Url;

use crate::models::{ColumnOverride, ColumnType, WriteMode};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub browser: BrowserConfig,
    pub listing: ListingConfig,
    pub extractor: ExtractorConfig,
    pub harvest: HarvestConfig,
    pub assembler: AssemblerConfig,
    pub sink: SinkConfig,
    pub notifications: NotificationsConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    Chrome,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub backend: SessionBackend,
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Rotated per session.
    pub user_agents: Vec<String>,
    pub referer: Option<String>,
    pub page_load_timeout_secs: u64,
    pub render_wait_secs: u64,
    /// Process names the orphan sweep is allowed to kill.
    pub orphan_process_names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub url: String,
    /// Base for resolving relative event links.
    pub base_url: String,
    pub row_selector: String,
    pub date_selector: String,
    pub matchup_selector: String,
    pub date_format: String,
    /// Appended to the event link to reach its detail page.
    pub detail_path_suffix: String,
    pub wait_selector: String,
    pub page_size_selector: Option<String>,
    pub page_size_all_option: Option<String>,
    pub fetch_attempts: usize,
    pub retry_base_delay_ms: u64,
}

/// Names of the columns appended to every extracted row, in append order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContextColumns {
    pub participant: String,
    pub external_id: String,
    pub context_date: String,
    pub opponent: String,
    pub url: String,
    pub fetched_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub wait_selector: String,
    pub table_selector: String,
    pub row_selector: String,
    pub header_cell_selector: String,
    pub data_cell_selector: String,
    /// Element inside a data row holding the subject label.
    pub subject_selector: String,
    /// Leading data cells already represented by the subject label.
    pub subject_cell_count: usize,
    pub home_table_index: usize,
    pub away_table_index: usize,
    pub context_columns: ContextColumns,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub workers: usize,
    pub retry_ceiling: u32,
    pub pacing_delay_ms: u64,
    pub pass_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    pub duration_column: String,
    pub duration_pattern: String,
    /// Columns that receive the displaced context values of a shifted row.
    pub shifted_columns: Vec<String>,
    pub renames: BTreeMap<String, String>,
    pub numeric_columns: Vec<String>,
    pub date_columns: Vec<String>,
    pub date_formats: Vec<String>,
    pub timestamp_columns: Vec<String>,
    pub trim_columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Sqlite,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    pub database_url: String,
    pub directory: String,
    pub destination: String,
    pub write_mode: WriteMode,
    pub max_connections: u32,
    pub column_overrides: Vec<ColumnOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    pub subject_prefix: String,
    pub smtp: SmtpConfig,
    pub discord: DiscordConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    pub from_name: String,
    pub to_address: Option<String>,
    pub use_tls: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enables a daily-rolling log file in this directory.
    pub directory: Option<String>,
    pub file_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Chrome,
            chrome_path: None,
            headless: true,
            window_width: 2560,
            window_height: 1440,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
            ],
            referer: Some("https://www.nba.com/".to_string()),
            page_load_timeout_secs: 120,
            render_wait_secs: 10,
            orphan_process_names: vec![
                "chrome".to_string(),
                "chromium".to_string(),
                "chromium-browser".to_string(),
                "headless_shell".to_string(),
                "chromedriver".to_string(),
            ],
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            url: "https://www.nba.com/stats/teams/boxscores?Season=2024-25".to_string(),
            base_url: "https://www.nba.com".to_string(),
            row_selector: "tbody.Crom_body__UYOcU > tr".to_string(),
            date_selector: "td:nth-child(3) a".to_string(),
            matchup_selector: "td:nth-child(2) a".to_string(),
            date_format: "%m/%d/%Y".to_string(),
            detail_path_suffix: "/box-score".to_string(),
            wait_selector: "tbody.Crom_body__UYOcU".to_string(),
            page_size_selector: Some("div.Pagination_pageDropdown__KgjBU select".to_string()),
            page_size_all_option: Some("-1".to_string()),
            fetch_attempts: 3,
            retry_base_delay_ms: 2000,
        }
    }
}

impl Default for ContextColumns {
    fn default() -> Self {
        Self {
            participant: "team".to_string(),
            external_id: "game_id".to_string(),
            context_date: "game_date".to_string(),
            opponent: "matchup".to_string(),
            url: "url".to_string(),
            fetched_at: "last_updated".to_string(),
        }
    }
}

impl ContextColumns {
    pub fn ordered(&self) -> [&str; 6] {
        [
            self.participant.as_str(),
            self.external_id.as_str(),
            self.context_date.as_str(),
            self.opponent.as_str(),
            self.url.as_str(),
            self.fetched_at.as_str(),
        ]
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            wait_selector: "div.StatsTable_st__g2iuW".to_string(),
            table_selector: "div.StatsTable_st__g2iuW".to_string(),
            row_selector: "tr".to_string(),
            header_cell_selector: "th".to_string(),
            data_cell_selector: "td".to_string(),
            subject_selector: "td:first-child span.GameBoxscoreTablePlayer_gbpNameFull__cf_sn"
                .to_string(),
            subject_cell_count: 1,
            home_table_index: 1,
            away_table_index: 0,
            context_columns: ContextColumns::default(),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            retry_ceiling: 3,
            pacing_delay_ms: 0,
            pass_delay_ms: 2000,
        }
    }
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        let strings = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        Self {
            duration_column: "MIN".to_string(),
            duration_pattern: r"^\d{1,2}:\d{1,2}$".to_string(),
            shifted_columns: strings(&["FGM", "FGA", "FG%", "3PM", "3PA", "3P%"]),
            renames: BTreeMap::from([("+/-".to_string(), "plus_mins".to_string())]),
            numeric_columns: strings(&[
                "FGM", "FGA", "FG%", "3PM", "3PA", "3P%", "FTM", "FTA", "FT%", "OREB", "DREB",
                "REB", "AST", "STL", "BLK", "TO", "PF", "PTS", "plus_mins",
            ]),
            date_columns: strings(&["game_date"]),
            date_formats: strings(&["%Y-%m-%d", "%m/%d/%Y"]),
            timestamp_columns: strings(&["last_updated"]),
            trim_columns: strings(&["url"]),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::Sqlite,
            database_url: "sqlite://data/warehouse.db".to_string(),
            directory: "data/exports".to_string(),
            destination: "boxscores_uncleaned".to_string(),
            write_mode: WriteMode::Append,
            max_connections: 2,
            column_overrides: vec![ColumnOverride {
                column: "game_date".to_string(),
                column_type: ColumnType::Date,
            }],
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            subject_prefix: "NBA SCRAPING".to_string(),
            smtp: SmtpConfig::default(),
            discord: DiscordConfig::default(),
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "smtp.gmail.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from_address: None,
            from_name: "Boxscore Harvester".to_string(),
            to_address: None,
            use_tls: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl SinkKind {
    /// Plugin type the sink registers under.
    pub fn plugin_type(&self) -> &'static str {
        match self {
            SinkKind::Sqlite => "sqlite",
            SinkKind::Jsonl => "jsonl",
        }
    }
}

impl BrowserConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn render_wait(&self) -> Duration {
        Duration::from_secs(self.render_wait_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific config
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name("config/local").required(false))
            // Add environment variables with prefix "HARVEST__"
            .add_source(Environment::with_prefix("HARVEST").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.browser.chrome_path.is_none() {
            config.browser.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.browser.page_load_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Browser page_load_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.browser.user_agents.is_empty() {
            return Err(ConfigError::Message(
                "Browser user_agents must contain at least one entry".into(),
            ));
        }

        if Url::parse(&self.listing.url).is_err() {
            return Err(ConfigError::Message("Invalid listing URL format".into()));
        }

        if Url::parse(&self.listing.base_url).is_err() {
            return Err(ConfigError::Message("Invalid listing base URL format".into()));
        }

        if self.listing.fetch_attempts == 0 {
            return Err(ConfigError::Message(
                "Listing fetch_attempts must be greater than 0".into(),
            ));
        }

        for selector in [
            &self.listing.row_selector,
            &self.listing.date_selector,
            &self.listing.matchup_selector,
            &self.extractor.table_selector,
            &self.extractor.row_selector,
            &self.extractor.header_cell_selector,
            &self.extractor.data_cell_selector,
            &self.extractor.subject_selector,
        ] {
            if Selector::parse(selector).is_err() {
                return Err(ConfigError::Message(format!(
                    "Invalid CSS selector '{}'",
                    selector
                )));
            }
        }

        if self.extractor.home_table_index == self.extractor.away_table_index {
            return Err(ConfigError::Message(
                "Extractor home_table_index and away_table_index must differ".into(),
            ));
        }

        if self.harvest.workers == 0 {
            return Err(ConfigError::Message(
                "Harvest workers must be greater than 0".into(),
            ));
        }

        if self.harvest.retry_ceiling == 0 {
            return Err(ConfigError::Message(
                "Harvest retry_ceiling must be greater than 0".into(),
            ));
        }

        if Regex::new(&self.assembler.duration_pattern).is_err() {
            return Err(ConfigError::Message(
                "Invalid assembler duration_pattern".into(),
            ));
        }

        if self.assembler.shifted_columns.len() != self.extractor.context_columns.ordered().len() {
            return Err(ConfigError::Message(
                "Assembler shifted_columns must match the number of context columns".into(),
            ));
        }

        if self.sink.destination.trim().is_empty() {
            return Err(ConfigError::Message("Sink destination must not be empty".into()));
        }

        if self.sink.max_connections == 0 {
            return Err(ConfigError::Message(
                "Sink max_connections must be greater than 0".into(),
            ));
        }

        if self.notifications.smtp.enabled && self.notifications.smtp.port == 0 {
            return Err(ConfigError::Message("SMTP port must be greater than 0".into()));
        }

        Ok(())
    }
}

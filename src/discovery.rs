//! Listing acquisition and job discovery.
//!
//! The listing page is a table of per-team results, so every event shows up
//! twice (once per participant). Discovery turns those rows into one
//! [`HarvestJob`] per event.

use chrono::NaiveDate;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{BrowserSession, SessionLease, SessionProvider};
use crate::config::ListingConfig;
use crate::models::{HarvestJob, HarvestMode, Matchup};
use crate::utils::error::{AppError, Result};

const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";

/// Raw text pulled from one listing row, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingRow {
    pub date_text: String,
    pub matchup_text: String,
    pub href: Option<String>,
}

/// Jobs in listing order plus counts of what was dropped on the way.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub jobs: Vec<HarvestJob>,
    pub duplicates: usize,
    pub rejected: usize,
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| AppError::parse(format!("Invalid CSS selector '{}': {:?}", selector, e)))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pulls date, matchup and link out of every listing row.
///
/// A row missing one of the cells still produces a `ListingRow` with empty
/// text so that discovery can log and count it.
pub fn parse_listing(markup: &str, config: &ListingConfig) -> Result<Vec<ListingRow>> {
    let row_selector = parse_selector(&config.row_selector)?;
    let date_selector = parse_selector(&config.date_selector)?;
    let matchup_selector = parse_selector(&config.matchup_selector)?;

    let document = Html::parse_document(markup);
    let rows = document
        .select(&row_selector)
        .map(|row| {
            let date_text = row
                .select(&date_selector)
                .next()
                .map(element_text)
                .unwrap_or_default();
            let matchup = row.select(&matchup_selector).next();

            ListingRow {
                date_text,
                matchup_text: matchup.map(element_text).unwrap_or_default(),
                href: matchup.and_then(|a| a.value().attr("href")).map(str::to_string),
            }
        })
        .collect();

    Ok(rows)
}

/// Stable identifier for an event: the last non-empty path segment of its link.
pub fn external_id_from_link(link: &Url) -> Option<String> {
    link.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

fn detail_url(link: &Url, suffix: &str) -> String {
    let base = link.as_str().trim_end_matches('/');
    format!("{}{}", base, suffix)
}

/// Builds the deduplicated job list from listing rows.
///
/// In [`HarvestMode::Current`] only rows dated `target_date` become jobs; rows
/// newer than the target are skipped and the scan stops at the first older row,
/// relying on the listing being sorted newest first. Rows with an unreadable
/// date, matchup or link are logged and counted as rejected.
pub fn discover(
    rows: &[ListingRow],
    config: &ListingConfig,
    mode: HarvestMode,
    target_date: NaiveDate,
) -> Result<DiscoveryOutcome> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| AppError::Discovery(format!("Invalid listing base URL: {}", e)))?;

    let mut outcome = DiscoveryOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, row) in rows.iter().enumerate() {
        let date = match NaiveDate::parse_from_str(row.date_text.trim(), &config.date_format) {
            Ok(date) => date,
            Err(_) => {
                warn!("Skipping listing row {}: unrecognized date '{}'", index, row.date_text);
                outcome.rejected += 1;
                continue;
            }
        };

        if mode == HarvestMode::Current {
            if date > target_date {
                continue;
            }
            if date < target_date {
                debug!("Row {} dated {} is older than {}, stopping scan", index, date, target_date);
                break;
            }
        }

        let Some(link) = row.href.as_deref().and_then(|href| base.join(href).ok()) else {
            warn!("Skipping listing row {}: missing or invalid event link", index);
            outcome.rejected += 1;
            continue;
        };
        let Some(external_id) = external_id_from_link(&link) else {
            warn!("Skipping listing row {}: no identifier in link {}", index, link);
            outcome.rejected += 1;
            continue;
        };

        let Some(matchup) = Matchup::parse(&row.matchup_text) else {
            warn!(
                "Skipping listing row {}: unrecognized matchup '{}'",
                index, row.matchup_text
            );
            outcome.rejected += 1;
            continue;
        };

        if !seen.insert(external_id.clone()) {
            outcome.duplicates += 1;
            continue;
        }

        let url = detail_url(&link, &config.detail_path_suffix);
        outcome
            .jobs
            .push(HarvestJob::new(external_id, date, matchup, url));
    }

    info!(
        "Discovered {} jobs ({} duplicate rows, {} rejected rows)",
        outcome.jobs.len(),
        outcome.duplicates,
        outcome.rejected
    );
    Ok(outcome)
}

/// Loads the listing page in an already acquired session and returns its markup.
///
/// Historical mode first switches the page-size control to show every row. That
/// step and the scroll are best effort: a backend that cannot run scripts still
/// yields the first page of results.
pub async fn fetch_listing(
    session: &mut dyn BrowserSession,
    config: &ListingConfig,
    mode: HarvestMode,
    page_timeout: Duration,
    render_wait: Duration,
) -> Result<String> {
    session.fetch(&config.url, page_timeout).await?;
    session.wait_for(&config.wait_selector, render_wait).await?;

    if mode == HarvestMode::Historical {
        if let Err(e) = select_all_rows(session, config, render_wait).await {
            warn!("Could not expand listing to all rows: {}", e);
        }
    }

    if let Err(e) = session.run_script(SCROLL_TO_BOTTOM).await {
        debug!("Scroll script not run: {}", e);
    }

    session.content().await
}

async fn select_all_rows(
    session: &mut dyn BrowserSession,
    config: &ListingConfig,
    timeout: Duration,
) -> Result<()> {
    let (Some(selector), Some(option)) = (&config.page_size_selector, &config.page_size_all_option)
    else {
        return Ok(());
    };

    session.click(selector, timeout).await?;

    let script = format!(
        "(() => {{ const s = document.querySelector({sel}); if (!s) return false; \
         s.value = {opt}; s.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
        sel = serde_json::to_string(selector)?,
        opt = serde_json::to_string(option)?,
    );
    let applied = session.run_script(&script).await?;
    if applied != serde_json::Value::Bool(true) {
        return Err(AppError::ElementNotFound {
            selector: selector.clone(),
        });
    }

    session.wait_for(&config.wait_selector, timeout).await
}

/// Fetches the listing with a fresh session per attempt, backing off
/// exponentially between attempts. Exhaustion is a fatal discovery error.
pub async fn fetch_listing_with_retry(
    provider: &dyn SessionProvider,
    config: &ListingConfig,
    mode: HarvestMode,
    page_timeout: Duration,
    render_wait: Duration,
) -> Result<String> {
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(config.retry_base_delay_ms / 2)
        .max_delay(Duration::from_secs(60))
        .take(config.fetch_attempts.saturating_sub(1));

    Retry::start(strategy, || async move {
        let mut lease = SessionLease::acquire(provider).await?;
        let result = fetch_listing(&mut *lease, config, mode, page_timeout, render_wait).await;
        if let Err(e) = &result {
            warn!("Listing fetch attempt failed: {}", e);
        }
        result
    })
    .await
    .map_err(|e| AppError::Discovery(format!("Upstream listing fetch failed: {}", e)))
}

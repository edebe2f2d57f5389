//! Detail-page extraction: one job in, one [`ExtractionResult`] out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info_span};

use crate::browser::{SessionLease, SessionProvider};
use crate::config::{BrowserConfig, ExtractorConfig};
use crate::models::{
    CellValue, ExtractionResult, FailureReason, HarvestJob, ParticipantRole, Record,
};
use crate::utils::error::{AppError, Result};

/// Anything that can turn a job into rows. Failures are values, never errors.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, job: &HarvestJob) -> ExtractionResult;
}

/// Pre-parsed selectors plus the table-to-role mapping.
pub struct BoxScoreLayout {
    config: ExtractorConfig,
    table: Selector,
    row: Selector,
    header_cell: Selector,
    data_cell: Selector,
    subject: Selector,
}

impl BoxScoreLayout {
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        let parse = |selector: &str| {
            Selector::parse(selector).map_err(|e| {
                AppError::parse(format!("Invalid CSS selector '{}': {:?}", selector, e))
            })
        };

        Ok(Self {
            table: parse(&config.table_selector)?,
            row: parse(&config.row_selector)?,
            header_cell: parse(&config.header_cell_selector)?,
            data_cell: parse(&config.data_cell_selector)?,
            subject: parse(&config.subject_selector)?,
            config,
        })
    }

    /// Table indices paired with roles, in page order.
    fn role_mapping(&self) -> [(usize, ParticipantRole); 2] {
        let away = (self.config.away_table_index, ParticipantRole::Away);
        let home = (self.config.home_table_index, ParticipantRole::Home);
        if away.0 < home.0 { [away, home] } else { [home, away] }
    }

    fn tables_needed(&self) -> usize {
        self.config.home_table_index.max(self.config.away_table_index) + 1
    }
}

fn cell_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn context_values(
    job: &HarvestJob,
    role: ParticipantRole,
    fetched_at: DateTime<Utc>,
) -> [CellValue; 6] {
    [
        CellValue::text(job.participant(role)),
        CellValue::text(job.external_id.as_str()),
        CellValue::Date(job.context_date),
        CellValue::text(job.opponent(role)),
        CellValue::text(job.url.as_str()),
        CellValue::Timestamp(fetched_at),
    ]
}

/// Converts detail-page markup into records for both participants.
///
/// The first row of each table is its header and the last is the totals row;
/// everything in between is a subject row. A table with a header and no subject
/// rows, or subject rows and no header, fails the whole job.
pub fn parse_box_score(
    markup: &str,
    job: &HarvestJob,
    layout: &BoxScoreLayout,
    fetched_at: DateTime<Utc>,
) -> std::result::Result<Vec<Record>, FailureReason> {
    let document = Html::parse_document(markup);
    let tables: Vec<ElementRef<'_>> = document.select(&layout.table).collect();

    let expected = layout.tables_needed();
    if tables.len() < expected {
        return Err(FailureReason::MissingTables {
            expected,
            found: tables.len(),
        });
    }

    let context_columns = layout.config.context_columns.ordered();
    let mut records = Vec::new();

    for (table_index, role) in layout.role_mapping() {
        let rows: Vec<ElementRef<'_>> = tables[table_index].select(&layout.row).collect();

        let header: Vec<String> = rows
            .first()
            .map(|row| row.select(&layout.header_cell).map(cell_text).collect())
            .unwrap_or_default();
        let data_rows = if rows.len() > 2 {
            &rows[1..rows.len() - 1]
        } else {
            &[][..]
        };

        let detail = match (header.is_empty(), data_rows.is_empty()) {
            (false, false) => None,
            (false, true) => Some("header without data rows"),
            (true, false) => Some("data rows without header"),
            (true, true) => Some("no header and no data rows"),
        };
        if let Some(detail) = detail {
            return Err(FailureReason::TableShape {
                table_index,
                detail: detail.to_string(),
            });
        }

        let columns: Vec<String> = header
            .into_iter()
            .chain(context_columns.iter().map(|c| c.to_string()))
            .collect();

        for row in data_rows {
            let cells: Vec<ElementRef<'_>> = row.select(&layout.data_cell).collect();
            let subject = row
                .select(&layout.subject)
                .next()
                .or_else(|| cells.first().copied())
                .map(cell_text)
                .unwrap_or_default();

            let values: Vec<CellValue> = std::iter::once(CellValue::Text(subject))
                .chain(
                    cells
                        .iter()
                        .skip(layout.config.subject_cell_count)
                        .map(|cell| CellValue::Text(cell_text(*cell))),
                )
                .chain(context_values(job, role, fetched_at))
                .collect();

            let record = Record::from_positional(&columns, values);
            if record.shape_violation {
                debug!(
                    "Shape violation in table {} of {} ({} columns)",
                    table_index,
                    job.external_id,
                    columns.len()
                );
            }
            records.push(record);
        }
    }

    Ok(records)
}

/// Browser-backed extractor. Each call leases its own session.
pub struct PageExtractor {
    provider: Arc<dyn SessionProvider>,
    layout: BoxScoreLayout,
    page_timeout: Duration,
    render_wait: Duration,
}

impl PageExtractor {
    pub fn new(
        provider: Arc<dyn SessionProvider>,
        config: ExtractorConfig,
        browser: &BrowserConfig,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            layout: BoxScoreLayout::new(config)?,
            page_timeout: browser.page_load_timeout(),
            render_wait: browser.render_wait(),
        })
    }

    async fn load_markup(&self, job: &HarvestJob) -> std::result::Result<String, FailureReason> {
        let mut lease = SessionLease::acquire(self.provider.as_ref())
            .await
            .map_err(|e| FailureReason::SessionUnavailable(e.to_string()))?;

        lease
            .fetch(&job.url, self.page_timeout)
            .await
            .map_err(|e| match e {
                AppError::Timeout { .. } => FailureReason::Timeout(e.to_string()),
                other => FailureReason::Fetch(other.to_string()),
            })?;

        let wait_selector = &self.layout.config.wait_selector;
        lease
            .wait_for(wait_selector, self.render_wait)
            .await
            .map_err(|e| match e {
                AppError::ElementNotFound { .. } | AppError::Timeout { .. } => {
                    FailureReason::MissingElement(wait_selector.clone())
                }
                other => FailureReason::Fetch(other.to_string()),
            })?;

        lease
            .content()
            .await
            .map_err(|e| FailureReason::Fetch(e.to_string()))
    }
}

#[async_trait]
impl Extract for PageExtractor {
    async fn extract(&self, job: &HarvestJob) -> ExtractionResult {
        let span = info_span!("extract", external_id = %job.external_id);

        async {
            let parsed = match self.load_markup(job).await {
                Ok(markup) => parse_box_score(&markup, job, &self.layout, Utc::now()),
                Err(reason) => Err(reason),
            };

            match parsed {
                Ok(records) => {
                    debug!("Extracted {} rows from {}", records.len(), job.url);
                    metrics::counter!("harvest_rows_extracted_total")
                        .increment(records.len() as u64);
                    ExtractionResult::Rows(records)
                }
                Err(reason) => {
                    debug!("Extraction of {} failed: {}", job.url, reason);
                    ExtractionResult::failed(job.clone(), reason)
                }
            }
        }
        .instrument(span)
        .await
    }
}

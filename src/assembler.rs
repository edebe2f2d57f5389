//! Dataset assembly: concatenation, shape repair and type normalization.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use tracing::{debug, info};

use crate::config::{AssemblerConfig, ContextColumns};
use crate::models::{CellValue, Record, Table};
use crate::utils::error::{AppError, Result};

/// Moves displaced context values back where they belong.
///
/// A row whose duration cell does not look like `mm:ss` lost cells during
/// extraction, which pushed its context values into the columns right after
/// the duration. Those values are copied into the context columns and the
/// source columns are nulled.
pub struct ShapeRepair<'a> {
    duration_column: &'a str,
    duration_pattern: Regex,
    sources: &'a [String],
    targets: [&'a str; 6],
}

impl<'a> ShapeRepair<'a> {
    pub fn new(config: &'a AssemblerConfig, context: &'a ContextColumns) -> Result<Self> {
        let duration_pattern = Regex::new(&config.duration_pattern).map_err(|e| {
            AppError::parse(format!(
                "Invalid duration pattern '{}': {}",
                config.duration_pattern, e
            ))
        })?;

        Ok(Self {
            duration_column: &config.duration_column,
            duration_pattern,
            sources: &config.shifted_columns,
            targets: context.ordered(),
        })
    }

    fn needs_repair(&self, record: &Record) -> bool {
        let duration_ok = record
            .get(self.duration_column)
            .and_then(CellValue::as_text)
            .is_some_and(|text| self.duration_pattern.is_match(text));
        if duration_ok {
            return false;
        }

        // Already repaired rows have nothing left in the source columns.
        self.sources
            .iter()
            .any(|column| record.get(column).is_some_and(|v| !v.is_null()))
    }

    /// Repairs `record` in place. Returns whether anything moved.
    pub fn apply(&self, record: &mut Record) -> bool {
        if !self.needs_repair(record) {
            return false;
        }

        for (source, target) in self.sources.iter().zip(self.targets) {
            let Some(value) = record.get_mut(source).map(std::mem::take) else {
                continue;
            };
            record.set(target, value);
        }
        true
    }
}

fn matches_any(column: &str, names: &[String]) -> bool {
    names.iter().any(|name| name.eq_ignore_ascii_case(column))
}

fn coerce_number(value: CellValue) -> CellValue {
    match value {
        CellValue::Number(n) => CellValue::Number(n),
        CellValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(CellValue::Number)
            .unwrap_or(CellValue::Null),
        _ => CellValue::Null,
    }
}

fn coerce_date(value: CellValue, formats: &[String]) -> CellValue {
    match value {
        CellValue::Date(date) => CellValue::Date(date),
        CellValue::Timestamp(ts) => CellValue::Date(ts.date_naive()),
        CellValue::Text(text) => formats
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(text.trim(), format).ok())
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        _ => CellValue::Null,
    }
}

fn coerce_timestamp(value: CellValue) -> CellValue {
    match value {
        CellValue::Timestamp(ts) => CellValue::Timestamp(ts),
        CellValue::Date(date) => date
            .and_hms_opt(0, 0, 0)
            .map(|dt| CellValue::Timestamp(dt.and_utc()))
            .unwrap_or(CellValue::Null),
        CellValue::Text(text) => {
            let text = text.trim();
            DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
                })
                .map(CellValue::Timestamp)
                .unwrap_or(CellValue::Null)
        }
        _ => CellValue::Null,
    }
}

fn normalize_column(table: &mut Table, index: usize, coerce: impl Fn(CellValue) -> CellValue) {
    for row in table.rows.iter_mut() {
        let value = std::mem::take(&mut row[index]);
        row[index] = coerce(value);
    }
}

/// Turns all successful extractions of a run into one warehouse-ready table.
///
/// Shape repair runs on every record before anything is coerced, so repaired
/// context values go through the same normalization as everything else.
pub fn finalize(
    mut records: Vec<Record>,
    config: &AssemblerConfig,
    context: &ContextColumns,
) -> Result<Table> {
    let repair = ShapeRepair::new(config, context)?;
    let repaired = records
        .iter_mut()
        .map(|record| repair.apply(record))
        .filter(|moved| *moved)
        .count();
    if repaired > 0 {
        info!("Repaired {} shape-violation rows", repaired);
    }

    let mut table = Table::from_records(records);

    for column in table.columns.iter_mut() {
        if let Some(renamed) = config.renames.get(column.as_str()) {
            *column = renamed.clone();
        }
    }

    for index in 0..table.columns.len() {
        let column = table.columns[index].clone();

        if matches_any(&column, &config.trim_columns) {
            normalize_column(&mut table, index, |value| match value {
                CellValue::Text(text) => CellValue::Text(text.trim().to_string()),
                other => other,
            });
        }

        if matches_any(&column, &config.numeric_columns) {
            normalize_column(&mut table, index, coerce_number);
        } else if matches_any(&column, &config.date_columns) {
            normalize_column(&mut table, index, |value| {
                coerce_date(value, &config.date_formats)
            });
        } else if matches_any(&column, &config.timestamp_columns) {
            normalize_column(&mut table, index, coerce_timestamp);
        }
    }

    for column in table.columns.iter_mut() {
        *column = column.to_lowercase();
    }

    debug!(
        "Finalized table with {} rows and {} columns",
        table.len(),
        table.columns.len()
    );
    Ok(table)
}

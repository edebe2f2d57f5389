use serde::Serialize;
use std::fmt;

use crate::models::{HarvestJob, Record};

/// Outcome of one extraction attempt.
#[derive(Debug, Clone)]
pub enum ExtractionResult {
    Rows(Vec<Record>),
    Failed { job: HarvestJob, reason: FailureReason },
}

impl ExtractionResult {
    pub fn failed(job: HarvestJob, reason: FailureReason) -> Self {
        ExtractionResult::Failed { job, reason }
    }

    pub fn is_rows(&self) -> bool {
        matches!(self, ExtractionResult::Rows(_))
    }

    pub fn warrants_sweep(&self) -> bool {
        match self {
            ExtractionResult::Rows(_) => false,
            ExtractionResult::Failed { reason, .. } => reason.warrants_sweep(),
        }
    }
}

/// Why a job attempt failed. Every variant is retryable up to the ceiling.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// No browser session could be acquired.
    SessionUnavailable(String),
    Fetch(String),
    Timeout(String),
    /// The awaited table container never appeared.
    MissingElement(String),
    /// Fewer stats tables than the role mapping needs.
    MissingTables { expected: usize, found: usize },
    /// A table had a header and no data rows, or the reverse.
    TableShape { table_index: usize, detail: String },
    WorkerPanicked(String),
}

impl FailureReason {
    /// Failures that suggest leaked browser processes.
    pub fn warrants_sweep(&self) -> bool {
        matches!(
            self,
            FailureReason::SessionUnavailable(_) | FailureReason::WorkerPanicked(_)
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::SessionUnavailable(e) => write!(f, "session unavailable: {}", e),
            FailureReason::Fetch(e) => write!(f, "fetch failed: {}", e),
            FailureReason::Timeout(e) => write!(f, "timed out: {}", e),
            FailureReason::MissingElement(sel) => write!(f, "element never appeared: {}", sel),
            FailureReason::MissingTables { expected, found } => {
                write!(f, "expected {} stats tables, found {}", expected, found)
            }
            FailureReason::TableShape {
                table_index,
                detail,
            } => write!(f, "table {} unextractable: {}", table_index, detail),
            FailureReason::WorkerPanicked(e) => write!(f, "worker panicked: {}", e),
        }
    }
}

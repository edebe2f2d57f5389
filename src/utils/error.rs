use thiserror::Error;

/// Run-level errors.
///
/// Per-job extraction problems never surface as `AppError`; they travel as
/// [`crate::models::FailureReason`] inside an `ExtractionResult::Failed`.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Session unavailable: {0}")]
    Session(String),

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Unsupported operation for {backend} sessions: {operation}")]
    Unsupported { backend: String, operation: String },

    #[error("Listing discovery failed: {0}")]
    Discovery(String),

    #[error("Sink error: {sink}: {message}")]
    Sink { sink: String, message: String },

    #[error("Notification error: {notifier}: {message}")]
    Notification { notifier: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn parse(message: impl Into<String>) -> Self {
        AppError::Parse {
            message: message.into(),
        }
    }

    pub fn sink(sink: impl Into<String>, message: impl ToString) -> Self {
        AppError::Sink {
            sink: sink.into(),
            message: message.to_string(),
        }
    }

    pub fn notification(notifier: impl Into<String>, message: impl ToString) -> Self {
        AppError::Notification {
            notifier: notifier.into(),
            message: message.to_string(),
        }
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

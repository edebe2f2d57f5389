pub mod assembler;
pub mod browser;
pub mod config;
pub mod discovery;
pub mod extractor;
pub mod harvester;
pub mod models;
pub mod orchestrator;
pub mod plugins;
pub mod utils;

// Re-export commonly used types
pub use config::AppConfig;
pub use harvester::{Harvester, RunOutcome, RunParams, Season};
pub use orchestrator::AbortSignal;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;

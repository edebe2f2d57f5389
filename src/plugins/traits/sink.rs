use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{ColumnOverride, Table, WriteMode};
use crate::utils::error::Result;

/// Where and how a finalized table is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkRequest {
    pub destination: String,
    pub write_mode: WriteMode,
    pub column_overrides: Vec<ColumnOverride>,
}

/// Trait for implementing dataset destinations (warehouse tables, files)
#[async_trait]
pub trait SinkPlugin: Send + Sync {
    fn name(&self) -> &str;
    fn plugin_type(&self) -> &str;

    /// Writes the whole table as one unit and returns the number of rows written.
    async fn write(&self, table: &Table, request: &SinkRequest) -> Result<usize>;
}

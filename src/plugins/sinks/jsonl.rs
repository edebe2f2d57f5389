use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::models::{Table, WriteMode};
use crate::plugins::traits::{SinkPlugin, SinkRequest};
use crate::utils::error::{AppError, Result};

/// One JSON object per row in `<directory>/<destination>.jsonl`.
pub struct JsonLinesSink {
    directory: PathBuf,
}

impl JsonLinesSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn path_for(&self, destination: &str) -> PathBuf {
        self.directory.join(format!("{}.jsonl", destination))
    }

    fn encode(table: &Table) -> Result<String> {
        let mut buffer = String::new();
        for row in &table.rows {
            let object: Map<String, Value> = table
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| -> Result<(String, Value)> {
                    Ok((column.clone(), serde_json::to_value(value)?))
                })
                .collect::<Result<_>>()?;
            buffer.push_str(&serde_json::to_string(&object)?);
            buffer.push('\n');
        }
        Ok(buffer)
    }
}

fn valid_file_stem(destination: &str) -> bool {
    !destination.trim().is_empty()
        && Path::new(destination).components().count() == 1
        && !destination.contains(['/', '\\'])
}

#[async_trait]
impl SinkPlugin for JsonLinesSink {
    fn name(&self) -> &str {
        "JSON Lines File"
    }

    fn plugin_type(&self) -> &str {
        "jsonl"
    }

    async fn write(&self, table: &Table, request: &SinkRequest) -> Result<usize> {
        if !valid_file_stem(&request.destination) {
            return Err(AppError::sink(
                "jsonl",
                format!("Invalid destination '{}'", request.destination),
            ));
        }

        fs::create_dir_all(&self.directory).await?;
        let path = self.path_for(&request.destination);

        let mut options = OpenOptions::new();
        options.create(true);
        match request.write_mode {
            WriteMode::Append => options.append(true),
            WriteMode::Replace => options.write(true).truncate(true),
        };

        let mut file = options.open(&path).await?;
        file.write_all(Self::encode(table)?.as_bytes()).await?;
        file.flush().await?;

        tracing::info!("Wrote {} rows to {}", table.len(), path.display());
        Ok(table.len())
    }
}

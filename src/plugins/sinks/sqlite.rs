use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

use crate::models::{CellValue, Table, WriteMode};
use crate::plugins::traits::{SinkPlugin, SinkRequest};
use crate::utils::error::{AppError, Result};

/// Warehouse tables in a SQLite database. One destination is one table.
pub struct SqliteSink {
    pool: SqlitePool,
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl SqliteSink {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn existing_columns(
        conn: &mut sqlx::SqliteConnection,
        table: &str,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_identifier(table)))
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl SinkPlugin for SqliteSink {
    fn name(&self) -> &str {
        "SQLite Warehouse"
    }

    fn plugin_type(&self) -> &str {
        "sqlite"
    }

    async fn write(&self, table: &Table, request: &SinkRequest) -> Result<usize> {
        if request.destination.trim().is_empty() {
            return Err(AppError::sink("sqlite", "Destination table name is empty"));
        }
        if table.columns.is_empty() {
            return Ok(0);
        }

        let destination = quote_identifier(&request.destination);
        let mut tx = self.pool.begin().await?;

        if request.write_mode == WriteMode::Replace {
            sqlx::query(&format!("DROP TABLE IF EXISTS {}", destination))
                .execute(&mut *tx)
                .await?;
        }

        let definitions: Vec<String> = table
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let column_type = table.column_type(index, &request.column_overrides);
                format!("{} {}", quote_identifier(column), column_type.sql_type())
            })
            .collect();
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            destination,
            definitions.join(", ")
        ))
        .execute(&mut *tx)
        .await?;

        // Appending a run that saw new columns widens the table.
        let existing = Self::existing_columns(&mut tx, &request.destination).await?;
        for (index, column) in table.columns.iter().enumerate() {
            if !existing.iter().any(|c| c == column) {
                let column_type = table.column_type(index, &request.column_overrides);
                sqlx::query(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    destination,
                    quote_identifier(column),
                    column_type.sql_type()
                ))
                .execute(&mut *tx)
                .await?;
            }
        }

        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            destination,
            table
                .columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; table.columns.len()].join(", ")
        );

        for row in &table.rows {
            let mut query = sqlx::query(&insert);
            for value in row {
                query = match value {
                    CellValue::Null => query.bind(None::<String>),
                    CellValue::Text(text) => query.bind(text.clone()),
                    CellValue::Number(n) => query.bind(*n),
                    CellValue::Date(date) => query.bind(*date),
                    CellValue::Timestamp(ts) => query.bind(*ts),
                };
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        tracing::info!(
            "Wrote {} rows to {} ({})",
            table.len(),
            request.destination,
            request.write_mode
        );
        Ok(table.len())
    }
}

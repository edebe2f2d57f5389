use serde::{Deserialize, Serialize};

use crate::models::{CellValue, Record};

/// Column-aligned output of the assembler; the unit handed to a sink.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Real,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

/// Forces a sink-side column type regardless of what the values look like.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnOverride {
    pub column: String,
    pub column_type: ColumnType,
}

impl Table {
    /// Aligns records by column name. Columns appear in first-seen order and
    /// a record lacking a column gets `Null` there.
    pub fn from_records(records: Vec<Record>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in &records {
            for name in record.columns() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.to_string());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(CellValue::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &CellValue>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Type of a column as stored: an override wins, otherwise the first
    /// non-null value decides, and an all-null column is `Text`.
    pub fn column_type(&self, index: usize, overrides: &[ColumnOverride]) -> ColumnType {
        if let Some(o) = overrides
            .iter()
            .find(|o| self.columns.get(index).is_some_and(|c| *c == o.column))
        {
            return o.column_type;
        }

        self.rows
            .iter()
            .map(|row| &row[index])
            .find(|v| !v.is_null())
            .map(|v| match v {
                CellValue::Number(_) => ColumnType::Real,
                CellValue::Date(_) => ColumnType::Date,
                CellValue::Timestamp(_) => ColumnType::Timestamp,
                _ => ColumnType::Text,
            })
            .unwrap_or(ColumnType::Text)
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// A single cell. Extraction only produces `Text` and `Null`; the typed
/// variants appear after the assembler coerces the dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Null,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

/// One extracted row keyed by column name, in header order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    fields: Vec<(String, CellValue)>,
    /// Set when the row carried a different number of values than the header.
    pub shape_violation: bool,
}

impl Record {
    /// Zips `values` onto `columns` by position.
    ///
    /// Short rows are padded with `Null` and long rows truncated, so the record
    /// always has exactly `columns.len()` fields. Either case flags the record.
    pub fn from_positional(columns: &[String], values: Vec<CellValue>) -> Self {
        let shape_violation = values.len() != columns.len();
        let mut values = values.into_iter();

        let fields = columns
            .iter()
            .map(|name| (name.clone(), values.next().unwrap_or(CellValue::Null)))
            .collect();

        Self {
            fields,
            shape_violation,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&CellValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut CellValue> {
        self.fields
            .iter_mut()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Overwrites an existing column. Returns `false` if the column is absent.
    pub fn set(&mut self, column: &str, value: CellValue) -> bool {
        match self.get_mut(column) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        for (name, _) in self.fields.iter_mut() {
            if name == from {
                *name = to.to_string();
            }
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn fields(&self) -> &[(String, CellValue)] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [(String, CellValue)] {
        &mut self.fields
    }
}

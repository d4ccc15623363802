//! Typed, column-oriented tabular frame.
//!
//! A [`Frame`] is an ordered set of equally long named columns. Missing cells
//! are `None`; a floating-point NaN is also reported as missing by
//! [`Frame::missing_values`].

use crate::data::schema::{ColumnKinds, ColumnType, infer_column_type};
use crate::data::source::DataBatch;
use crate::error::MonitorError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Timestamp layouts accepted when parsing text cells.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Storage for one column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Float(_) => ColumnType::Float,
            Self::Text(_) => ColumnType::String,
            Self::Timestamp(_) => ColumnType::DateTime,
        }
    }

    /// Number of missing cells (`None`, or NaN). Infinities are values.
    pub fn missing_count(&self) -> usize {
        match self {
            Self::Float(v) => v.iter().filter(|c| c.is_none_or(f64::is_nan)).count(),
            Self::Text(v) => v.iter().filter(|c| c.is_none()).count(),
            Self::Timestamp(v) => v.iter().filter(|c| c.is_none()).count(),
        }
    }

    fn filter(&self, mask: &[bool]) -> Self {
        fn keep<T: Clone>(values: &[T], mask: &[bool]) -> Vec<T> {
            values
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(v, _)| v.clone())
                .collect()
        }
        match self {
            Self::Float(v) => Self::Float(keep(v, mask)),
            Self::Text(v) => Self::Text(keep(v, mask)),
            Self::Timestamp(v) => Self::Timestamp(keep(v, mask)),
        }
    }
}

/// A named column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn float(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self::new(name, ColumnData::Float(values))
    }

    pub fn text(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self::new(name, ColumnData::Text(values))
    }

    pub fn timestamp(name: impl Into<String>, values: Vec<Option<NaiveDateTime>>) -> Self {
        Self::new(name, ColumnData::Timestamp(values))
    }
}

/// Per-column and whole-frame missing-cell counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingValues {
    /// `(column, missing cells)` in frame order.
    pub per_column: Vec<(String, usize)>,
    pub rows: usize,
    pub missing_cells: usize,
    pub total_cells: usize,
}

impl MissingValues {
    /// Fraction of missing cells, or `None` for a frame without cells.
    pub fn share(&self) -> Option<f64> {
        if self.total_cells == 0 {
            None
        } else {
            Some(self.missing_cells as f64 / self.total_cells as f64)
        }
    }

    /// Fraction of missing cells within one column.
    pub fn column_share(&self, name: &str) -> Option<f64> {
        if self.rows == 0 {
            return None;
        }
        self.per_column
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, missing)| *missing as f64 / self.rows as f64)
    }
}

/// Column-oriented table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<Column>,
    height: usize,
}

impl Frame {
    /// An empty frame with no columns.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frame, rejecting duplicate names and ragged columns.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, MonitorError> {
        let height = columns.first().map(|c| c.data.len()).unwrap_or(0);
        for (i, col) in columns.iter().enumerate() {
            if col.data.len() != height {
                return Err(MonitorError::schema(format!(
                    "column '{}' has {} rows, expected {height}",
                    col.name,
                    col.data.len()
                )));
            }
            if columns[..i].iter().any(|c| c.name == col.name) {
                return Err(MonitorError::schema(format!(
                    "duplicate column '{}'",
                    col.name
                )));
            }
        }
        Ok(Self { columns, height })
    }

    /// Convert a loaded batch into typed columns.
    ///
    /// Timestamp columns are parsed; declared categorical columns always become
    /// text; any other column is numeric when every present value parses as a
    /// number and text otherwise.
    pub fn from_batch(batch: &DataBatch, kinds: &ColumnKinds) -> Result<Self, MonitorError> {
        let mut columns = Vec::with_capacity(batch.columns.len());
        for (idx, name) in batch.columns.iter().enumerate() {
            let values: Vec<&serde_json::Value> = batch
                .rows
                .iter()
                .map(|row| row.get(idx).unwrap_or(&serde_json::Value::Null))
                .collect();

            let data = if kinds.is_timestamp(name) {
                ColumnData::Timestamp(
                    values
                        .iter()
                        .map(|v| timestamp_cell(v))
                        .collect::<Result<_, _>>()
                        .map_err(|bad| {
                            MonitorError::dataset(format!(
                                "column '{name}': cannot parse '{bad}' as a timestamp"
                            ))
                        })?,
                )
            } else if kinds.is_categorical(name) {
                ColumnData::Text(values.iter().map(|v| text_cell(v)).collect())
            } else {
                let owned: Vec<serde_json::Value> = values.iter().map(|v| (*v).clone()).collect();
                match infer_column_type(&owned) {
                    ColumnType::Integer | ColumnType::Float | ColumnType::Null => {
                        ColumnData::Float(values.iter().map(|v| float_cell(v)).collect())
                    }
                    ColumnType::String if values.iter().all(|v| parses_as_float(v)) => {
                        ColumnData::Float(values.iter().map(|v| float_cell(v)).collect())
                    }
                    _ => ColumnData::Text(values.iter().map(|v| text_cell(v)).collect()),
                }
            };
            columns.push(Column::new(name.clone(), data));
        }

        let mut frame = Self::from_columns(columns)?;
        if frame.columns.is_empty() {
            frame.height = batch.rows.len();
        }
        Ok(frame)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Values of a numeric column.
    pub fn floats(&self, name: &str) -> Result<&[Option<f64>], MonitorError> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Float(v)) => Ok(v),
            Some(other) => Err(MonitorError::schema(format!(
                "column '{name}' is {:?}, expected float",
                other.column_type()
            ))),
            None => Err(MonitorError::schema(format!("column '{name}' not found"))),
        }
    }

    /// Values of a timestamp column.
    pub fn timestamps(&self, name: &str) -> Result<&[Option<NaiveDateTime>], MonitorError> {
        match self.column(name).map(|c| &c.data) {
            Some(ColumnData::Timestamp(v)) => Ok(v),
            Some(other) => Err(MonitorError::schema(format!(
                "column '{name}' is {:?}, expected timestamp",
                other.column_type()
            ))),
            None => Err(MonitorError::schema(format!("column '{name}' not found"))),
        }
    }

    /// Add a column, replacing any existing column of the same name in place.
    pub fn set_column(&mut self, column: Column) -> Result<(), MonitorError> {
        if !self.columns.is_empty() && column.data.len() != self.height {
            return Err(MonitorError::schema(format!(
                "column '{}' has {} rows, frame has {}",
                column.name,
                column.data.len(),
                self.height
            )));
        }
        if self.columns.is_empty() {
            self.height = column.data.len();
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    /// Keep rows whose mask entry is `true`.
    pub fn filter(&self, mask: &[bool]) -> Result<Self, MonitorError> {
        if mask.len() != self.height {
            return Err(MonitorError::invalid_input(format!(
                "mask has {} entries, frame has {} rows",
                mask.len(),
                self.height
            )));
        }
        Ok(Self {
            columns: self
                .columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.data.filter(mask)))
                .collect(),
            height: mask.iter().filter(|k| **k).count(),
        })
    }

    /// Rows whose `column` timestamp lies in `[start, end)`.
    ///
    /// Rows with a missing timestamp never match.
    pub fn slice_time_range(
        &self,
        column: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Self, MonitorError> {
        let mask: Vec<bool> = self
            .timestamps(column)?
            .iter()
            .map(|ts| ts.is_some_and(|t| t >= start && t < end))
            .collect();
        self.filter(&mask)
    }

    /// Snapshot of missing cells across every column.
    pub fn missing_values(&self) -> MissingValues {
        let per_column: Vec<(String, usize)> = self
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.data.missing_count()))
            .collect();
        let missing_cells = per_column.iter().map(|(_, n)| n).sum();
        MissingValues {
            per_column,
            rows: self.height,
            missing_cells,
            total_cells: self.height * self.columns.len(),
        }
    }
}

fn parses_as_float(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::Number(_) => true,
        serde_json::Value::String(s) => s.trim().is_empty() || s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn float_cell(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Category label for a float. Integral values drop the fraction so that
/// `138` and `138.0` name the same category, at any magnitude.
pub(crate) fn float_label(x: f64) -> String {
    if x == 0.0 {
        "0".to_string()
    } else if x.is_finite() && x.fract() == 0.0 {
        format!("{x:.0}")
    } else {
        x.to_string()
    }
}

/// Render a cell as a category label.
pub(crate) fn text_cell(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(f) => Some(float_label(f)),
            None => Some(n.to_string()),
        },
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn timestamp_cell(value: &serde_json::Value) -> Result<Option<NaiveDateTime>, String> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(None),
        serde_json::Value::String(s) => parse_timestamp(s.trim())
            .map(Some)
            .ok_or_else(|| s.clone()),
        other => Err(other.to_string()),
    }
}

/// Parse the timestamp layouts found in trip exports.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

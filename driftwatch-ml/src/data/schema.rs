//! Column type inference and column-role declarations.

use crate::data::frame::Frame;
use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Column data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Boolean,
    DateTime,
    Null,
    Unknown,
}

/// Declared roles that override type inference when a batch becomes a frame.
#[derive(Debug, Clone, Default)]
pub struct ColumnKinds {
    timestamps: HashSet<String>,
    categorical: HashSet<String>,
}

impl ColumnKinds {
    pub fn new<I, J, S, T>(timestamps: I, categorical: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            timestamps: timestamps.into_iter().map(Into::into).collect(),
            categorical: categorical.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_timestamp(&self, name: &str) -> bool {
        self.timestamps.contains(name)
    }

    pub fn is_categorical(&self, name: &str) -> bool {
        self.categorical.contains(name)
    }
}

/// Infer column type from a sample of values.
pub fn infer_column_type(values: &[serde_json::Value]) -> ColumnType {
    let non_null: Vec<_> = values.iter().filter(|v| !v.is_null()).collect();
    if non_null.is_empty() {
        return ColumnType::Null;
    }

    let mut has_int = false;
    let mut has_float = false;
    let mut has_bool = false;
    let mut has_string = false;

    for v in &non_null {
        match v {
            serde_json::Value::Number(n) => {
                if n.is_f64() {
                    has_float = true;
                } else {
                    has_int = true;
                }
            }
            serde_json::Value::Bool(_) => has_bool = true,
            serde_json::Value::String(_) => has_string = true,
            _ => {}
        }
    }

    if has_string {
        return ColumnType::String;
    }
    if has_float {
        return ColumnType::Float;
    }
    if has_int {
        return ColumnType::Integer;
    }
    if has_bool {
        return ColumnType::Boolean;
    }
    ColumnType::Unknown
}

/// Fail with a schema error naming the first required column the frame lacks.
pub fn require_columns<'a>(
    frame: &Frame,
    required: impl IntoIterator<Item = &'a str>,
    dataset: &str,
) -> Result<(), MonitorError> {
    let missing: Vec<&str> = required
        .into_iter()
        .filter(|name| !frame.has_column(name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(MonitorError::schema(format!(
            "{dataset} dataset is missing column(s): {}",
            missing.join(", ")
        )))
    }
}

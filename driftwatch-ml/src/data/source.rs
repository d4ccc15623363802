//! Data source abstraction for loading trip datasets from various formats.

use crate::error::MonitorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The type of data source to load from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataSourceType {
    Csv {
        path: PathBuf,
        #[serde(default = "default_delimiter")]
        delimiter: char,
    },
    Json {
        path: PathBuf,
    },
    Jsonl {
        path: PathBuf,
    },
    Sqlite {
        db_path: PathBuf,
        query: String,
    },
    /// Columnar format via Apache Parquet (requires `columnar` feature).
    Parquet {
        path: PathBuf,
    },
}

fn default_delimiter() -> char {
    ','
}

impl DataSourceType {
    /// Pick a source type from the file extension.
    ///
    /// SQLite files need a query; `sqlite_query` supplies it.
    pub fn from_path(path: &Path, sqlite_query: Option<&str>) -> Result<Self, MonitorError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let path = path.to_path_buf();
        match ext.as_str() {
            "csv" => Ok(Self::Csv {
                path,
                delimiter: default_delimiter(),
            }),
            "json" => Ok(Self::Json { path }),
            "jsonl" | "ndjson" => Ok(Self::Jsonl { path }),
            "parquet" | "pq" => Ok(Self::Parquet { path }),
            "db" | "sqlite" | "sqlite3" => match sqlite_query {
                Some(query) => Ok(Self::Sqlite {
                    db_path: path,
                    query: query.to_string(),
                }),
                None => Err(MonitorError::config(format!(
                    "{} is a SQLite database but data.sqlite_query is not set",
                    path.display()
                ))),
            },
            other => Err(MonitorError::dataset(format!(
                "unsupported dataset extension '{other}' for {}",
                path.display()
            ))),
        }
    }

    /// Instantiate the loader for this source.
    pub fn into_source(self) -> Box<dyn DataSource> {
        match self {
            Self::Csv { path, delimiter } => Box::new(CsvSource { path, delimiter }),
            Self::Json { path } => Box::new(JsonSource { path }),
            Self::Jsonl { path } => Box::new(JsonlSource { path }),
            Self::Sqlite { db_path, query } => Box::new(SqliteSource { db_path, query }),
            Self::Parquet { path } => Box::new(ParquetSource { path }),
        }
    }
}

/// A batch of data rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub total_rows: usize,
}

impl DataBatch {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            total_rows: 0,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Build a batch from JSON objects; columns follow the first object's keys.
    fn from_objects(items: Vec<serde_json::Value>) -> Self {
        let columns: Vec<String> = match items.first() {
            Some(serde_json::Value::Object(map)) => map.keys().cloned().collect(),
            Some(_) => vec!["value".to_string()],
            None => return Self::empty(),
        };

        let rows: Vec<Vec<serde_json::Value>> = items
            .iter()
            .map(|item| {
                columns
                    .iter()
                    .map(|col| item.get(col).cloned().unwrap_or(serde_json::Value::Null))
                    .collect()
            })
            .collect();

        let total_rows = rows.len();
        Self {
            columns,
            rows,
            total_rows,
        }
    }
}

/// Trait for loading data from a source.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Load data from this source, optionally limiting the number of rows.
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MonitorError>;
}

// ---------------------------------------------------------------------------
// CsvSource
// ---------------------------------------------------------------------------

/// CSV file data source. The first line is the header; empty cells are missing.
pub struct CsvSource {
    pub path: PathBuf,
    pub delimiter: char,
}

impl CsvSource {
    fn parse(&self, content: &str, limit: Option<usize>) -> Result<DataBatch, MonitorError> {
        let mut lines = content.lines();
        let columns: Vec<String> = split_csv_line(
            lines
                .next()
                .ok_or_else(|| MonitorError::dataset(format!("empty CSV file {}", self.path.display())))?,
            self.delimiter,
        );

        let mut rows = Vec::new();
        for (lineno, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(max) = limit {
                if rows.len() >= max {
                    break;
                }
            }
            let cells = split_csv_line(line, self.delimiter);
            if cells.len() != columns.len() {
                return Err(MonitorError::dataset(format!(
                    "{}:{}: expected {} fields, found {}",
                    self.path.display(),
                    lineno + 2,
                    columns.len(),
                    cells.len()
                )));
            }
            rows.push(cells.iter().map(|c| csv_value(c)).collect());
        }

        let total_rows = rows.len();
        Ok(DataBatch {
            columns,
            rows,
            total_rows,
        })
    }
}

#[async_trait]
impl DataSource for CsvSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MonitorError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MonitorError::dataset(format!("failed to read {}: {e}", self.path.display()))
        })?;
        self.parse(&content, limit)
    }

}

/// Split one CSV record, honouring double-quoted fields.
fn split_csv_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

fn csv_value(cell: &str) -> serde_json::Value {
    if cell.is_empty() {
        serde_json::Value::Null
    } else if let Ok(i) = cell.parse::<i64>() {
        serde_json::Value::Number(i.into())
    } else if let Ok(f) = cell.parse::<f64>() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else {
        serde_json::Value::String(cell.to_string())
    }
}

// ---------------------------------------------------------------------------
// JsonSource
// ---------------------------------------------------------------------------

/// JSON file data source: an array of row objects.
pub struct JsonSource {
    pub path: PathBuf,
}

#[async_trait]
impl DataSource for JsonSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MonitorError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MonitorError::dataset(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let value: serde_json::Value = serde_json::from_str(&content)?;

        let items = match value {
            serde_json::Value::Array(arr) => arr,
            obj @ serde_json::Value::Object(_) => vec![obj],
            _ => return Err(MonitorError::dataset("JSON must be an array or object")),
        };
        let limited = match limit {
            Some(max) => items.into_iter().take(max).collect(),
            None => items,
        };
        Ok(DataBatch::from_objects(limited))
    }

}

// ---------------------------------------------------------------------------
// JsonlSource
// ---------------------------------------------------------------------------

/// JSON Lines (JSONL) file data source: one JSON object per line.
pub struct JsonlSource {
    pub path: PathBuf,
}

impl JsonlSource {
    fn parse(content: &str, limit: Option<usize>) -> Result<Vec<serde_json::Value>, MonitorError> {
        let mut items = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(max) = limit {
                if items.len() >= max {
                    break;
                }
            }
            items.push(serde_json::from_str(line)?);
        }
        Ok(items)
    }
}

#[async_trait]
impl DataSource for JsonlSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MonitorError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MonitorError::dataset(format!("failed to read {}: {e}", self.path.display()))
        })?;
        Ok(DataBatch::from_objects(Self::parse(&content, limit)?))
    }

}

// ---------------------------------------------------------------------------
// SqliteSource
// ---------------------------------------------------------------------------

/// SQLite database data source. Loads data via a SQL query.
pub struct SqliteSource {
    pub db_path: PathBuf,
    pub query: String,
}

fn sqlite_value(value: rusqlite::types::ValueRef<'_>) -> serde_json::Value {
    match value {
        rusqlite::types::ValueRef::Null => serde_json::Value::Null,
        rusqlite::types::ValueRef::Integer(n) => serde_json::json!(n),
        rusqlite::types::ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        rusqlite::types::ValueRef::Text(t) => {
            serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
        }
        rusqlite::types::ValueRef::Blob(_) => serde_json::Value::Null,
    }
}

#[async_trait]
impl DataSource for SqliteSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MonitorError> {
        let db_path = self.db_path.clone();
        let query = match limit {
            Some(max) => format!("{} LIMIT {max}", self.query.trim_end_matches(';')),
            None => self.query.clone(),
        };

        // Run blocking SQLite operations on a blocking thread
        tokio::task::spawn_blocking(move || {
            let conn = rusqlite::Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            let mut stmt = conn.prepare(&query)?;
            let column_count = stmt.column_count();
            let columns: Vec<String> = (0..column_count)
                .map(|i| stmt.column_name(i).unwrap_or("?").to_string())
                .collect();

            let mut rows = Vec::new();
            let mut result_rows = stmt.query([])?;
            while let Some(row) = result_rows.next()? {
                let mut values = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    values.push(row.get_ref(i).map(sqlite_value)?);
                }
                rows.push(values);
            }

            let total_rows = rows.len();
            Ok(DataBatch {
                columns,
                rows,
                total_rows,
            })
        })
        .await
        .map_err(|e| MonitorError::dataset(format!("SQLite task join error: {e}")))?
    }

}

// ---------------------------------------------------------------------------
// ParquetSource
// ---------------------------------------------------------------------------

/// Apache Parquet data source.
///
/// Reading requires the `columnar` feature; without it `load` returns an
/// informative error so the setup phase fails cleanly.
pub struct ParquetSource {
    pub path: PathBuf,
}

#[cfg(feature = "columnar")]
fn parquet_value(field: &parquet::record::Field) -> serde_json::Value {
    use parquet::record::Field;

    fn micros_to_string(micros: i64) -> serde_json::Value {
        chrono::DateTime::from_timestamp_micros(micros)
            .map(|dt| serde_json::Value::String(dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            .unwrap_or(serde_json::Value::Null)
    }

    match field {
        Field::Null => serde_json::Value::Null,
        Field::Bool(b) => serde_json::json!(b),
        Field::Byte(n) => serde_json::json!(n),
        Field::Short(n) => serde_json::json!(n),
        Field::Int(n) => serde_json::json!(n),
        Field::Long(n) => serde_json::json!(n),
        Field::UByte(n) => serde_json::json!(n),
        Field::UShort(n) => serde_json::json!(n),
        Field::UInt(n) => serde_json::json!(n),
        Field::ULong(n) => serde_json::json!(n),
        Field::Float(f) => serde_json::Number::from_f64(f64::from(*f))
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Field::Double(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Field::Str(s) => serde_json::Value::String(s.clone()),
        Field::TimestampMillis(ms) => micros_to_string(ms.saturating_mul(1000)),
        Field::TimestampMicros(us) => micros_to_string(*us),
        _ => serde_json::Value::Null,
    }
}

#[cfg(feature = "columnar")]
fn read_parquet(path: &Path, limit: Option<usize>) -> Result<DataBatch, MonitorError> {
    use parquet::file::reader::{FileReader, SerializedFileReader};

    let file = std::fs::File::open(path)
        .map_err(|e| MonitorError::dataset(format!("failed to open {}: {e}", path.display())))?;
    let reader = SerializedFileReader::new(file)
        .map_err(|e| MonitorError::dataset(format!("{}: {e}", path.display())))?;
    let iter = reader
        .get_row_iter(None)
        .map_err(|e| MonitorError::dataset(format!("{}: {e}", path.display())))?;

    let mut columns: Vec<String> = Vec::new();
    let mut rows: Vec<Vec<serde_json::Value>> = Vec::new();
    for row in iter {
        if limit.is_some_and(|max| rows.len() >= max) {
            break;
        }
        let row = row.map_err(|e| MonitorError::dataset(format!("{}: {e}", path.display())))?;
        if columns.is_empty() {
            columns = row.get_column_iter().map(|(name, _)| name.clone()).collect();
        }
        rows.push(row.get_column_iter().map(|(_, field)| parquet_value(field)).collect());
    }

    let total_rows = rows.len();
    Ok(DataBatch {
        columns,
        rows,
        total_rows,
    })
}

#[cfg(not(feature = "columnar"))]
fn read_parquet(path: &Path, _limit: Option<usize>) -> Result<DataBatch, MonitorError> {
    Err(MonitorError::dataset(format!(
        "{}: Parquet support requires the `columnar` feature flag",
        path.display()
    )))
}

#[async_trait]
impl DataSource for ParquetSource {
    async fn load(&self, limit: Option<usize>) -> Result<DataBatch, MonitorError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_parquet(&path, limit))
            .await
            .map_err(|e| MonitorError::dataset(format!("Parquet task join error: {e}")))?
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_data_batch_empty() {
        let batch = DataBatch::empty();
        assert_eq!(batch.row_count(), 0);
        assert_eq!(batch.column_count(), 0);
    }

    #[test]
    fn test_from_path_by_extension() {
        assert!(matches!(
            DataSourceType::from_path(Path::new("ref.CSV"), None).unwrap(),
            DataSourceType::Csv { .. }
        ));
        assert!(matches!(
            DataSourceType::from_path(Path::new("raw.ndjson"), None).unwrap(),
            DataSourceType::Jsonl { .. }
        ));
        assert!(matches!(
            DataSourceType::from_path(Path::new("raw.parquet"), None).unwrap(),
            DataSourceType::Parquet { .. }
        ));
        assert!(DataSourceType::from_path(Path::new("trips.db"), None).is_err());
        assert!(DataSourceType::from_path(Path::new("trips.xlsx"), None).is_err());
    }

    #[test]
    fn test_split_csv_line_quotes() {
        assert_eq!(
            split_csv_line(r#"1,"Queens, NY","say ""hi""",,"#, ','),
            vec!["1", "Queens, NY", r#"say "hi""#, "", ""]
        );
    }

    #[tokio::test]
    async fn test_csv_source_types_cells() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "pickup,PULocationID,fare_amount").unwrap();
        writeln!(file, "2024-03-01 08:00:00,138,12.5").unwrap();
        writeln!(file, "2024-03-01 09:00:00,,").unwrap();
        let src = CsvSource {
            path: file.path().to_path_buf(),
            delimiter: ',',
        };
        let batch = src.load(None).await.unwrap();
        assert_eq!(batch.columns, vec!["pickup", "PULocationID", "fare_amount"]);
        assert_eq!(batch.rows[0][1], serde_json::json!(138));
        assert_eq!(batch.rows[0][2], serde_json::json!(12.5));
        assert!(batch.rows[1][1].is_null());
    }

    #[tokio::test]
    async fn test_csv_source_rejects_ragged_row() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1,2,3").unwrap();
        let src = CsvSource {
            path: file.path().to_path_buf(),
            delimiter: ',',
        };
        assert!(src.load(None).await.is_err());
    }

    #[tokio::test]
    async fn test_jsonl_source_load() {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile().unwrap();
        writeln!(file, r#"{{"fare_amount": 3.5, "zone": "A"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"fare_amount": null, "zone": "B"}}"#).unwrap();
        let src = JsonlSource {
            path: file.path().to_path_buf(),
        };
        let batch = src.load(Some(10)).await.unwrap();
        assert_eq!(batch.row_count(), 2);
        assert!(batch.rows[1][0].is_null());
    }

    #[tokio::test]
    async fn test_sqlite_source_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let db_path = dir.path().join("trips.db");
        {
            let conn = rusqlite::Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE trips (zone TEXT, fare REAL);
                 INSERT INTO trips VALUES ('A', 1.5), ('B', NULL);",
            )
            .unwrap();
        }
        let src = SqliteSource {
            db_path,
            query: "SELECT zone, fare FROM trips;".into(),
        };
        let batch = src.load(None).await.unwrap();
        assert_eq!(batch.columns, vec!["zone", "fare"]);
        assert_eq!(batch.row_count(), 2);
        assert!(batch.rows[1][1].is_null());
        assert_eq!(batch.rows[0][1], serde_json::json!(1.5));
    }

    #[cfg(not(feature = "columnar"))]
    #[tokio::test]
    async fn test_parquet_requires_feature() {
        let src = ParquetSource {
            path: PathBuf::from("trips.parquet"),
        };
        let err = src.load(None).await.unwrap_err();
        assert!(err.to_string().contains("columnar"));
    }
}

//! Metrics records and the stores that persist them.

use crate::config::is_sql_identifier;
use crate::drift::report::DriftReport;
use crate::error::MonitorError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Storage format of the `timestamp` key. Lexical order is chronological and
/// fractional seconds are kept, so a stored key equals its window start.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One persisted row, keyed by the window start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub timestamp: NaiveDateTime,
    pub prediction_drift: Option<f64>,
    pub num_drifted_columns: u32,
    pub share_missing_values: Option<f64>,
    pub target_quantile_50: Option<f64>,
    pub regression_mae: Option<f64>,
}

impl MetricsRecord {
    pub fn from_report(timestamp: NaiveDateTime, report: &DriftReport) -> Self {
        Self {
            timestamp,
            prediction_drift: report.prediction_drift,
            num_drifted_columns: u32::try_from(report.num_drifted_columns).unwrap_or(u32::MAX),
            share_missing_values: report.share_missing_values,
            target_quantile_50: report.target_quantile,
            regression_mae: report.regression_mae,
        }
    }
}

/// Destination of metrics records.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Set up the destination. `replace` drops existing records.
    async fn prepare(&self, replace: bool) -> Result<(), MonitorError>;

    /// Insert `record`, replacing any record with the same timestamp.
    async fn upsert(&self, record: &MetricsRecord) -> Result<(), MonitorError>;

    async fn latest_timestamp(&self) -> Result<Option<NaiveDateTime>, MonitorError>;

    /// All records in timestamp order.
    async fn records(&self) -> Result<Vec<MetricsRecord>, MonitorError>;

    fn describe(&self) -> String;
}

/// SQLite-backed store. Every operation opens its own connection on the
/// blocking pool; it is closed when the operation returns.
#[derive(Debug, Clone)]
pub struct SqliteMetricsStore {
    path: PathBuf,
    table: String,
}

impl SqliteMetricsStore {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Result<Self, MonitorError> {
        let table = table.into();
        if !is_sql_identifier(&table) {
            return Err(MonitorError::store(format!(
                "invalid table name '{table}'"
            )));
        }
        Ok(Self {
            path: path.into(),
            table,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_connection<T, F>(&self, f: F) -> Result<T, MonitorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection, &str) -> Result<T, MonitorError> + Send + 'static,
    {
        let path = self.path.clone();
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = Connection::open(&path).map_err(|e| {
                MonitorError::store(format!("cannot open {}: {e}", path.display()))
            })?;
            f(&mut conn, &table)
        })
        .await
        .map_err(|e| MonitorError::store(format!("store task failed: {e}")))?
    }
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, MonitorError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| MonitorError::store(format!("bad stored timestamp '{raw}': {e}")))
}

#[async_trait]
impl MetricsStore for SqliteMetricsStore {
    async fn prepare(&self, replace: bool) -> Result<(), MonitorError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.with_connection(move |conn, table| {
            let create = format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    timestamp TEXT PRIMARY KEY,
                    prediction_drift REAL,
                    num_drifted_columns INTEGER NOT NULL,
                    share_missing_values REAL,
                    target_quantile_50 REAL,
                    regression_mae REAL
                )"
            );
            let tx = conn.transaction()?;
            if replace {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
            }
            tx.execute_batch(&create)?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        tracing::info!(path = %self.path.display(), table = %self.table, replace, "Metrics store ready");
        Ok(())
    }

    async fn upsert(&self, record: &MetricsRecord) -> Result<(), MonitorError> {
        let record = record.clone();
        self.with_connection(move |conn, table| {
            conn.execute(
                &format!(
                    "INSERT INTO {table} (
                        timestamp, prediction_drift, num_drifted_columns,
                        share_missing_values, target_quantile_50, regression_mae
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    ON CONFLICT(timestamp) DO UPDATE SET
                        prediction_drift = excluded.prediction_drift,
                        num_drifted_columns = excluded.num_drifted_columns,
                        share_missing_values = excluded.share_missing_values,
                        target_quantile_50 = excluded.target_quantile_50,
                        regression_mae = excluded.regression_mae"
                ),
                params![
                    record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    record.prediction_drift,
                    record.num_drifted_columns,
                    record.share_missing_values,
                    record.target_quantile_50,
                    record.regression_mae,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn latest_timestamp(&self) -> Result<Option<NaiveDateTime>, MonitorError> {
        let raw: Option<String> = self
            .with_connection(|conn, table| {
                Ok(conn
                    .query_row(&format!("SELECT MAX(timestamp) FROM {table}"), [], |row| {
                        row.get::<_, Option<String>>(0)
                    })
                    .optional()?
                    .flatten())
            })
            .await?;
        raw.as_deref().map(parse_timestamp).transpose()
    }

    async fn records(&self) -> Result<Vec<MetricsRecord>, MonitorError> {
        type Row = (String, Option<f64>, u32, Option<f64>, Option<f64>, Option<f64>);
        let rows: Vec<Row> = self
            .with_connection(|conn, table| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT timestamp, prediction_drift, num_drifted_columns,
                            share_missing_values, target_quantile_50, regression_mae
                     FROM {table} ORDER BY timestamp"
                ))?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<Row>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(ts, drift, drifted, missing, quantile, mae)| {
                Ok(MetricsRecord {
                    timestamp: parse_timestamp(&ts)?,
                    prediction_drift: drift,
                    num_drifted_columns: drifted,
                    share_missing_values: missing,
                    target_quantile_50: quantile,
                    regression_mae: mae,
                })
            })
            .collect()
    }

    fn describe(&self) -> String {
        format!("sqlite://{}#{}", self.path.display(), self.table)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<NaiveDateTime, MetricsRecord>,
    writes: Vec<NaiveDateTime>,
    fail_at: Option<NaiveDateTime>,
}

/// In-memory store with optional write failure injection.
#[derive(Debug, Default)]
pub struct MemoryMetricsStore {
    state: Mutex<MemoryState>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes of the record keyed `timestamp` fail until cleared.
    pub async fn fail_at(&self, timestamp: Option<NaiveDateTime>) {
        self.state.lock().await.fail_at = timestamp;
    }

    /// Timestamps of successful writes, in write order.
    pub async fn write_log(&self) -> Vec<NaiveDateTime> {
        self.state.lock().await.writes.clone()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn prepare(&self, replace: bool) -> Result<(), MonitorError> {
        if replace {
            let mut state = self.state.lock().await;
            state.rows.clear();
            state.writes.clear();
        }
        Ok(())
    }

    async fn upsert(&self, record: &MetricsRecord) -> Result<(), MonitorError> {
        let mut state = self.state.lock().await;
        if state.fail_at == Some(record.timestamp) {
            return Err(MonitorError::store(format!(
                "injected write failure at {}",
                record.timestamp
            )));
        }
        state.rows.insert(record.timestamp, record.clone());
        state.writes.push(record.timestamp);
        Ok(())
    }

    async fn latest_timestamp(&self) -> Result<Option<NaiveDateTime>, MonitorError> {
        Ok(self.state.lock().await.rows.keys().next_back().copied())
    }

    async fn records(&self) -> Result<Vec<MetricsRecord>, MonitorError> {
        Ok(self.state.lock().await.rows.values().cloned().collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use pretty_assertions::assert_eq;

    fn day(n: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::days(n)
    }

    fn record(n: i64, drift: Option<f64>) -> MetricsRecord {
        MetricsRecord {
            timestamp: day(n),
            prediction_drift: drift,
            num_drifted_columns: n as u32,
            share_missing_values: Some(0.1),
            target_quantile_50: None,
            regression_mae: Some(3.5),
        }
    }

    #[test]
    fn test_invalid_table_name() {
        assert!(SqliteMetricsStore::new("m.db", "metrics; DROP TABLE x").is_err());
    }

    #[tokio::test]
    async fn test_sqlite_creates_database_and_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.db");
        let store = SqliteMetricsStore::new(&path, "drift_metrics").unwrap();
        store.prepare(true).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.latest_timestamp().await.unwrap(), None);

        store.upsert(&record(1, Some(0.2))).await.unwrap();
        store.upsert(&record(0, None)).await.unwrap();
        store.upsert(&record(1, Some(0.9))).await.unwrap();

        let rows = store.records().await.unwrap();
        assert_eq!(rows, vec![record(0, None), record(1, Some(0.9))]);
        assert_eq!(store.latest_timestamp().await.unwrap(), Some(day(1)));
    }

    #[tokio::test]
    async fn test_sqlite_keeps_fractional_seconds() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMetricsStore::new(dir.path().join("m.db"), "drift_metrics").unwrap();
        store.prepare(true).await.unwrap();

        let start = day(0) + Duration::milliseconds(500);
        let mut first = record(0, Some(0.1));
        first.timestamp = start;
        let mut second = record(0, Some(0.2));
        second.timestamp = start + Duration::seconds(1);
        store.upsert(&first).await.unwrap();
        store.upsert(&second).await.unwrap();

        assert_eq!(store.latest_timestamp().await.unwrap(), Some(second.timestamp));
        assert_eq!(store.records().await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_sqlite_prepare_replace_vs_keep() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMetricsStore::new(dir.path().join("m.db"), "drift_metrics").unwrap();
        store.prepare(true).await.unwrap();
        store.upsert(&record(0, Some(0.5))).await.unwrap();

        store.prepare(false).await.unwrap();
        assert_eq!(store.records().await.unwrap().len(), 1);

        store.prepare(true).await.unwrap();
        assert!(store.records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_failure_injection() {
        let store = MemoryMetricsStore::new();
        store.fail_at(Some(day(1))).await;
        store.upsert(&record(0, None)).await.unwrap();
        assert!(store.upsert(&record(1, None)).await.is_err());
        store.fail_at(None).await;
        store.upsert(&record(1, None)).await.unwrap();
        store.upsert(&record(1, Some(1.0))).await.unwrap();

        assert_eq!(store.records().await.unwrap().len(), 2);
        assert_eq!(store.write_log().await, vec![day(0), day(1), day(1)]);
        assert_eq!(store.latest_timestamp().await.unwrap(), Some(day(1)));
    }
}

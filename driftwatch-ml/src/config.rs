//! Configuration for the drift monitor.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.
//! CLI flags are applied by the binary on top of the extracted struct. The
//! configuration is immutable once a [`crate::monitor::MonitorLoop`] has been built.

use crate::error::MonitorError;
use chrono::{NaiveDate, NaiveDateTime};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the working directory when no explicit path is given.
pub const DEFAULT_CONFIG_FILE: &str = "driftwatch.toml";

/// Environment variable prefix (`DRIFTWATCH_WINDOW__COUNT=7`, ...).
pub const ENV_PREFIX: &str = "DRIFTWATCH_";

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Window schedule.
    #[serde(default)]
    pub window: WindowConfig,
    /// Write pacing.
    #[serde(default)]
    pub throttle: ThrottleConfig,
    /// Reference and raw dataset locations.
    #[serde(default)]
    pub data: DataConfig,
    /// Column roles.
    #[serde(default)]
    pub columns: ColumnConfig,
    /// Drift report settings.
    #[serde(default)]
    pub report: ReportConfig,
    /// Model artifact location.
    #[serde(default)]
    pub model: ModelConfig,
    /// Metrics store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

/// Window schedule configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Start instant of window 0.
    #[serde(default = "default_begin")]
    pub begin: NaiveDateTime,
    /// Window length in seconds.
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Number of windows to process.
    #[serde(default = "default_window_count")]
    pub count: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            begin: default_begin(),
            period_secs: default_period_secs(),
            count: default_window_count(),
        }
    }
}

fn default_begin() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn default_period_secs() -> u64 {
    86_400
}

fn default_window_count() -> u32 {
    30
}

/// Inter-write pacing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Minimum time between two completed writes, in seconds.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

fn default_min_interval_secs() -> u64 {
    10
}

/// Dataset locations and the columns used to derive the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Reference (baseline) dataset.
    #[serde(default = "default_reference_path")]
    pub reference_path: PathBuf,
    /// Raw observations sliced into windows.
    #[serde(default = "default_raw_path")]
    pub raw_path: PathBuf,
    /// Pickup timestamp column; also the window bucketing key.
    #[serde(default = "default_pickup_column")]
    pub pickup_column: String,
    /// Dropoff timestamp column.
    #[serde(default = "default_dropoff_column")]
    pub dropoff_column: String,
    /// Name of the derived trip-duration target (minutes).
    #[serde(default = "default_target_column")]
    pub target_column: String,
    /// Optional inclusive `[min, max]` duration filter applied at load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_bounds: Option<[f64; 2]>,
    /// Query used when a dataset path points at a SQLite database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sqlite_query: Option<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            reference_path: default_reference_path(),
            raw_path: default_raw_path(),
            pickup_column: default_pickup_column(),
            dropoff_column: default_dropoff_column(),
            target_column: default_target_column(),
            duration_bounds: None,
            sqlite_query: None,
        }
    }
}

fn default_reference_path() -> PathBuf {
    PathBuf::from("data/reference.csv")
}

fn default_raw_path() -> PathBuf {
    PathBuf::from("data/green_tripdata_2024-03.csv")
}

fn default_pickup_column() -> String {
    "lpep_pickup_datetime".to_string()
}

fn default_dropoff_column() -> String {
    "lpep_dropoff_datetime".to_string()
}

fn default_target_column() -> String {
    "duration_min".to_string()
}

/// Column roles shared by the normalizer, the scorer and the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnConfig {
    #[serde(default = "default_numerical")]
    pub numerical: Vec<String>,
    #[serde(default = "default_categorical")]
    pub categorical: Vec<String>,
    /// Name of the appended prediction column.
    #[serde(default = "default_prediction")]
    pub prediction: String,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            numerical: default_numerical(),
            categorical: default_categorical(),
            prediction: default_prediction(),
        }
    }
}

fn default_numerical() -> Vec<String> {
    ["passenger_count", "trip_distance", "fare_amount", "total_amount"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_categorical() -> Vec<String> {
    ["PULocationID", "DOLocationID"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_prediction() -> String {
    "prediction".to_string()
}

/// Drift report settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Numerical column whose quantile is recorded per window.
    #[serde(default = "default_quantile_column")]
    pub quantile_column: String,
    /// Quantile level in `[0, 1]`.
    #[serde(default = "default_quantile")]
    pub quantile: f64,
    /// Overrides the per-test default threshold (0.05 p-value, 0.1 distance).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stattest_threshold: Option<f64>,
    /// Share of drifted features at which the dataset counts as drifted.
    #[serde(default = "default_drift_share")]
    pub drift_share: f64,
    /// Reference row count above which distance tests replace p-value tests.
    #[serde(default = "default_small_sample_cutoff")]
    pub small_sample_cutoff: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            quantile_column: default_quantile_column(),
            quantile: default_quantile(),
            stattest_threshold: None,
            drift_share: default_drift_share(),
            small_sample_cutoff: default_small_sample_cutoff(),
        }
    }
}

fn default_quantile_column() -> String {
    "fare_amount".to_string()
}

fn default_quantile() -> f64 {
    0.5
}

fn default_drift_share() -> f64 {
    0.5
}

fn default_small_sample_cutoff() -> usize {
    1000
}

/// Model artifact configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// JSON artifact holding the feature vocabulary and linear coefficients.
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            artifact_path: default_artifact_path(),
        }
    }
}

fn default_artifact_path() -> PathBuf {
    PathBuf::from("models/lin_reg.json")
}

/// Metrics store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file; created with its parent directories if absent.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Destination table.
    #[serde(default = "default_table")]
    pub table: String,
    /// Keep existing rows and continue after the latest stored window.
    #[serde(default)]
    pub resume: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            table: default_table(),
            resume: false,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("monitoring/metrics.db")
}

fn default_table() -> String {
    "drift_metrics".to_string()
}

impl MonitorConfig {
    /// Window length as a chrono duration.
    pub fn period(&self) -> Result<chrono::Duration, MonitorError> {
        i64::try_from(self.window.period_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                MonitorError::config(format!(
                    "window.period_secs {} is out of range",
                    self.window.period_secs
                ))
            })
    }

    /// Minimum inter-write interval.
    pub fn min_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.throttle.min_interval_secs)
    }

    /// Declared feature columns: numerical first, then categorical.
    pub fn feature_columns(&self) -> Vec<String> {
        self.columns
            .numerical
            .iter()
            .chain(self.columns.categorical.iter())
            .cloned()
            .collect()
    }

    /// Reject values the monitor cannot run with.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.window.period_secs == 0 {
            return Err(MonitorError::config("window.period_secs must be positive"));
        }
        self.period()?;
        if !(0.0..=1.0).contains(&self.report.quantile) {
            return Err(MonitorError::config(format!(
                "report.quantile must lie in [0, 1], got {}",
                self.report.quantile
            )));
        }
        if !(self.report.drift_share > 0.0 && self.report.drift_share <= 1.0) {
            return Err(MonitorError::config(format!(
                "report.drift_share must lie in (0, 1], got {}",
                self.report.drift_share
            )));
        }
        if let Some(threshold) = self.report.stattest_threshold {
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err(MonitorError::config(
                    "report.stattest_threshold must be a positive number",
                ));
            }
        }
        if self.columns.numerical.is_empty() && self.columns.categorical.is_empty() {
            return Err(MonitorError::config(
                "at least one numerical or categorical feature must be declared",
            ));
        }
        if self.columns.categorical.contains(&self.report.quantile_column) {
            return Err(MonitorError::config(format!(
                "report.quantile_column '{}' is declared categorical",
                self.report.quantile_column
            )));
        }
        if let Some([lo, hi]) = self.data.duration_bounds {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(MonitorError::config(format!(
                    "data.duration_bounds must be an ordered pair, got [{lo}, {hi}]"
                )));
            }
        }
        if !is_sql_identifier(&self.store.table) {
            return Err(MonitorError::config(format!(
                "store.table '{}' is not a plain SQL identifier",
                self.store.table
            )));
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub(crate) fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Load configuration with layered precedence (highest wins):
/// 1. Environment variables (prefixed with `DRIFTWATCH_`, `__` between sections)
/// 2. The explicit config file, or `driftwatch.toml` in the working directory
/// 3. Built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<MonitorConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(MonitorConfig::default()));

    match path {
        Some(explicit) => {
            if !explicit.exists() {
                return Err(Box::new(figment::Error::from(format!(
                    "config file {} does not exist",
                    explicit.display()
                ))));
            }
            figment = figment.merge(Toml::file(explicit));
        }
        None => {
            let local = Path::new(DEFAULT_CONFIG_FILE);
            if local.exists() {
                figment = figment.merge(Toml::file(local));
            }
        }
    }

    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_monitoring_setup() {
        let config = MonitorConfig::default();
        assert_eq!(config.window.count, 30);
        assert_eq!(config.window.period_secs, 86_400);
        assert_eq!(config.throttle.min_interval_secs, 10);
        assert_eq!(config.window.begin.to_string(), "2024-03-01 00:00:00");
        assert_eq!(config.report.quantile_column, "fare_amount");
        assert_eq!(config.feature_columns().len(), 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_period() {
        let mut config = MonitorConfig::default();
        config.window.period_secs = 0;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unrepresentable_period() {
        let mut config = MonitorConfig::default();
        config.window.period_secs = 10_000_000_000_000_000;
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
        assert!(config.period().is_err());

        config.window.period_secs = 3_600;
        assert_eq!(config.period().unwrap(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_validate_rejects_categorical_quantile_column() {
        let mut config = MonitorConfig::default();
        config.report.quantile_column = "PULocationID".into();
        assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_table_name() {
        let mut config = MonitorConfig::default();
        config.store.table = "metrics; DROP TABLE x".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_bounds() {
        let mut config = MonitorConfig::default();
        config.data.duration_bounds = Some([60.0, 1.0]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sql_identifier() {
        assert!(is_sql_identifier("drift_metrics"));
        assert!(is_sql_identifier("_m2"));
        assert!(!is_sql_identifier("2metrics"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("a-b"));
    }

    #[test]
    fn test_load_config_layers_file_and_env() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [window]
                begin = "2024-04-01T00:00:00"
                count = 7

                [store]
                table = "daily_metrics"
                "#,
            )?;
            jail.set_env("DRIFTWATCH_THROTTLE__MIN_INTERVAL_SECS", "2");

            let config = load_config(None).map_err(|e| e.to_string())?;
            assert_eq!(config.window.count, 7);
            assert_eq!(config.window.begin.to_string(), "2024-04-01 00:00:00");
            assert_eq!(config.window.period_secs, 86_400);
            assert_eq!(config.store.table, "daily_metrics");
            assert_eq!(config.throttle.min_interval_secs, 2);
            Ok(())
        });
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        figment::Jail::expect_with(|_jail| {
            let result = load_config(Some(Path::new("nope.toml")));
            assert!(result.is_err());
            Ok(())
        });
    }
}

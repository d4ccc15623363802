//! Statistics backend producing a name-keyed metric set.
//!
//! A backend answers one reference-vs-current comparison with a loosely
//! structured [`MetricSet`]. Typed access goes through
//! [`DriftReport::extract`](crate::drift::report::DriftReport::extract).

use crate::data::frame::{Frame, MissingValues};
use crate::drift::stattest::{self, ColumnDrift, ColumnValues, StatTestOptions};
use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric keys emitted by [`BuiltinBackend`].
pub mod names {
    pub const CURRENT_ROWS: &str = "current.number_of_rows";
    pub const PREDICTION_DRIFT_SCORE: &str = "prediction.drift_score";
    pub const PREDICTION_DRIFT_DETECTED: &str = "prediction.drift_detected";
    pub const PREDICTION_STATTEST: &str = "prediction.stattest";
    pub const DRIFTED_COLUMNS_COUNT: &str = "dataset.number_of_drifted_columns";
    pub const DRIFTED_COLUMNS_SHARE: &str = "dataset.share_of_drifted_columns";
    pub const DATASET_DRIFT: &str = "dataset.dataset_drift";
    pub const DRIFTED_COLUMNS: &str = "dataset.drifted_columns";
    pub const MISSING_SHARE: &str = "missing_values.share_of_missing_values";
    pub const TARGET_QUANTILE: &str = "quantile.value";
    pub const REGRESSION_MAE: &str = "regression.mean_abs_error";
}

/// One metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricValue {
    Float(f64),
    Count(usize),
    Flag(bool),
    Label(String),
    Columns(Vec<String>),
    /// Not computable for this comparison; carries the reason.
    Unavailable(String),
}

/// Metrics keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    values: BTreeMap<String, MetricValue>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: MetricValue) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<MetricValue> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// A normalised, scored frame plus its missingness before normalisation.
#[derive(Debug, Clone)]
pub struct ScoredFrame {
    pub frame: Frame,
    pub missing: MissingValues,
}

impl ScoredFrame {
    pub fn new(frame: Frame, missing: MissingValues) -> Self {
        Self { frame, missing }
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }
}

/// Column roles for a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub target: String,
    pub prediction: String,
    pub numerical: Vec<String>,
    pub categorical: Vec<String>,
}

impl ColumnMapping {
    pub fn features(&self) -> impl Iterator<Item = &str> {
        self.numerical
            .iter()
            .chain(self.categorical.iter())
            .map(String::as_str)
    }
}

/// Computes the metric set for one comparison.
pub trait DriftBackend: Send + Sync {
    fn name(&self) -> &str;

    fn run(
        &self,
        reference: &ScoredFrame,
        current: &ScoredFrame,
        mapping: &ColumnMapping,
    ) -> Result<MetricSet, MonitorError>;
}

/// Native statistics: per-column drift tests, missingness, a quantile and MAE.
#[derive(Debug, Clone)]
pub struct BuiltinBackend {
    pub stattest: StatTestOptions,
    /// Share of drifted features at which the dataset counts as drifted.
    pub drift_share: f64,
    pub quantile_column: String,
    pub quantile: f64,
}

impl Default for BuiltinBackend {
    fn default() -> Self {
        Self {
            stattest: StatTestOptions::default(),
            drift_share: 0.5,
            quantile_column: "fare_amount".to_string(),
            quantile: 0.5,
        }
    }
}

const EMPTY_WINDOW: &str = "current window has no rows";

impl BuiltinBackend {
    fn test_column(
        &self,
        reference: &Frame,
        current: &Frame,
        column: &str,
    ) -> Result<Option<ColumnDrift>, MonitorError> {
        let r = ColumnValues::from_frame(reference, column)?;
        let c = ColumnValues::from_frame(current, column)?;
        Ok(stattest::column_drift(column, &r, &c, &self.stattest))
    }

    fn prediction_metrics(
        &self,
        out: &mut MetricSet,
        reference: &Frame,
        current: &Frame,
        mapping: &ColumnMapping,
    ) -> Result<(), MonitorError> {
        let drift = if current.is_empty() {
            Err(EMPTY_WINDOW.to_string())
        } else {
            self.test_column(reference, current, &mapping.prediction)?
                .ok_or_else(|| format!("no predictions in '{}' to compare", mapping.prediction))
        };
        match drift {
            Ok(drift) => {
                out.insert(names::PREDICTION_DRIFT_SCORE, MetricValue::Float(drift.score));
                out.insert(names::PREDICTION_DRIFT_DETECTED, MetricValue::Flag(drift.drifted));
                out.insert(
                    names::PREDICTION_STATTEST,
                    MetricValue::Label(drift.test.name().to_string()),
                );
            }
            Err(reason) => {
                out.insert(names::PREDICTION_DRIFT_SCORE, MetricValue::Unavailable(reason.clone()));
                out.insert(names::PREDICTION_DRIFT_DETECTED, MetricValue::Unavailable(reason.clone()));
                out.insert(names::PREDICTION_STATTEST, MetricValue::Unavailable(reason));
            }
        }
        Ok(())
    }

    fn dataset_metrics(
        &self,
        out: &mut MetricSet,
        reference: &Frame,
        current: &Frame,
        mapping: &ColumnMapping,
    ) -> Result<(), MonitorError> {
        let mut drifted = Vec::new();
        let mut total = 0usize;
        for column in mapping.features() {
            total += 1;
            if let Some(result) = self.test_column(reference, current, column)? {
                tracing::trace!(
                    column,
                    test = result.test.name(),
                    score = result.score,
                    drifted = result.drifted,
                    "Column drift"
                );
                if result.drifted {
                    drifted.push(column.to_string());
                }
            }
        }
        let share = if total == 0 {
            0.0
        } else {
            drifted.len() as f64 / total as f64
        };
        out.insert(names::DRIFTED_COLUMNS_COUNT, MetricValue::Count(drifted.len()));
        out.insert(names::DRIFTED_COLUMNS_SHARE, MetricValue::Float(share));
        out.insert(
            names::DATASET_DRIFT,
            MetricValue::Flag(!drifted.is_empty() && share >= self.drift_share),
        );
        out.insert(names::DRIFTED_COLUMNS, MetricValue::Columns(drifted));
        Ok(())
    }

    fn quantile_metric(&self, current: &Frame) -> Result<MetricValue, MonitorError> {
        if current.is_empty() {
            return Ok(MetricValue::Unavailable(EMPTY_WINDOW.to_string()));
        }
        let values: Vec<f64> = current
            .floats(&self.quantile_column)?
            .iter()
            .flatten()
            .copied()
            .filter(|v| v.is_finite())
            .collect();
        Ok(match stattest::quantile(&values, self.quantile) {
            Some(v) => MetricValue::Float(v),
            None => MetricValue::Unavailable(format!(
                "no values in '{}'",
                self.quantile_column
            )),
        })
    }

    fn mae_metric(&self, current: &Frame, mapping: &ColumnMapping) -> Result<MetricValue, MonitorError> {
        if current.is_empty() {
            return Ok(MetricValue::Unavailable(EMPTY_WINDOW.to_string()));
        }
        let errors: Vec<f64> = current
            .floats(&mapping.target)?
            .iter()
            .zip(current.floats(&mapping.prediction)?)
            .filter_map(|(t, p)| match (t, p) {
                (Some(t), Some(p)) if t.is_finite() && p.is_finite() => Some((t - p).abs()),
                _ => None,
            })
            .collect();
        Ok(match stattest::mean(&errors) {
            Some(mae) => MetricValue::Float(mae),
            None => MetricValue::Unavailable(format!(
                "no rows with both '{}' and '{}'",
                mapping.target, mapping.prediction
            )),
        })
    }
}

impl DriftBackend for BuiltinBackend {
    fn name(&self) -> &str {
        "builtin"
    }

    fn run(
        &self,
        reference: &ScoredFrame,
        current: &ScoredFrame,
        mapping: &ColumnMapping,
    ) -> Result<MetricSet, MonitorError> {
        let mut out = MetricSet::new();
        out.insert(names::CURRENT_ROWS, MetricValue::Count(current.height()));

        self.prediction_metrics(&mut out, &reference.frame, &current.frame, mapping)?;
        self.dataset_metrics(&mut out, &reference.frame, &current.frame, mapping)?;

        out.insert(
            names::MISSING_SHARE,
            match current.missing.share() {
                Some(share) => MetricValue::Float(share),
                None => MetricValue::Unavailable(EMPTY_WINDOW.to_string()),
            },
        );
        out.insert(names::TARGET_QUANTILE, self.quantile_metric(&current.frame)?);
        out.insert(names::REGRESSION_MAE, self.mae_metric(&current.frame, mapping)?);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::Column;

    fn mapping() -> ColumnMapping {
        ColumnMapping {
            target: "duration_min".into(),
            prediction: "prediction".into(),
            numerical: vec!["fare_amount".into()],
            categorical: vec!["PULocationID".into()],
        }
    }

    fn scored(fares: Vec<f64>, zones: Vec<&str>, targets: Vec<Option<f64>>) -> ScoredFrame {
        let predictions: Vec<Option<f64>> = fares.iter().map(|f| Some(f / 2.0)).collect();
        let frame = Frame::from_columns(vec![
            Column::float("fare_amount", fares.into_iter().map(Some).collect()),
            Column::text("PULocationID", zones.into_iter().map(|z| Some(z.into())).collect()),
            Column::float("duration_min", targets),
            Column::float("prediction", predictions),
        ])
        .unwrap();
        let missing = frame.missing_values();
        ScoredFrame::new(frame, missing)
    }

    fn reference() -> ScoredFrame {
        let fares: Vec<f64> = (0..60).map(|i| 5.0 + i as f64).collect();
        let zones: Vec<&str> = (0..60).map(|i| ["7", "138", "75"][i % 3]).collect();
        let targets = fares.iter().map(|f| Some(f / 2.0)).collect();
        scored(fares, zones, targets)
    }

    #[test]
    fn test_identical_windows_do_not_drift() {
        let backend = BuiltinBackend::default();
        let metrics = backend.run(&reference(), &reference(), &mapping()).unwrap();

        assert_eq!(metrics.get(names::CURRENT_ROWS), Some(&MetricValue::Count(60)));
        assert_eq!(metrics.get(names::DRIFTED_COLUMNS_COUNT), Some(&MetricValue::Count(0)));
        assert_eq!(metrics.get(names::DATASET_DRIFT), Some(&MetricValue::Flag(false)));
        assert_eq!(metrics.get(names::PREDICTION_DRIFT_SCORE), Some(&MetricValue::Float(1.0)));
        assert_eq!(
            metrics.get(names::PREDICTION_STATTEST),
            Some(&MetricValue::Label("ks".into()))
        );
        assert_eq!(metrics.get(names::MISSING_SHARE), Some(&MetricValue::Float(0.0)));
        assert_eq!(metrics.get(names::REGRESSION_MAE), Some(&MetricValue::Float(0.0)));
        assert_eq!(metrics.get(names::TARGET_QUANTILE), Some(&MetricValue::Float(34.5)));
    }

    #[test]
    fn test_shifted_window_drifts() {
        let fares: Vec<f64> = (0..60).map(|i| 500.0 + i as f64).collect();
        let zones = vec!["265"; 60];
        let current = scored(fares, zones, vec![None; 60]);
        let metrics = BuiltinBackend::default()
            .run(&reference(), &current, &mapping())
            .unwrap();

        assert_eq!(metrics.get(names::DRIFTED_COLUMNS_COUNT), Some(&MetricValue::Count(2)));
        assert_eq!(metrics.get(names::DATASET_DRIFT), Some(&MetricValue::Flag(true)));
        assert_eq!(
            metrics.get(names::DRIFTED_COLUMNS),
            Some(&MetricValue::Columns(vec!["fare_amount".into(), "PULocationID".into()]))
        );
        assert_eq!(metrics.get(names::PREDICTION_DRIFT_DETECTED), Some(&MetricValue::Flag(true)));
        assert!(matches!(
            metrics.get(names::REGRESSION_MAE),
            Some(MetricValue::Unavailable(_))
        ));
    }

    #[test]
    fn test_empty_window_is_degenerate() {
        let current = scored(vec![], vec![], vec![]);
        let metrics = BuiltinBackend::default()
            .run(&reference(), &current, &mapping())
            .unwrap();

        assert_eq!(metrics.get(names::DRIFTED_COLUMNS_COUNT), Some(&MetricValue::Count(0)));
        for name in [
            names::PREDICTION_DRIFT_SCORE,
            names::MISSING_SHARE,
            names::TARGET_QUANTILE,
            names::REGRESSION_MAE,
        ] {
            assert_eq!(
                metrics.get(name),
                Some(&MetricValue::Unavailable(EMPTY_WINDOW.to_string())),
                "{name}"
            );
        }
    }

    #[test]
    fn test_metric_value_serde_shape() {
        let json = serde_json::to_value(MetricValue::Count(3)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "count", "value": 3}));
    }
}

//! Typed drift report and the engine that produces it.

use crate::drift::metrics::{ColumnMapping, DriftBackend, MetricSet, MetricValue, ScoredFrame, names};
use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A metric the backend could not compute, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnavailableMetric {
    pub metric: String,
    pub reason: String,
}

/// Result of one reference-vs-current comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub current_rows: usize,
    pub prediction_drift: Option<f64>,
    pub prediction_drift_detected: bool,
    pub prediction_stattest: Option<String>,
    pub num_drifted_columns: usize,
    pub share_drifted_columns: f64,
    pub dataset_drift: bool,
    pub drifted_columns: Vec<String>,
    pub share_missing_values: Option<f64>,
    pub target_quantile: Option<f64>,
    pub regression_mae: Option<f64>,
    pub unavailable: Vec<UnavailableMetric>,
}

/// Looks metrics up by name, recording which ones were unavailable.
struct Extractor<'a> {
    metrics: &'a MetricSet,
    unavailable: Vec<UnavailableMetric>,
}

impl<'a> Extractor<'a> {
    fn lookup(&mut self, name: &str) -> Result<Option<&'a MetricValue>, MonitorError> {
        match self.metrics.get(name) {
            None => Err(MonitorError::MissingMetric(name.to_string())),
            Some(MetricValue::Unavailable(reason)) => {
                self.unavailable.push(UnavailableMetric {
                    metric: name.to_string(),
                    reason: reason.clone(),
                });
                Ok(None)
            }
            Some(value) => Ok(Some(value)),
        }
    }

    fn float(&mut self, name: &str) -> Result<Option<f64>, MonitorError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(MetricValue::Float(v)) => Ok(Some(*v)),
            Some(MetricValue::Count(n)) => Ok(Some(*n as f64)),
            Some(other) => Err(type_mismatch(name, "float", other)),
        }
    }

    fn count(&mut self, name: &str) -> Result<Option<usize>, MonitorError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(MetricValue::Count(n)) => Ok(Some(*n)),
            Some(other) => Err(type_mismatch(name, "count", other)),
        }
    }

    fn flag(&mut self, name: &str) -> Result<Option<bool>, MonitorError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(MetricValue::Flag(b)) => Ok(Some(*b)),
            Some(other) => Err(type_mismatch(name, "flag", other)),
        }
    }

    fn label(&mut self, name: &str) -> Result<Option<String>, MonitorError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(MetricValue::Label(s)) => Ok(Some(s.clone())),
            Some(other) => Err(type_mismatch(name, "label", other)),
        }
    }

    fn columns(&mut self, name: &str) -> Result<Option<Vec<String>>, MonitorError> {
        match self.lookup(name)? {
            None => Ok(None),
            Some(MetricValue::Columns(c)) => Ok(Some(c.clone())),
            Some(other) => Err(type_mismatch(name, "columns", other)),
        }
    }
}

fn type_mismatch(name: &str, expected: &str, found: &MetricValue) -> MonitorError {
    MonitorError::report(format!("metric '{name}' is not a {expected}: {found:?}"))
}

impl DriftReport {
    /// Build the typed report from a backend's metric set.
    ///
    /// Every expected metric is looked up once by name. An absent metric is an
    /// error; an unavailable one becomes `None` and is listed in
    /// [`DriftReport::unavailable`].
    pub fn extract(metrics: &MetricSet) -> Result<Self, MonitorError> {
        let mut x = Extractor {
            metrics,
            unavailable: Vec::new(),
        };
        let current_rows = x.count(names::CURRENT_ROWS)?.unwrap_or(0);
        let prediction_drift = x.float(names::PREDICTION_DRIFT_SCORE)?;
        let prediction_drift_detected = x.flag(names::PREDICTION_DRIFT_DETECTED)?.unwrap_or(false);
        let prediction_stattest = x.label(names::PREDICTION_STATTEST)?;
        let num_drifted_columns = x.count(names::DRIFTED_COLUMNS_COUNT)?.unwrap_or(0);
        let share_drifted_columns = x.float(names::DRIFTED_COLUMNS_SHARE)?.unwrap_or(0.0);
        let dataset_drift = x.flag(names::DATASET_DRIFT)?.unwrap_or(false);
        let drifted_columns = x.columns(names::DRIFTED_COLUMNS)?.unwrap_or_default();
        let share_missing_values = x.float(names::MISSING_SHARE)?;
        let target_quantile = x.float(names::TARGET_QUANTILE)?;
        let regression_mae = x.float(names::REGRESSION_MAE)?;

        Ok(Self {
            current_rows,
            prediction_drift,
            prediction_drift_detected,
            prediction_stattest,
            num_drifted_columns,
            share_drifted_columns,
            dataset_drift,
            drifted_columns,
            share_missing_values,
            target_quantile,
            regression_mae,
            unavailable: x.unavailable,
        })
    }

    /// Whether `metric` was unavailable for this comparison.
    pub fn is_unavailable(&self, metric: &str) -> bool {
        self.unavailable.iter().any(|u| u.metric == metric)
    }
}

/// Runs a backend over scored frames and extracts a [`DriftReport`].
#[derive(Clone)]
pub struct DriftReportEngine {
    backend: Arc<dyn DriftBackend>,
    mapping: ColumnMapping,
}

impl DriftReportEngine {
    pub fn new(backend: Arc<dyn DriftBackend>, mapping: ColumnMapping) -> Self {
        Self { backend, mapping }
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    /// Compare `current` against `reference`.
    ///
    /// An empty current window produces a degenerate report, not an error.
    pub fn compute(
        &self,
        reference: &ScoredFrame,
        current: &ScoredFrame,
    ) -> Result<DriftReport, MonitorError> {
        let metrics = self.backend.run(reference, current, &self.mapping)?;
        tracing::trace!(backend = self.backend.name(), metrics = metrics.len(), "Backend finished");
        DriftReport::extract(&metrics)
    }
}

impl std::fmt::Debug for DriftReportEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftReportEngine")
            .field("backend", &self.backend.name())
            .field("mapping", &self.mapping)
            .finish()
    }
}

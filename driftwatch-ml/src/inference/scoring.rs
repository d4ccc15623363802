//! Scoring adapter: feature transform + regressor behind one `score` call.

use crate::data::frame::{Column, Frame};
use crate::error::MonitorError;
use crate::inference::model::{FeatureTransform, LoadedModel, Regressor};
use std::sync::Arc;

/// Wraps an opaque model and its feature transform over declared feature columns.
#[derive(Clone)]
pub struct ScoringAdapter {
    transform: Arc<dyn FeatureTransform>,
    regressor: Arc<dyn Regressor>,
    feature_columns: Vec<String>,
}

impl ScoringAdapter {
    pub fn new(
        transform: Arc<dyn FeatureTransform>,
        regressor: Arc<dyn Regressor>,
        feature_columns: Vec<String>,
    ) -> Self {
        Self {
            transform,
            regressor,
            feature_columns,
        }
    }

    pub fn from_loaded(model: LoadedModel, feature_columns: Vec<String>) -> Self {
        Self::new(
            Arc::new(model.transform),
            Arc::new(model.regressor),
            feature_columns,
        )
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    /// Predictions positionally aligned with `frame`'s rows.
    ///
    /// A zero-row frame yields an empty sequence.
    pub fn score(&self, frame: &Frame) -> Result<Vec<f64>, MonitorError> {
        if frame.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self.transform.transform(frame, &self.feature_columns)?;
        let predictions = self.regressor.predict(&rows)?;
        if predictions.len() != frame.height() {
            return Err(MonitorError::model(format!(
                "model returned {} predictions for {} rows",
                predictions.len(),
                frame.height()
            )));
        }
        Ok(predictions)
    }

    /// Score `frame` and append the predictions as column `prediction_column`.
    pub fn score_into(&self, frame: &mut Frame, prediction_column: &str) -> Result<(), MonitorError> {
        let predictions = self.score(frame)?;
        frame.set_column(Column::float(
            prediction_column,
            predictions.into_iter().map(Some).collect(),
        ))
    }
}

impl std::fmt::Debug for ScoringAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringAdapter")
            .field("feature_columns", &self.feature_columns)
            .field("n_features", &self.regressor.n_features())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::model::{DictVectorizer, LinearRegressor, SparseRow};

    fn adapter() -> ScoringAdapter {
        ScoringAdapter::new(
            Arc::new(DictVectorizer::new(&["trip_distance".to_string()])),
            Arc::new(LinearRegressor::new(vec![3.0], 1.0)),
            vec!["trip_distance".into()],
        )
    }

    fn frame(values: Vec<Option<f64>>) -> Frame {
        Frame::from_columns(vec![Column::float("trip_distance", values)]).unwrap()
    }

    #[test]
    fn test_score_zero_rows_is_empty() {
        assert_eq!(adapter().score(&frame(vec![])).unwrap(), Vec::<f64>::new());
    }

    #[test]
    fn test_score_into_appends_aligned_column() {
        let mut f = frame(vec![Some(1.0), Some(2.0)]);
        adapter().score_into(&mut f, "prediction").unwrap();
        assert_eq!(f.floats("prediction").unwrap(), &[Some(4.0), Some(7.0)]);
    }

    #[test]
    fn test_score_into_zero_rows_appends_empty_column() {
        let mut f = frame(vec![]);
        adapter().score_into(&mut f, "prediction").unwrap();
        assert!(f.has_column("prediction"));
        assert_eq!(f.height(), 0);
    }

    struct ShortRegressor;

    impl Regressor for ShortRegressor {
        fn predict(&self, _rows: &[SparseRow]) -> Result<Vec<f64>, MonitorError> {
            Ok(vec![0.0])
        }

        fn n_features(&self) -> usize {
            1
        }
    }

    #[test]
    fn test_misaligned_model_output_is_rejected() {
        let adapter = ScoringAdapter::new(
            Arc::new(DictVectorizer::new(&["trip_distance".to_string()])),
            Arc::new(ShortRegressor),
            vec!["trip_distance".into()],
        );
        assert!(adapter.score(&frame(vec![Some(1.0), Some(2.0)])).is_err());
    }
}

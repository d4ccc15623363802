//! Externally trained model and feature transform, loaded from a JSON artifact.
//!
//! The artifact pairs a dict-style vectoriser vocabulary with linear regression
//! coefficients:
//!
//! ```json
//! { "feature_names": ["DOLocationID=1", "PULocationID=7", "trip_distance"],
//!   "coefficients": [0.4, -1.2, 2.7],
//!   "intercept": 12.3 }
//! ```
//!
//! The monitor never inspects or retrains the model.

use crate::data::frame::{ColumnData, Frame};
use crate::error::MonitorError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

/// Sparse feature row: `(feature index, value)` pairs.
pub type SparseRow = Vec<(usize, f64)>;

/// Maps frame columns into the model's feature space.
pub trait FeatureTransform: Send + Sync {
    /// Vectorise `columns` of every row in `frame`.
    fn transform(&self, frame: &Frame, columns: &[String]) -> Result<Vec<SparseRow>, MonitorError>;

    /// Size of the feature space.
    fn dimension(&self) -> usize;
}

/// Scores vectorised rows.
pub trait Regressor: Send + Sync {
    fn predict(&self, rows: &[SparseRow]) -> Result<Vec<f64>, MonitorError>;

    fn n_features(&self) -> usize;
}

/// Dict-style vectoriser: numeric column `c` becomes feature `c`; text value
/// `s` of column `c` becomes feature `c=s` with value 1. Names outside the
/// vocabulary are dropped.
#[derive(Debug, Clone)]
pub struct DictVectorizer {
    vocabulary: HashMap<String, usize>,
}

impl DictVectorizer {
    pub fn new(feature_names: &[String]) -> Self {
        Self {
            vocabulary: feature_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect(),
        }
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.vocabulary.get(name).copied()
    }
}

impl FeatureTransform for DictVectorizer {
    fn transform(&self, frame: &Frame, columns: &[String]) -> Result<Vec<SparseRow>, MonitorError> {
        let mut rows: Vec<SparseRow> = vec![Vec::new(); frame.height()];
        for name in columns {
            let column = frame.column(name).ok_or_else(|| {
                MonitorError::schema(format!("feature column '{name}' not found in frame"))
            })?;
            match &column.data {
                ColumnData::Float(values) => {
                    let Some(idx) = self.index_of(name) else {
                        continue;
                    };
                    for (row, value) in rows.iter_mut().zip(values) {
                        if let Some(v) = value.filter(|v| v.is_finite()) {
                            row.push((idx, v));
                        }
                    }
                }
                ColumnData::Text(values) => {
                    for (row, value) in rows.iter_mut().zip(values) {
                        if let Some(label) = value {
                            if let Some(idx) = self.index_of(&format!("{name}={label}")) {
                                row.push((idx, 1.0));
                            }
                        }
                    }
                }
                ColumnData::Timestamp(_) => {
                    return Err(MonitorError::model(format!(
                        "timestamp column '{name}' cannot be used as a feature"
                    )));
                }
            }
        }
        Ok(rows)
    }

    fn dimension(&self) -> usize {
        self.vocabulary.len()
    }
}

/// `intercept + Σ coef[i] · x[i]`
#[derive(Debug, Clone)]
pub struct LinearRegressor {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl LinearRegressor {
    pub fn new(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }
}

impl Regressor for LinearRegressor {
    fn predict(&self, rows: &[SparseRow]) -> Result<Vec<f64>, MonitorError> {
        rows.iter()
            .map(|row| {
                row.iter().try_fold(self.intercept, |acc, (idx, value)| {
                    self.coefficients
                        .get(*idx)
                        .map(|coef| acc + coef * value)
                        .ok_or_else(|| {
                            MonitorError::model(format!(
                                "feature index {idx} outside model of {} coefficients",
                                self.coefficients.len()
                            ))
                        })
                })
            })
            .collect()
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }
}

/// On-disk model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub feature_names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// A loaded artifact with its provenance hash.
pub struct LoadedModel {
    pub transform: DictVectorizer,
    pub regressor: LinearRegressor,
    pub sha256: String,
}

impl ModelArtifact {
    /// Read and validate an artifact file.
    pub async fn load(path: &Path) -> Result<LoadedModel, MonitorError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            MonitorError::model(format!("cannot read model artifact {}: {e}", path.display()))
        })?;
        let artifact: ModelArtifact = serde_json::from_slice(&bytes).map_err(|e| {
            MonitorError::model(format!("malformed model artifact {}: {e}", path.display()))
        })?;
        artifact.validate()?;

        let sha256 = hash_bytes(&bytes);
        tracing::info!(
            path = %path.display(),
            features = artifact.feature_names.len(),
            sha256 = %sha256,
            "Loaded model artifact"
        );
        Ok(artifact.into_model(sha256))
    }

    fn validate(&self) -> Result<(), MonitorError> {
        if self.feature_names.len() != self.coefficients.len() {
            return Err(MonitorError::model(format!(
                "{} feature names but {} coefficients",
                self.feature_names.len(),
                self.coefficients.len()
            )));
        }
        if !self.intercept.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err(MonitorError::model("model coefficients must be finite"));
        }
        Ok(())
    }

    /// Split into transform and regressor.
    pub fn into_model(self, sha256: String) -> LoadedModel {
        LoadedModel {
            transform: DictVectorizer::new(&self.feature_names),
            regressor: LinearRegressor::new(self.coefficients, self.intercept),
            sha256,
        }
    }
}

/// Compute SHA-256 hash of arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::Column;
    use std::io::Write;

    fn artifact() -> ModelArtifact {
        ModelArtifact {
            feature_names: vec![
                "PULocationID=138".into(),
                "PULocationID=7".into(),
                "trip_distance".into(),
            ],
            coefficients: vec![5.0, -1.0, 2.0],
            intercept: 10.0,
        }
    }

    #[test]
    fn test_dict_vectorizer_and_linear_prediction() {
        let model = artifact().into_model(String::new());
        let frame = Frame::from_columns(vec![
            Column::float("trip_distance", vec![Some(1.5), Some(0.0), Some(3.0)]),
            Column::text(
                "PULocationID",
                vec![Some("138".into()), Some("7".into()), Some("999".into())],
            ),
        ])
        .unwrap();
        let columns = vec!["trip_distance".to_string(), "PULocationID".to_string()];
        let rows = model.transform.transform(&frame, &columns).unwrap();
        let predictions = model.regressor.predict(&rows).unwrap();
        // unseen category "999" contributes nothing
        assert_eq!(predictions, vec![18.0, 9.0, 16.0]);
    }

    #[test]
    fn test_transform_missing_column() {
        let model = artifact().into_model(String::new());
        let frame = Frame::new();
        let result = model.transform.transform(&frame, &["trip_distance".to_string()]);
        assert!(matches!(result, Err(MonitorError::Schema(_))));
    }

    #[test]
    fn test_validate_length_mismatch() {
        let mut bad = artifact();
        bad.coefficients.pop();
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_hashes_and_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&artifact()).unwrap().as_bytes())
            .unwrap();
        let loaded = ModelArtifact::load(file.path()).await.unwrap();
        assert_eq!(loaded.sha256.len(), 64);
        assert_eq!(loaded.regressor.n_features(), 3);
        assert_eq!(loaded.transform.dimension(), 3);

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        garbage.write_all(b"not json").unwrap();
        assert!(matches!(
            ModelArtifact::load(garbage.path()).await,
            Err(MonitorError::Model(_))
        ));
        assert!(
            ModelArtifact::load(Path::new("/nonexistent/model.json"))
                .await
                .is_err()
        );
    }
}

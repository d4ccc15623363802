//! Error types for the driftwatch-ml crate.

use thiserror::Error;

/// Top-level error type for monitoring operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Metric missing from statistics output: {0}")]
    MissingMetric(String),

    #[error("Metrics store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl MonitorError {
    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error belongs to the setup phase (data, model, schema,
    /// configuration) rather than to a running loop.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Dataset(_)
                | Self::Schema(_)
                | Self::Model(_)
                | Self::Config(_)
                | Self::NotFound(_)
                | Self::Io(_)
                | Self::Serde(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_failure_classification() {
        assert!(MonitorError::dataset("missing file").is_setup_failure());
        assert!(MonitorError::model("bad artifact").is_setup_failure());
        assert!(!MonitorError::store("disk full").is_setup_failure());
        assert!(!MonitorError::MissingMetric("drift_score".into()).is_setup_failure());
    }

    #[test]
    fn test_display_includes_message() {
        let err = MonitorError::schema("column 'fare_amount' absent from reference");
        assert_eq!(
            err.to_string(),
            "Schema error: column 'fare_amount' absent from reference"
        );
    }
}

//! Setup phase: load datasets and model, prepare the store, build the loop.
//!
//! Anything that fails here fails before the first window is computed.

use crate::config::MonitorConfig;
use crate::data::frame::Frame;
use crate::data::schema::{ColumnKinds, require_columns};
use crate::data::source::DataSourceType;
use crate::data::transform::{TransformPipeline, TransformStep};
use crate::drift::metrics::{BuiltinBackend, ColumnMapping};
use crate::drift::report::DriftReportEngine;
use crate::drift::stattest::StatTestOptions;
use crate::error::MonitorError;
use crate::features::Normalizer;
use crate::inference::{LoadedModel, ModelArtifact, ScoringAdapter};
use crate::monitor::runner::{Datasets, MonitorLoop, Pipeline};
use crate::monitor::schedule::WindowSchedule;
use crate::monitor::store::{MetricsStore, SqliteMetricsStore};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Declared column roles used when loading either dataset.
pub fn column_kinds(config: &MonitorConfig) -> ColumnKinds {
    ColumnKinds::new(
        [
            config.data.pickup_column.clone(),
            config.data.dropoff_column.clone(),
        ],
        config.columns.categorical.clone(),
    )
}

/// Target derivation, plus the duration filter when bounds are configured.
pub fn transform_pipeline(config: &MonitorConfig) -> TransformPipeline {
    let mut pipeline = TransformPipeline::new().add_step(TransformStep::DeriveDurationMinutes {
        start: config.data.pickup_column.clone(),
        end: config.data.dropoff_column.clone(),
        output: config.data.target_column.clone(),
    });
    if let Some([min, max]) = config.data.duration_bounds {
        pipeline = pipeline.add_step(TransformStep::FilterRange {
            column: config.data.target_column.clone(),
            min,
            max,
        });
    }
    pipeline
}

/// Load one dataset, check its columns and derive the target.
pub async fn load_dataset(
    config: &MonitorConfig,
    path: &Path,
    dataset: &str,
) -> Result<Frame, MonitorError> {
    let source = DataSourceType::from_path(path, config.data.sqlite_query.as_deref())?.into_source();
    let batch = source.load(None).await?;
    let frame = Frame::from_batch(&batch, &column_kinds(config))?;

    let features = config.feature_columns();
    let required = [
        config.data.pickup_column.as_str(),
        config.data.dropoff_column.as_str(),
        config.report.quantile_column.as_str(),
    ]
    .into_iter()
    .chain(features.iter().map(String::as_str));
    require_columns(&frame, required, dataset)?;
    let numeric = config
        .columns
        .numerical
        .iter()
        .chain(std::iter::once(&config.report.quantile_column));
    for column in numeric {
        frame.floats(column).map_err(|e| {
            MonitorError::schema(format!("{dataset} dataset: {e}"))
        })?;
    }

    let rows_loaded = frame.height();
    let frame = transform_pipeline(config).apply(frame)?;
    tracing::info!(
        dataset,
        path = %path.display(),
        rows_loaded,
        rows = frame.height(),
        columns = frame.width(),
        "Loaded dataset"
    );
    Ok(frame)
}

/// Load the reference and raw datasets.
pub async fn load_datasets(config: &MonitorConfig) -> Result<Datasets, MonitorError> {
    let reference = load_dataset(config, &config.data.reference_path, "reference").await?;
    let raw = load_dataset(config, &config.data.raw_path, "raw").await?;
    Ok(Datasets { reference, raw })
}

/// Per-window components for a loaded model.
pub fn build_pipeline(config: &MonitorConfig, model: LoadedModel) -> Pipeline {
    let features = config.feature_columns();
    let backend = BuiltinBackend {
        stattest: StatTestOptions {
            threshold: config.report.stattest_threshold,
            small_sample_cutoff: config.report.small_sample_cutoff,
        },
        drift_share: config.report.drift_share,
        quantile_column: config.report.quantile_column.clone(),
        quantile: config.report.quantile,
    };
    let mapping = ColumnMapping {
        target: config.data.target_column.clone(),
        prediction: config.columns.prediction.clone(),
        numerical: config.columns.numerical.clone(),
        categorical: config.columns.categorical.clone(),
    };
    Pipeline {
        normalizer: Normalizer::new(
            config.columns.numerical.clone(),
            config.columns.categorical.clone(),
        ),
        scorer: ScoringAdapter::from_loaded(model, features),
        engine: DriftReportEngine::new(Arc::new(backend), mapping),
        timestamp_column: config.data.pickup_column.clone(),
        prediction_column: config.columns.prediction.clone(),
    }
}

/// Build the loop against `store`.
///
/// The store is prepared here: replaced on a fresh run, kept when
/// `store.resume` is set, in which case the loop starts after the latest
/// stored window.
pub async fn bootstrap_with_store(
    config: &MonitorConfig,
    store: Arc<dyn MetricsStore>,
    cancel: CancellationToken,
) -> Result<MonitorLoop, MonitorError> {
    config.validate()?;
    let schedule =
        WindowSchedule::new(config.window.begin, config.period()?, config.window.count)?;

    let datasets = load_datasets(config).await?;
    let model = ModelArtifact::load(&config.model.artifact_path).await?;
    let pipeline = build_pipeline(config, model);

    store.prepare(!config.store.resume).await?;
    let start = if config.store.resume {
        let latest = store.latest_timestamp().await?;
        let index = schedule.resume_index(latest);
        tracing::info!(latest = ?latest, start = index, "Resuming from stored metrics");
        index
    } else {
        0
    };

    Ok(MonitorLoop::new(datasets, pipeline, store, schedule, config.min_interval())
        .starting_at(start)
        .with_cancellation(cancel))
}

/// Build the loop against the configured SQLite store.
pub async fn bootstrap(
    config: &MonitorConfig,
    cancel: CancellationToken,
) -> Result<MonitorLoop, MonitorError> {
    let store = SqliteMetricsStore::new(&config.store.path, config.store.table.clone())?;
    bootstrap_with_store(config, Arc::new(store), cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_pipeline_steps() {
        let mut config = MonitorConfig::default();
        assert_eq!(transform_pipeline(&config).steps.len(), 1);
        config.data.duration_bounds = Some([1.0, 60.0]);
        assert_eq!(transform_pipeline(&config).steps.len(), 2);
    }

    #[test]
    fn test_column_kinds_from_config() {
        let kinds = column_kinds(&MonitorConfig::default());
        assert!(kinds.is_timestamp("lpep_pickup_datetime"));
        assert!(kinds.is_categorical("DOLocationID"));
        assert!(!kinds.is_categorical("fare_amount"));
    }

    #[tokio::test]
    async fn test_missing_model_is_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let csv = "lpep_pickup_datetime,lpep_dropoff_datetime,passenger_count,trip_distance,fare_amount,total_amount,PULocationID,DOLocationID\n\
                   2024-03-01 08:00:00,2024-03-01 08:10:00,1,1.5,9.0,12.0,74,75\n";
        let data = dir.path().join("trips.csv");
        std::fs::write(&data, csv).unwrap();

        let mut config = MonitorConfig::default();
        config.data.reference_path = data.clone();
        config.data.raw_path = data;
        config.model.artifact_path = dir.path().join("missing.json");
        config.store.path = dir.path().join("metrics.db");

        let err = bootstrap(&config, CancellationToken::new()).await.unwrap_err();
        assert!(err.is_setup_failure());
        assert!(matches!(err, MonitorError::Model(_)));
    }

    #[tokio::test]
    async fn test_text_quantile_column_is_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("trips.csv");
        std::fs::write(
            &data,
            "lpep_pickup_datetime,lpep_dropoff_datetime,passenger_count,trip_distance,fare_amount,total_amount,PULocationID,DOLocationID,payment\n\
             2024-03-01 08:00:00,2024-03-01 08:10:00,1,1.5,9.0,12.0,74,75,card\n",
        )
        .unwrap();
        let mut config = MonitorConfig::default();
        config.report.quantile_column = "payment".into();
        assert!(config.validate().is_ok());

        let err = load_dataset(&config, &data, "raw").await.unwrap_err();
        assert!(matches!(err, MonitorError::Schema(_)), "{err}");
        assert!(err.is_setup_failure());
        assert!(err.to_string().contains("payment"));
    }

    #[tokio::test]
    async fn test_unrepresentable_period_is_setup_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MonitorConfig::default();
        config.window.period_secs = 10_000_000_000_000_000;
        config.store.path = dir.path().join("metrics.db");

        let err = bootstrap(&config, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)), "{err}");
        assert!(!config.store.path.exists());
    }

    #[tokio::test]
    async fn test_missing_column_names_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("trips.csv");
        std::fs::write(
            &data,
            "lpep_pickup_datetime,lpep_dropoff_datetime\n2024-03-01 08:00:00,2024-03-01 08:10:00\n",
        )
        .unwrap();
        let config = MonitorConfig::default();
        let err = load_dataset(&config, &data, "reference").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("reference"));
        assert!(message.contains("trip_distance"));
    }
}

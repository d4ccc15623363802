//! Reference-vs-current drift statistics.

pub mod metrics;
pub mod report;
pub mod stattest;

pub use metrics::{BuiltinBackend, ColumnMapping, DriftBackend, MetricSet, MetricValue, ScoredFrame};
pub use report::{DriftReport, DriftReportEngine, UnavailableMetric};
pub use stattest::{ColumnDrift, StatTest, StatTestOptions};

//! Window scheduling, pacing, persistence and the loop that drives them.

pub mod runner;
pub mod schedule;
pub mod store;
pub mod throttle;

pub use runner::{Datasets, LoopState, MonitorLoop, Pipeline, RunSummary};
pub use schedule::{TimeWindow, WindowSchedule, windows};
pub use store::{MemoryMetricsStore, MetricsRecord, MetricsStore, SqliteMetricsStore};
pub use throttle::Throttle;

//! The rate-limited persistence loop.
//!
//! Each window moves through `Idle → Computing → Writing → Throttling` and
//! back to `Idle`; the loop ends in `Done` after the last window or when
//! cancelled between windows.

use crate::data::frame::Frame;
use crate::drift::metrics::ScoredFrame;
use crate::drift::report::{DriftReport, DriftReportEngine};
use crate::error::MonitorError;
use crate::features::Normalizer;
use crate::inference::ScoringAdapter;
use crate::monitor::schedule::{TimeWindow, WindowSchedule};
use crate::monitor::store::{MetricsRecord, MetricsStore};
use crate::monitor::throttle::Throttle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Computing,
    Writing,
    Throttling,
    Done,
}

/// The two datasets the loop owns for its lifetime.
#[derive(Debug, Clone)]
pub struct Datasets {
    /// Fixed baseline, with the target column already derived.
    pub reference: Frame,
    /// Source of every current window.
    pub raw: Frame,
}

/// Per-window processing components.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub normalizer: Normalizer,
    pub scorer: ScoringAdapter,
    pub engine: DriftReportEngine,
    /// Timestamp column that buckets raw rows into windows.
    pub timestamp_column: String,
    pub prediction_column: String,
}

impl Pipeline {
    /// Snapshot missingness, normalise, then append predictions.
    pub fn score(&self, frame: &Frame) -> Result<ScoredFrame, MonitorError> {
        let missing = frame.missing_values();
        let mut normalized = self.normalizer.normalize(frame);
        self.scorer
            .score_into(&mut normalized, &self.prediction_column)?;
        Ok(ScoredFrame::new(normalized, missing))
    }
}

/// Outcome of [`MonitorLoop::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub windows_written: u32,
    /// Written windows whose slice had no rows.
    pub empty_windows: u32,
    /// First window not yet written.
    pub next_index: u32,
    /// Whether the run ended before the last window.
    pub stopped: bool,
}

pub struct MonitorLoop {
    datasets: Datasets,
    pipeline: Pipeline,
    store: Arc<dyn MetricsStore>,
    schedule: WindowSchedule,
    throttle: Throttle,
    next_index: u32,
    state: LoopState,
    cancel: CancellationToken,
}

impl MonitorLoop {
    pub fn new(
        datasets: Datasets,
        pipeline: Pipeline,
        store: Arc<dyn MetricsStore>,
        schedule: WindowSchedule,
        min_interval: Duration,
    ) -> Self {
        Self {
            datasets,
            pipeline,
            store,
            schedule,
            throttle: Throttle::new(min_interval),
            next_index: 0,
            state: LoopState::Idle,
            cancel: CancellationToken::new(),
        }
    }

    /// Skip windows before `index`.
    pub fn starting_at(mut self, index: u32) -> Self {
        self.next_index = index.min(self.schedule.count());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn schedule(&self) -> &WindowSchedule {
        &self.schedule
    }

    fn transition(&mut self, to: LoopState) {
        tracing::debug!(from = ?self.state, to = ?to, "Loop state");
        self.state = to;
    }

    /// Process the remaining windows in order.
    ///
    /// A failed write stops the run with an error; the failed window stays
    /// the next index so a re-run retries it.
    pub async fn run(&mut self) -> Result<RunSummary, MonitorError> {
        let mut summary = RunSummary::default();
        let schedule = self.schedule;
        tracing::info!(
            first = self.next_index,
            count = schedule.count(),
            begin = %schedule.begin(),
            store = %self.store.describe(),
            "Monitoring loop starting"
        );

        for window in schedule.starting_at(self.next_index) {
            if self.cancel.is_cancelled() {
                tracing::info!(window = window.index, "Stop requested; not starting window");
                break;
            }
            let started = Instant::now();

            self.transition(LoopState::Computing);
            let report = match self.compute(&window) {
                Ok(report) => report,
                Err(e) => {
                    self.transition(LoopState::Idle);
                    return Err(e);
                }
            };

            self.transition(LoopState::Writing);
            let record = MetricsRecord::from_report(window.start, &report);
            if let Err(e) = self.store.upsert(&record).await {
                tracing::error!(window = window.index, start = %window.start, error = %e, "Metrics write failed");
                self.transition(LoopState::Idle);
                return Err(e);
            }
            let written_at = Instant::now();
            self.next_index = window.index + 1;
            summary.windows_written += 1;
            if report.current_rows == 0 {
                summary.empty_windows += 1;
            }
            log_window(&window, &report, written_at.duration_since(started));

            self.transition(LoopState::Throttling);
            let completed = self.throttle.pace(written_at, &self.cancel).await;
            self.transition(LoopState::Idle);
            if !completed {
                break;
            }
        }

        self.transition(LoopState::Done);
        summary.next_index = self.next_index;
        summary.stopped = self.next_index < schedule.count();
        tracing::info!(
            written = summary.windows_written,
            empty = summary.empty_windows,
            next_index = summary.next_index,
            stopped = summary.stopped,
            "Monitoring loop finished"
        );
        Ok(summary)
    }

    /// Slice, normalise and score one window and the reference, then compare.
    fn compute(&self, window: &TimeWindow) -> Result<DriftReport, MonitorError> {
        let slice = self.datasets.raw.slice_time_range(
            &self.pipeline.timestamp_column,
            window.start,
            window.end,
        )?;
        let current = self.pipeline.score(&slice)?;
        let reference = self.pipeline.score(&self.datasets.reference)?;
        self.pipeline.engine.compute(&reference, &current)
    }
}

fn log_window(window: &TimeWindow, report: &DriftReport, elapsed: Duration) {
    for missing in &report.unavailable {
        tracing::warn!(
            window = window.index,
            start = %window.start,
            metric = %missing.metric,
            reason = %missing.reason,
            "Metric unavailable; stored as NULL"
        );
    }
    tracing::info!(
        window = window.index,
        start = %window.start,
        rows = report.current_rows,
        prediction_drift = ?report.prediction_drift,
        drifted_columns = report.num_drifted_columns,
        dataset_drift = report.dataset_drift,
        share_missing = ?report.share_missing_values,
        target_quantile = ?report.target_quantile,
        regression_mae = ?report.regression_mae,
        elapsed_ms = elapsed.as_millis() as u64,
        "Window metrics written"
    );
}

impl std::fmt::Debug for MonitorLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorLoop")
            .field("schedule", &self.schedule)
            .field("next_index", &self.next_index)
            .field("state", &self.state)
            .field("store", &self.store.describe())
            .finish()
    }
}

//! Load-time transformation pipeline: target derivation and row filters.

use crate::data::frame::{Column, Frame};
use crate::error::MonitorError;
use serde::{Deserialize, Serialize};

/// A transformation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformStep {
    /// `output = (end - start)` in minutes; missing when either side is missing.
    DeriveDurationMinutes {
        start: String,
        end: String,
        output: String,
    },
    /// Keep rows whose value lies in `[min, max]`; missing values are dropped.
    FilterRange { column: String, min: f64, max: f64 },
}

/// A pipeline of transformation steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformPipeline {
    pub steps: Vec<TransformStep>,
}

impl TransformPipeline {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn add_step(mut self, step: TransformStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Apply the pipeline to a frame.
    pub fn apply(&self, mut frame: Frame) -> Result<Frame, MonitorError> {
        for step in &self.steps {
            let rows_before = frame.height();
            frame = apply_step(frame, step)?;
            tracing::debug!(?step, rows_before, rows_after = frame.height(), "Applied transform");
        }
        Ok(frame)
    }
}

fn apply_step(mut frame: Frame, step: &TransformStep) -> Result<Frame, MonitorError> {
    match step {
        TransformStep::DeriveDurationMinutes { start, end, output } => {
            let minutes: Vec<Option<f64>> = frame
                .timestamps(start)?
                .iter()
                .zip(frame.timestamps(end)?)
                .map(|(s, e)| match (s, e) {
                    (Some(s), Some(e)) => {
                        let delta = *e - *s;
                        delta
                            .num_microseconds()
                            .map(|us| us as f64 / 60_000_000.0)
                            .or_else(|| Some(delta.num_seconds() as f64 / 60.0))
                    }
                    _ => None,
                })
                .collect();
            frame.set_column(Column::float(output.clone(), minutes))?;
            Ok(frame)
        }
        TransformStep::FilterRange { column, min, max } => {
            let mask: Vec<bool> = frame
                .floats(column)?
                .iter()
                .map(|v| v.is_some_and(|x| x >= *min && x <= *max))
                .collect();
            frame.filter(&mask)
        }
    }
}

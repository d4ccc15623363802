//! Window scheduler: consecutive half-open time windows from a fixed epoch.

use crate::error::MonitorError;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// `[start, end)` window number `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub index: u32,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeWindow {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// `count` windows of length `period` starting at `begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSchedule {
    begin: NaiveDateTime,
    period: Duration,
    count: u32,
}

impl WindowSchedule {
    pub fn new(begin: NaiveDateTime, period: Duration, count: u32) -> Result<Self, MonitorError> {
        if period <= Duration::zero() {
            return Err(MonitorError::config(format!(
                "window period must be positive, got {period}"
            )));
        }
        Ok(Self {
            begin,
            period,
            count,
        })
    }

    pub fn begin(&self) -> NaiveDateTime {
        self.begin
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Window `index`, or `None` past the end or on calendar overflow.
    pub fn window(&self, index: u32) -> Option<TimeWindow> {
        if index >= self.count {
            return None;
        }
        let start = self.offset(index)?;
        let end = self.offset(index.checked_add(1)?)?;
        Some(TimeWindow { index, start, end })
    }

    fn offset(&self, index: u32) -> Option<NaiveDateTime> {
        let delta = self.period.checked_mul(i32::try_from(index).ok()?)?;
        self.begin.checked_add_signed(delta)
    }

    /// Every window in order.
    pub fn windows(&self) -> impl Iterator<Item = TimeWindow> + '_ {
        self.starting_at(0)
    }

    /// Windows from `index` onwards.
    pub fn starting_at(&self, index: u32) -> impl Iterator<Item = TimeWindow> + '_ {
        (index..self.count).map_while(|i| self.window(i))
    }

    /// First index after the window starting at `latest`, clamped to `[0, count]`.
    pub fn resume_index(&self, latest: Option<NaiveDateTime>) -> u32 {
        let Some(latest) = latest else {
            return 0;
        };
        if latest < self.begin {
            return 0;
        }
        let elapsed = (latest - self.begin).num_milliseconds();
        let period = self.period.num_milliseconds().max(1);
        let next = elapsed.div_euclid(period).saturating_add(1);
        u32::try_from(next).unwrap_or(u32::MAX).min(self.count)
    }
}

/// Enumerate `count` consecutive windows of `period` starting at `begin`.
pub fn windows(
    begin: NaiveDateTime,
    period: Duration,
    count: u32,
) -> Result<Vec<TimeWindow>, MonitorError> {
    Ok(WindowSchedule::new(begin, period, count)?.windows().collect())
}

//! Minimum spacing between metric writes.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Paces writes so that each one is followed by at least `min_interval`
/// measured from the completion of the write before it.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last_write: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_write: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn last_write(&self) -> Option<Instant> {
        self.last_write
    }

    /// Time still owed after a write completing at `written_at`.
    pub fn remaining(&self, written_at: Instant) -> Duration {
        match self.last_write {
            Some(previous) => self
                .min_interval
                .saturating_sub(written_at.saturating_duration_since(previous)),
            None => Duration::ZERO,
        }
    }

    /// Record a write completed at `written_at` and sleep off the remainder.
    ///
    /// Returns `false` if `cancel` fired during the wait. The write is
    /// recorded either way.
    pub async fn pace(&mut self, written_at: Instant, cancel: &CancellationToken) -> bool {
        let wait = self.remaining(written_at);
        self.last_write = Some(written_at);
        if wait.is_zero() {
            return true;
        }
        tracing::debug!(wait_ms = wait.as_millis() as u64, "Throttling");
        tokio::select! {
            _ = tokio::time::sleep(wait) => true,
            _ = cancel.cancelled() => {
                tracing::debug!("Cancelled while throttling");
                false
            }
        }
    }
}

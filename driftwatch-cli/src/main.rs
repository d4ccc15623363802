//! driftwatch: long-running drift monitor.
//!
//! Compares each configured time window of raw observations against the
//! reference dataset and records one metrics row per window.

use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use driftwatch_ml::{MonitorConfig, bootstrap, load_config};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// driftwatch: record reference-vs-window drift metrics at a bounded rate
#[derive(Parser, Debug)]
#[command(name = "driftwatch", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./driftwatch.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start of window 0 (e.g. 2024-03-01 or 2024-03-01T06:00:00)
    #[arg(long, value_parser = parse_begin)]
    begin: Option<NaiveDateTime>,

    /// Number of windows to process
    #[arg(long)]
    count: Option<u32>,

    /// Window length in seconds
    #[arg(long)]
    period_secs: Option<u64>,

    /// Minimum seconds between metric writes
    #[arg(long)]
    min_interval: Option<u64>,

    /// Metrics database path
    #[arg(long)]
    store: Option<PathBuf>,

    /// Keep stored metrics and continue after the latest stored window
    #[arg(long)]
    resume: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors to stderr
    #[arg(short, long)]
    quiet: bool,
}

fn parse_begin(raw: &str) -> Result<NaiveDateTime, String> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(chrono::NaiveTime::MIN));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .ok_or_else(|| format!("'{raw}' is not a date or date-time"))
}

impl Cli {
    fn apply_overrides(&self, config: &mut MonitorConfig) {
        if let Some(begin) = self.begin {
            config.window.begin = begin;
        }
        if let Some(count) = self.count {
            config.window.count = count;
        }
        if let Some(period) = self.period_secs {
            config.window.period_secs = period;
        }
        if let Some(interval) = self.min_interval {
            config.throttle.min_interval_secs = interval;
        }
        if let Some(store) = &self.store {
            config.store.path = store.clone();
        }
        if self.resume {
            config.store.resume = true;
        }
    }

    fn stderr_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(cli.stderr_filter()));

    let log_dir = directories::ProjectDirs::from("dev", "driftwatch", "driftwatch")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "driftwatch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Load configuration
    let mut config = load_config(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    let cancel = CancellationToken::new();
    let mut monitor = bootstrap(&config, cancel.clone()).await.map_err(|e| {
        tracing::error!(error = %e, "Setup failed");
        anyhow::Error::new(e).context("monitor setup failed")
    })?;

    // Stop between windows on Ctrl-C
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Stop requested; finishing current window");
            cancel.cancel();
        }
    });

    let summary = monitor.run().await?;
    if summary.stopped {
        tracing::info!(next_index = summary.next_index, "Stopped early; rerun with --resume to continue");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_begin_forms() {
        let midnight = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(parse_begin("2024-03-01"), Ok(midnight));
        assert_eq!(parse_begin("2024-03-01T00:00:00"), Ok(midnight));
        assert_eq!(parse_begin("2024-03-01 00:00:00"), Ok(midnight));
        assert!(parse_begin("March 1st").is_err());
    }

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let cli = Cli::parse_from([
            "driftwatch",
            "--count",
            "3",
            "--min-interval",
            "0",
            "--resume",
            "--store",
            "/tmp/m.db",
        ]);
        let mut config = MonitorConfig::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.window.count, 3);
        assert_eq!(config.throttle.min_interval_secs, 0);
        assert!(config.store.resume);
        assert_eq!(config.store.path, PathBuf::from("/tmp/m.db"));
        assert_eq!(config.window.period_secs, 86_400);
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(Cli::parse_from(["driftwatch"]).stderr_filter(), "info");
        assert_eq!(Cli::parse_from(["driftwatch", "-q"]).stderr_filter(), "error");
        assert_eq!(Cli::parse_from(["driftwatch", "-vv"]).stderr_filter(), "trace");
    }
}

//! # driftwatch-ml: reference-vs-window drift monitoring
//!
//! This crate compares a fixed reference dataset against consecutive time
//! windows of newly observed data and records one metrics row per window at
//! a bounded write rate.
//!
//! ## Per-window flow
//!
//! 1. **Schedule**: [`monitor::WindowSchedule`] yields `[start, end)` windows
//! 2. **Normalize**: [`features::Normalizer`] fills missing feature cells
//! 3. **Score**: [`inference::ScoringAdapter`] appends model predictions
//! 4. **Compare**: [`drift::DriftReportEngine`] produces a typed [`drift::DriftReport`]
//! 5. **Persist**: [`monitor::MetricsStore`] upserts a [`monitor::MetricsRecord`], then
//!    [`monitor::Throttle`] paces the next write

// Foundation
pub mod config;
pub mod error;

// Data
pub mod data;
pub mod features;

// Model
pub mod inference;

// Statistics
pub mod drift;

// Loop
pub mod bootstrap;
pub mod monitor;

// Re-exports
pub use bootstrap::{bootstrap, bootstrap_with_store};
pub use config::{MonitorConfig, load_config};
pub use error::MonitorError;
pub use monitor::{MonitorLoop, RunSummary};

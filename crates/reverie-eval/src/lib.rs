//! `reverie-eval` – Metrics Collector and Comparator.
//!
//! Records what each run retrieved and how big the store grew, then compares
//! the distilled and raw arms across saved runs.
//!
//! # Modules
//!
//! - [`metrics`] – [`MetricsCollector`][metrics::MetricsCollector] and the
//!   persisted [`MetricsRun`][metrics::MetricsRun] record.
//! - [`comparison`] – [`compare_performance`][comparison::compare_performance]:
//!   per-mode means and success rates.
//! - [`report`] – [`render_report`][report::render_report]: the Markdown
//!   summary with key findings.

pub mod comparison;
pub mod metrics;
pub mod report;

pub use comparison::{ModeSummary, PerformanceComparison, compare_performance};
pub use metrics::{MetricsCollector, MetricsError, MetricsRun, RunSummary, TaskOutcome, load_scenario_runs};
pub use report::{KeyFindings, render_report};

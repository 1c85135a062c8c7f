//! Distilled-vs-raw aggregation over saved runs.

use std::path::Path;

use reverie_types::MemoryMode;
use serde::{Deserialize, Serialize};

use crate::metrics::{MetricsRun, load_scenario_runs};

/// Per-mode means over a set of runs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModeSummary {
    pub runs: usize,
    pub avg_latency_ms: f64,
    pub avg_store_size: f64,
    pub avg_duration_ms: f64,
    pub avg_attempts: f64,
    /// Successes over runs; `0.0` when there are no runs.
    pub success_rate: f64,
}

impl ModeSummary {
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a MetricsRun>) -> Self {
        let summaries: Vec<_> = runs.into_iter().map(MetricsRun::summary_or_compute).collect();
        if summaries.is_empty() {
            return Self::default();
        }
        let n = summaries.len() as f64;
        let mean = |f: fn(&crate::metrics::RunSummary) -> f64| summaries.iter().map(f).sum::<f64>() / n;
        Self {
            runs: summaries.len(),
            avg_latency_ms: mean(|s| s.avg_latency_ms),
            avg_store_size: mean(|s| s.final_store_size as f64),
            avg_duration_ms: mean(|s| s.total_duration_ms as f64),
            avg_attempts: mean(|s| f64::from(s.attempts_to_solve)),
            success_rate: summaries.iter().filter(|s| s.task_success).count() as f64 / n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceComparison {
    pub scenario_id: String,
    pub distilled: ModeSummary,
    pub raw: ModeSummary,
}

impl PerformanceComparison {
    /// Partition `runs` by mode.  Runs of other scenarios are ignored.
    pub fn from_runs(scenario_id: &str, runs: &[MetricsRun]) -> Self {
        let of_mode = |mode: MemoryMode| {
            runs.iter()
                .filter(move |r| r.scenario_id == scenario_id && r.mode == mode)
        };
        Self {
            scenario_id: scenario_id.to_string(),
            distilled: ModeSummary::from_runs(of_mode(MemoryMode::Distilled)),
            raw: ModeSummary::from_runs(of_mode(MemoryMode::Raw)),
        }
    }

    /// Both arms have at least one run.
    pub fn is_complete(&self) -> bool {
        self.distilled.runs > 0 && self.raw.runs > 0
    }
}

/// Load every saved run of `scenario_id` from `runs_dir` and compare the
/// two modes.  Reads files only.
pub fn compare_performance(runs_dir: &Path, scenario_id: &str) -> PerformanceComparison {
    PerformanceComparison::from_runs(scenario_id, &load_scenario_runs(runs_dir, scenario_id))
}

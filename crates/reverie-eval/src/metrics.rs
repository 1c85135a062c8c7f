//! Run-scoped metrics.
//!
//! A [`MetricsCollector`] is created when a run starts, accumulates
//! retrieval records and store snapshots while the run is in progress, takes
//! one terminal [`TaskOutcome`], and is consumed by [`MetricsCollector::save`],
//! which writes `<scenario>_<mode>_<runId>.json` into the runs directory.
//! Saved runs are never touched again.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reverie_memory::StoreStats;
use reverie_types::{MemoryMode, RetrievalResult};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One retrieval call as seen by the decision loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRecord {
    pub timestamp: DateTime<Utc>,
    pub query_text: String,
    pub result_count: usize,
    pub top_similarity: f32,
    pub avg_similarity: f32,
    pub latency_ms: f64,
    pub source: String,
}

/// Store size at one point of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub stats: StoreStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub attempts: u32,
    #[serde(default)]
    pub total_steps: u32,
}

/// Derived statistics written next to the raw records.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_retrievals: usize,
    pub avg_latency_ms: f64,
    pub avg_result_count: f64,
    pub total_duration_ms: i64,
    pub final_store_size: u64,
    pub final_distilled_count: usize,
    pub final_raw_count: usize,
    pub task_success: bool,
    pub attempts_to_solve: u32,
}

/// Everything recorded about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRun {
    pub run_id: String,
    pub scenario_id: String,
    pub mode: MemoryMode,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retrievals: Vec<RetrievalRecord>,
    #[serde(default)]
    pub store_snapshots: Vec<StoreSnapshot>,
    #[serde(default)]
    pub task_outcome: Option<TaskOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,
}

impl MetricsRun {
    pub fn new(run_id: impl Into<String>, scenario_id: impl Into<String>, mode: MemoryMode) -> Self {
        Self {
            run_id: run_id.into(),
            scenario_id: scenario_id.into(),
            mode,
            start_time: Utc::now(),
            end_time: None,
            retrievals: Vec::new(),
            store_snapshots: Vec::new(),
            task_outcome: None,
            summary: None,
        }
    }

    /// `<scenario>_<mode>_<runId>.json`
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.json", self.scenario_id, self.mode, self.run_id)
    }

    /// Compute the summary from the recorded data.  An unfinished run is
    /// measured up to `now`.
    pub fn summarize(&self) -> RunSummary {
        let total_retrievals = self.retrievals.len();
        let (avg_latency_ms, avg_result_count) = if total_retrievals == 0 {
            (0.0, 0.0)
        } else {
            let n = total_retrievals as f64;
            (
                self.retrievals.iter().map(|r| r.latency_ms).sum::<f64>() / n,
                self.retrievals.iter().map(|r| r.result_count as f64).sum::<f64>() / n,
            )
        };
        let end = self.end_time.unwrap_or_else(Utc::now);
        let last = self.store_snapshots.last().map(|s| s.stats).unwrap_or_default();
        let outcome = self.task_outcome.unwrap_or_default();
        RunSummary {
            total_retrievals,
            avg_latency_ms,
            avg_result_count,
            total_duration_ms: (end - self.start_time).num_milliseconds().max(0),
            final_store_size: last.store_size_bytes,
            final_distilled_count: last.distilled_count,
            final_raw_count: last.raw_count,
            task_success: outcome.success,
            attempts_to_solve: outcome.attempts,
        }
    }

    /// The stored summary, or a freshly computed one for files written
    /// without it.
    pub fn summary_or_compute(&self) -> RunSummary {
        self.summary.clone().unwrap_or_else(|| self.summarize())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MetricsCollector
// ─────────────────────────────────────────────────────────────────────────────

pub struct MetricsCollector {
    run: MetricsRun,
    runs_dir: PathBuf,
}

impl MetricsCollector {
    pub fn new(
        run_id: impl Into<String>,
        scenario_id: impl Into<String>,
        mode: MemoryMode,
        runs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            run: MetricsRun::new(run_id, scenario_id, mode),
            runs_dir: runs_dir.into(),
        }
    }

    pub fn run(&self) -> &MetricsRun {
        &self.run
    }

    /// Record one retrieval call.  `source` defaults to the run's mode.
    pub fn record_retrieval(
        &mut self,
        query_text: &str,
        results: &[RetrievalResult],
        latency: Duration,
        source: Option<&str>,
    ) {
        let top_similarity = results.first().map(|r| r.similarity).unwrap_or(0.0);
        let avg_similarity = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.similarity).sum::<f32>() / results.len() as f32
        };
        self.run.retrievals.push(RetrievalRecord {
            timestamp: Utc::now(),
            query_text: query_text.to_string(),
            result_count: results.len(),
            top_similarity,
            avg_similarity,
            latency_ms: latency.as_secs_f64() * 1000.0,
            source: source.unwrap_or(self.run.mode.as_str()).to_string(),
        });
    }

    pub fn snapshot_store(&mut self, stats: StoreStats) {
        self.run.store_snapshots.push(StoreSnapshot {
            timestamp: Utc::now(),
            stats,
        });
    }

    /// Record the terminal outcome.  Only the first call counts.
    pub fn record_outcome(&mut self, outcome: TaskOutcome) {
        if self.run.task_outcome.is_some() {
            warn!(run = %self.run.run_id, "task outcome already recorded; ignoring");
            return;
        }
        self.run.task_outcome = Some(outcome);
        self.run.end_time = Some(Utc::now());
    }

    pub fn summary(&self) -> RunSummary {
        self.run.summarize()
    }

    /// Finalise the run and write it to the runs directory.
    pub fn save(mut self) -> Result<PathBuf, MetricsError> {
        if self.run.end_time.is_none() {
            self.run.end_time = Some(Utc::now());
        }
        self.run.summary = Some(self.run.summarize());

        let path = self.runs_dir.join(self.run.file_name());
        write_atomically(&self.runs_dir, &path, &serde_json::to_vec_pretty(&self.run)?)?;
        info!(path = %path.display(), run = %self.run.run_id, "metrics saved");
        Ok(path)
    }
}

fn write_atomically(dir: &Path, path: &Path, bytes: &[u8]) -> Result<(), MetricsError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| MetricsError::Io { path, source }
    };
    fs::create_dir_all(dir).map_err(io(dir))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io(dir))?;
    tmp.write_all(bytes).map_err(io(path))?;
    tmp.persist(path).map_err(|e| MetricsError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Every saved run of `scenario_id` in `runs_dir`.
///
/// Files are matched on the `scenario_id` recorded inside them, so
/// `maze_v1` never picks up `maze_v10`.  Unreadable files are skipped.
pub fn load_scenario_runs(runs_dir: &Path, scenario_id: &str) -> Vec<MetricsRun> {
    let entries = match fs::read_dir(runs_dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %runs_dir.display(), error = %e, "runs directory unreadable");
            }
            return Vec::new();
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    let mut runs = Vec::new();
    for path in paths {
        let parsed = fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<MetricsRun>(&raw).map_err(|e| e.to_string()));
        match parsed {
            Ok(run) if run.scenario_id == scenario_id => runs.push(run),
            Ok(_) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable metrics file"),
        }
    }
    runs
}

//! Run session – one scenario run from first recall to saved metrics.
//!
//! [`MemoryEngine`] bundles the long-lived pieces (store, retriever,
//! distiller).  A [`MemorySession`] borrows the engine mutably for the
//! duration of one run, so a single process can only drive one writer at a
//! time.
//!
//! ```text
//!   recall(observation) ──▶ HybridRetriever ──▶ Vec<RetrievalResult>
//!            │                                         │
//!            └──────── MetricsCollector::record_retrieval ◀┘
//!
//!   record_attempt(log) ──▶ raw episode ─┐
//!                        └─▶ Distiller ──┴─▶ VectorStore::add_*  ──▶ snapshot
//!
//!   finish(outcome) ──▶ snapshot + outcome ──▶ <runs_dir>/<scenario>_<mode>_<run>.json
//! ```

use std::path::PathBuf;
use std::time::Instant;

use reverie_distill::Distiller;
use reverie_eval::{MetricsCollector, MetricsError, TaskOutcome};
use reverie_memory::{HybridRetriever, RetrievalRequest, StoreError, VectorStore};
use reverie_types::{AttemptLog, Observation, RetrievalResult};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::memory_mode::MemoryProfile;

/// Number of memories requested per recall.
pub const RECALL_TOP_K: usize = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryEngine
// ─────────────────────────────────────────────────────────────────────────────

/// The store plus the components that read and feed it.
pub struct MemoryEngine {
    pub store: VectorStore,
    pub retriever: HybridRetriever,
    pub distiller: Distiller,
}

impl MemoryEngine {
    /// Build an engine whose retriever and distiller share the distiller's
    /// scenario registry.
    pub fn new(store: VectorStore, distiller: Distiller) -> Self {
        let retriever = HybridRetriever::new(distiller.scenarios().clone());
        Self {
            store,
            retriever,
            distiller,
        }
    }

    pub fn with_retriever(mut self, retriever: HybridRetriever) -> Self {
        self.retriever = retriever;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingest report
// ─────────────────────────────────────────────────────────────────────────────

/// What [`MemorySession::record_attempt`] stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub raw_stored: bool,
    pub distilled_stored: usize,
    /// Entries dropped because the embedder failed on them.
    pub skipped: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemorySession
// ─────────────────────────────────────────────────────────────────────────────

pub struct MemorySession<'e> {
    engine: &'e mut MemoryEngine,
    profile: MemoryProfile,
    scenario_id: String,
    metrics: MetricsCollector,
    attempts: u32,
}

impl<'e> MemorySession<'e> {
    /// Start a run with a fresh random run id.
    pub fn start(
        engine: &'e mut MemoryEngine,
        profile: MemoryProfile,
        scenario_id: impl Into<String>,
        runs_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_run_id(engine, profile, scenario_id, runs_dir, Uuid::new_v4().to_string())
    }

    pub fn with_run_id(
        engine: &'e mut MemoryEngine,
        profile: MemoryProfile,
        scenario_id: impl Into<String>,
        runs_dir: impl Into<PathBuf>,
        run_id: impl Into<String>,
    ) -> Self {
        let scenario_id = scenario_id.into();
        let run_id = run_id.into();
        info!(run = %run_id, scenario = %scenario_id, profile = %profile, "session started");
        let metrics = MetricsCollector::new(run_id, scenario_id.clone(), profile.mode, runs_dir);
        Self {
            engine,
            profile,
            scenario_id,
            metrics,
            attempts: 0,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.metrics.run().run_id
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    pub fn profile(&self) -> MemoryProfile {
        self.profile
    }

    /// Attempts ingested so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Retrieve memories for `observation` and record the call.
    ///
    /// Never fails: an empty list means "no usable memory yet".
    pub async fn recall(&mut self, observation: &Observation) -> Vec<RetrievalResult> {
        let request = RetrievalRequest::new(self.scenario_id.clone())
            .observation(observation.clone())
            .top_k(RECALL_TOP_K)
            .include_distilled(self.profile.include_distilled)
            .include_raw(self.profile.include_raw);
        let query_text = self.engine.retriever.query_text(&self.scenario_id, observation);

        let started = Instant::now();
        let results = self.engine.retriever.retrieve(&self.engine.store, &request).await;
        let latency = started.elapsed();

        let source = results.first().map(|r| r.source.as_str());
        self.metrics.record_retrieval(&query_text, &results, latency, source);
        debug!(
            scenario = %self.scenario_id,
            results = results.len(),
            latency_ms = latency.as_secs_f64() * 1000.0,
            "recall"
        );
        results
    }

    /// Ingest one finished attempt.
    ///
    /// The raw episode is stored under every profile so both arms can be
    /// compared later.  Distilled units follow the profile's style.
    ///
    /// # Errors
    ///
    /// Embedding failures skip the entry.  Integrity and I/O errors from the
    /// store abort the ingest and are returned.
    pub async fn record_attempt(&mut self, log: &AttemptLog) -> Result<IngestReport, SessionError> {
        if log.scenario_id != self.scenario_id {
            warn!(
                session = %self.scenario_id,
                log = %log.scenario_id,
                "attempt log belongs to another scenario"
            );
        }
        let mut report = IngestReport::default();

        let episode = self.engine.distiller.raw_episode(log);
        match self.engine.store.add_raw(episode).await {
            Ok(()) => report.raw_stored = true,
            Err(StoreError::Embedding(e)) => {
                warn!(run = %log.run_id, error = %e, "raw episode not embedded; skipping");
                report.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }

        let units = self.engine.distiller.distill(log, self.profile.distill_style).await;
        for unit in units {
            let id = unit.id;
            match self.engine.store.add_distilled(unit.with_evidence(&log.run_id)).await {
                Ok(()) => report.distilled_stored += 1,
                Err(StoreError::Embedding(e)) => {
                    warn!(unit = %id, error = %e, "memory unit not embedded; skipping");
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.attempts += 1;
        self.metrics.snapshot_store(self.engine.store.stats());
        info!(
            run = %log.run_id,
            attempt = log.attempt_index,
            success = log.success,
            distilled = report.distilled_stored,
            "attempt ingested"
        );
        Ok(report)
    }

    /// Close the run and persist its metrics file.
    pub fn finish(mut self, outcome: TaskOutcome) -> Result<PathBuf, SessionError> {
        self.metrics.snapshot_store(self.engine.store.stats());
        self.metrics.record_outcome(outcome);
        Ok(self.metrics.save()?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use reverie_memory::{EmbedError, Embedder, HashingEmbedder};
    use reverie_types::{MemorySource, ScenarioDetails};

    use super::*;

    fn engine() -> MemoryEngine {
        let store = VectorStore::open_in_memory(Arc::new(HashingEmbedder::default()));
        MemoryEngine::new(store, Distiller::default())
    }

    fn lever_log(attempt: u32, success: bool, sequence: Vec<u32>) -> AttemptLog {
        AttemptLog::new(
            "lever_puzzle_3",
            "run-a",
            attempt,
            success,
            ScenarioDetails::LeverPuzzle { sequence },
        )
    }

    /// Fails on any text mentioning "lever".
    struct PickyEmbedder(HashingEmbedder);

    #[async_trait]
    impl Embedder for PickyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.to_lowercase().contains("lever") {
                return Err(EmbedError::Backend("refused".into()));
            }
            self.0.embed(text).await
        }
    }

    // ── record_attempt ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn distilled_profile_stores_raw_and_distilled() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine();
        let mut session = MemorySession::start(&mut engine, MemoryProfile::DISTILLED, "lever_puzzle_3", dir.path());

        let report = session.record_attempt(&lever_log(4, true, vec![2, 3, 1])).await.unwrap();
        assert!(report.raw_stored);
        assert_eq!(report.distilled_stored, 1);
        assert_eq!(session.attempts(), 1);
        assert_eq!(session.metrics().run().store_snapshots.len(), 1);

        drop(session);
        let stats = engine.store.stats();
        assert_eq!((stats.distilled_count, stats.raw_count), (1, 1));
        let unit = engine.store.distilled_for("lever_puzzle_3").next().unwrap();
        assert!(unit.evidence_run_ids.contains("run-a"));
    }

    #[tokio::test]
    async fn raw_profile_never_distils() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine();
        let mut session = MemorySession::start(&mut engine, MemoryProfile::RAW, "lever_puzzle_3", dir.path());

        let report = session.record_attempt(&lever_log(1, false, vec![1, 2, 3])).await.unwrap();
        assert_eq!(report.distilled_stored, 0);
        drop(session);
        assert_eq!(engine.store.stats().distilled_count, 0);
        assert_eq!(engine.store.stats().raw_count, 1);
    }

    #[tokio::test]
    async fn embedding_failures_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_in_memory(Arc::new(PickyEmbedder(HashingEmbedder::default())));
        let mut engine = MemoryEngine::new(store, Distiller::default());
        let mut session = MemorySession::start(&mut engine, MemoryProfile::DISTILLED, "lever_puzzle_3", dir.path());

        let report = session.record_attempt(&lever_log(2, true, vec![3, 1])).await.unwrap();
        assert_eq!(
            report,
            IngestReport {
                raw_stored: false,
                distilled_stored: 0,
                skipped: 2,
            }
        );
        assert_eq!(session.attempts(), 1);
    }

    // ── recall ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn recall_finds_ingested_success_and_records_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine();
        let mut session = MemorySession::start(&mut engine, MemoryProfile::DISTILLED, "lever_puzzle_3", dir.path());
        session.record_attempt(&lever_log(4, true, vec![2, 3, 1])).await.unwrap();

        let results = session.recall(&Observation::default()).await;
        assert!(!results.is_empty());
        assert!(results[0].record.success());
        assert!(results[0].record.text().contains("2-3-1"));

        let retrievals = &session.metrics().run().retrievals;
        assert_eq!(retrievals.len(), 1);
        assert_eq!(retrievals[0].query_text, "successful lever sequence puzzle solution");
        assert_eq!(retrievals[0].result_count, results.len());
        assert_eq!(retrievals[0].source, results[0].source.as_str());
    }

    #[tokio::test]
    async fn recall_on_empty_store_is_empty_and_tagged_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine();
        let mut session = MemorySession::start(&mut engine, MemoryProfile::RAW, "maze_v1", dir.path());

        assert!(session.recall(&Observation::default()).await.is_empty());
        let record = &session.metrics().run().retrievals[0];
        assert_eq!(record.result_count, 0);
        assert_eq!(record.source, "raw");
    }

    #[tokio::test]
    async fn raw_profile_gets_no_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine();
        {
            let mut distilled =
                MemorySession::start(&mut engine, MemoryProfile::DISTILLED, "lever_puzzle_3", dir.path());
            distilled.record_attempt(&lever_log(4, true, vec![2, 3, 1])).await.unwrap();
        }
        let mut raw = MemorySession::start(&mut engine, MemoryProfile::RAW, "lever_puzzle_3", dir.path());
        let results = raw.recall(&Observation::default()).await;
        assert!(results.iter().all(|r| r.source == MemorySource::Raw));
    }

    // ── finish ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn finish_writes_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine();
        let mut session = MemorySession::with_run_id(
            &mut engine,
            MemoryProfile::DISTILLED,
            "lever_puzzle_3",
            dir.path(),
            "r1",
        );
        session.record_attempt(&lever_log(1, true, vec![2, 3, 1])).await.unwrap();
        session.recall(&Observation::default()).await;

        let path = session
            .finish(TaskOutcome {
                success: true,
                attempts: 1,
                total_steps: 3,
            })
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "lever_puzzle_3_distilled_r1.json");

        let runs = reverie_eval::load_scenario_runs(dir.path(), "lever_puzzle_3");
        assert_eq!(runs.len(), 1);
        let summary = runs[0].summary_or_compute();
        assert!(summary.task_success);
        assert_eq!(summary.attempts_to_solve, 1);
        assert_eq!(summary.total_retrievals, 1);
        assert_eq!(summary.final_distilled_count, 1);
    }
}

//! Whole-run scenarios over a store file on disk.

use std::path::Path;
use std::sync::Arc;

use reverie_distill::Distiller;
use reverie_eval::{TaskOutcome, compare_performance};
use reverie_memory::{HashingEmbedder, VectorStore};
use reverie_runtime::{MemoryEngine, MemoryProfile, MemorySession};
use reverie_types::{AttemptLog, MemorySource, Observation, ScenarioDetails};

fn open_engine(store_path: &Path) -> MemoryEngine {
    let store = VectorStore::open(store_path, Arc::new(HashingEmbedder::default())).unwrap();
    MemoryEngine::new(store, Distiller::default())
}

fn failed_maze_attempt(run_id: &str, attempt: u32) -> AttemptLog {
    AttemptLog::new(
        "maze_v1",
        run_id,
        attempt,
        false,
        ScenarioDetails::Maze {
            step_count: None,
            turn_sequence: Vec::new(),
            actions: Vec::new(),
        },
    )
}

#[tokio::test]
async fn two_failed_maze_runs_compare_as_distilled_only() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("memory.json");
    let runs_dir = dir.path().join("runs");

    for run_id in ["m1", "m2"] {
        // Each run is a fresh pass over the same store file.
        let mut engine = open_engine(&store_path);
        let mut session =
            MemorySession::with_run_id(&mut engine, MemoryProfile::DISTILLED, "maze_v1", &runs_dir, run_id);
        session.recall(&Observation::default()).await;
        let report = session.record_attempt(&failed_maze_attempt(run_id, 1)).await.unwrap();
        assert_eq!(report.distilled_stored, 1);
        session
            .finish(TaskOutcome {
                success: false,
                attempts: 1,
                total_steps: 0,
            })
            .unwrap();
    }

    let comparison = compare_performance(&runs_dir, "maze_v1");
    assert_eq!(comparison.raw.runs, 0);
    assert_eq!(comparison.distilled.runs, 2);
    assert_eq!(comparison.distilled.success_rate, 0.0);
    assert!(!comparison.is_complete());

    let engine = open_engine(&store_path);
    let stats = engine.store.stats();
    assert_eq!((stats.distilled_count, stats.raw_count), (2, 2));
    let rules: Vec<_> = engine
        .store
        .distilled_for("maze_v1")
        .filter_map(|u| u.payload.as_ref().map(|p| p.rule.clone()))
        .collect();
    assert_eq!(rules.len(), 2);
    assert!(rules.iter().all(|r| r.contains("without a recorded route")));
}

#[tokio::test]
async fn lever_success_is_recalled_in_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("memory.json");
    let runs_dir = dir.path().join("runs");

    {
        let mut engine = open_engine(&store_path);
        let mut session = MemorySession::start(&mut engine, MemoryProfile::DISTILLED, "lever_puzzle_3", &runs_dir);
        let log = AttemptLog::new(
            "lever_puzzle_3",
            "first",
            4,
            true,
            ScenarioDetails::LeverPuzzle { sequence: vec![2, 3, 1] },
        );
        session.record_attempt(&log).await.unwrap();
        session
            .finish(TaskOutcome {
                success: true,
                attempts: 4,
                total_steps: 3,
            })
            .unwrap();
    }

    let mut engine = open_engine(&store_path);
    let mut session = MemorySession::start(&mut engine, MemoryProfile::DISTILLED, "lever_puzzle_3", &runs_dir);
    let results = session.recall(&Observation::default()).await;

    let hit = results
        .iter()
        .find(|r| r.record.text() == "Successful lever sequence 2-3-1 at attempt 4")
        .expect("success recalled");
    assert_eq!(hit.source, MemorySource::Distilled);
    assert!((hit.boosted_score - hit.similarity * 0.97).abs() < 1e-5);
}

#[tokio::test]
async fn raw_arm_sees_only_raw_episodes() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("memory.json");
    let runs_dir = dir.path().join("runs");

    let mut engine = open_engine(&store_path);
    let log = AttemptLog::new(
        "lever_puzzle_3",
        "raw-run",
        1,
        true,
        ScenarioDetails::LeverPuzzle { sequence: vec![2, 3, 1] },
    );
    {
        let mut session = MemorySession::start(&mut engine, MemoryProfile::DISTILLED, "lever_puzzle_3", &runs_dir);
        session.record_attempt(&log).await.unwrap();
    }
    let mut session = MemorySession::start(&mut engine, MemoryProfile::RAW, "lever_puzzle_3", &runs_dir);
    let results = session.recall(&Observation::default()).await;
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.source == MemorySource::Raw));
}

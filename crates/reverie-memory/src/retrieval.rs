//! Hybrid Retrieval.
//!
//! Similarity search over the [`VectorStore`], followed by a rule-based
//! safety net for the distilled arm:
//!
//! | similarity hits | any hit a success? | distilled requested | result                                   |
//! |-----------------|--------------------|---------------------|------------------------------------------|
//! | non-empty       | yes                | –                   | hits as ranked                           |
//! | non-empty       | no                 | yes                 | hits + recent successes (`distilled_refresh`), re-ranked |
//! | empty           | –                  | yes                 | recent successes (`distilled_fallback`)  |
//! | any             | –                  | no                  | hits as ranked, no backfill              |
//!
//! The raw arm deliberately gets no backfill so it stays an unassisted
//! baseline.
//!
//! [`HybridRetriever::try_retrieve`] returns a `Result`;
//! [`HybridRetriever::retrieve`] is the boundary used by the decision loop
//! and turns every failure into an empty list after logging it.

use std::collections::HashSet;

use reverie_types::{
    MemoryRecord, MemorySource, MemoryUnit, Observation, RetrievalResult, ScenarioKind,
    ScenarioRegistry,
};
use tracing::{debug, info, warn};

use crate::vector_store::{Result, SearchOptions, VectorStore};

/// Similarity below which hits are discarded by default.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;
/// Score assigned to results pulled in by the empty-search fallback.
pub const FALLBACK_SCORE: f32 = 0.5;
/// Score assigned to successes backfilled next to weak hits.
pub const REFRESH_SCORE: f32 = 1.0;

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters of one retrieval call.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub scenario_id: String,
    pub observation: Observation,
    pub top_k: usize,
    pub include_distilled: bool,
    pub include_raw: bool,
    /// Overrides the retriever's threshold for this call.
    pub min_similarity: Option<f32>,
}

impl RetrievalRequest {
    /// A distilled-only request for `scenario_id` with `top_k = 5`.
    pub fn new(scenario_id: impl Into<String>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            observation: Observation::default(),
            top_k: 5,
            include_distilled: true,
            include_raw: false,
            min_similarity: None,
        }
    }

    pub fn observation(mut self, observation: Observation) -> Self {
        self.observation = observation;
        self
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn include_distilled(mut self, include: bool) -> Self {
        self.include_distilled = include;
        self
    }

    pub fn include_raw(mut self, include: bool) -> Self {
        self.include_raw = include;
        self
    }

    pub fn min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = Some(min_similarity);
        self
    }
}

/// Side-by-side search results used by evaluation tooling.
#[derive(Debug, Clone)]
pub struct ComparisonResults {
    pub query_text: String,
    pub distilled: Vec<RetrievalResult>,
    pub raw: Vec<RetrievalResult>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Query text
// ─────────────────────────────────────────────────────────────────────────────

/// Templated query text for `scenario_id`.
pub fn build_query_text(
    registry: &ScenarioRegistry,
    scenario_id: &str,
    observation: &Observation,
) -> String {
    match registry.resolve(scenario_id) {
        Some(ScenarioKind::LeverPuzzle) => "successful lever sequence puzzle solution".to_string(),
        Some(ScenarioKind::KeyFinder) => match observation.position {
            Some(pos) => format!("key search near position {} {} {}", pos.x, pos.y, pos.z),
            None => "successful key finding strategy".to_string(),
        },
        Some(ScenarioKind::Maze) => "successful maze navigation turn sequence".to_string(),
        None => format!("task {scenario_id} successful strategy"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HybridRetriever
// ─────────────────────────────────────────────────────────────────────────────

/// Similarity search with success backfill and empty-result fallback.
#[derive(Debug, Clone)]
pub struct HybridRetriever {
    registry: ScenarioRegistry,
    min_similarity: f32,
}

impl Default for HybridRetriever {
    fn default() -> Self {
        Self::new(ScenarioRegistry::default())
    }
}

impl HybridRetriever {
    pub fn new(registry: ScenarioRegistry) -> Self {
        Self {
            registry,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    pub fn query_text(&self, scenario_id: &str, observation: &Observation) -> String {
        build_query_text(&self.registry, scenario_id, observation)
    }

    /// Best-effort retrieval: any failure is logged and yields an empty list.
    pub async fn retrieve(&self, store: &VectorStore, request: &RetrievalRequest) -> Vec<RetrievalResult> {
        match self.try_retrieve(store, request).await {
            Ok(results) => results,
            Err(e) => {
                warn!(scenario = %request.scenario_id, error = %e, "hybrid retrieval failed; returning no memories");
                Vec::new()
            }
        }
    }

    /// Hybrid retrieval with failures surfaced to the caller.
    pub async fn try_retrieve(
        &self,
        store: &VectorStore,
        request: &RetrievalRequest,
    ) -> Result<Vec<RetrievalResult>> {
        let query = self.query_text(&request.scenario_id, &request.observation);
        let options = SearchOptions {
            scenario_id: Some(request.scenario_id.clone()),
            top_k: request.top_k,
            include_distilled: request.include_distilled,
            include_raw: request.include_raw,
            min_similarity: request.min_similarity.unwrap_or(self.min_similarity),
        };
        let mut results = store.search(&query, &options).await?;

        if !request.include_distilled {
            return Ok(results);
        }

        if results.is_empty() {
            let fallback: Vec<RetrievalResult> =
                recent_successes(store, &request.scenario_id, request.top_k)
                    .into_iter()
                    .map(|unit| scored(unit, FALLBACK_SCORE, MemorySource::DistilledFallback))
                    .collect();
            if !fallback.is_empty() {
                info!(scenario = %request.scenario_id, count = fallback.len(), "similarity search empty; using success fallback");
            }
            return Ok(fallback);
        }

        if !results.iter().any(|r| r.record.success()) {
            let seen: HashSet<String> = results.iter().map(|r| r.record.id()).collect();
            let refresh: Vec<RetrievalResult> =
                recent_successes(store, &request.scenario_id, request.top_k)
                    .into_iter()
                    .filter(|unit| !seen.contains(&unit.id.to_string()))
                    .map(|unit| scored(unit, REFRESH_SCORE, MemorySource::DistilledRefresh))
                    .collect();
            if !refresh.is_empty() {
                debug!(scenario = %request.scenario_id, count = refresh.len(), "backfilling known successes");
                results.extend(refresh);
                results.sort_by(|a, b| b.boosted_score.total_cmp(&a.boosted_score));
                results.truncate(request.top_k);
            }
        }
        Ok(results)
    }

    /// Distilled-only and raw-only results for the same query, without
    /// threshold or backfill.
    pub async fn retrieve_comparison(
        &self,
        store: &VectorStore,
        scenario_id: &str,
        observation: &Observation,
        top_k: usize,
    ) -> Result<ComparisonResults> {
        let query_text = self.query_text(scenario_id, observation);
        let base = SearchOptions {
            scenario_id: Some(scenario_id.to_string()),
            top_k,
            min_similarity: 0.0,
            ..SearchOptions::default()
        };
        let distilled = store
            .search(&query_text, &SearchOptions { include_raw: false, ..base.clone() })
            .await?;
        let raw = store
            .search(&query_text, &SearchOptions { include_distilled: false, ..base })
            .await?;
        Ok(ComparisonResults {
            query_text,
            distilled,
            raw,
        })
    }
}

/// Success-tagged distilled units of `scenario_id`, newest first.
fn recent_successes(store: &VectorStore, scenario_id: &str, limit: usize) -> Vec<MemoryUnit> {
    let mut successes: Vec<MemoryUnit> = store
        .distilled_for(scenario_id)
        .filter(|unit| unit.success)
        .cloned()
        .collect();
    successes.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    successes.truncate(limit);
    successes
}

fn scored(unit: MemoryUnit, score: f32, source: MemorySource) -> RetrievalResult {
    RetrievalResult {
        record: MemoryRecord::Distilled(unit),
        similarity: score,
        boosted_score: score,
        source,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use reverie_types::{MemoryKind, Position, RawEpisode};

    use crate::embedder::{EmbedError, Embedder, HashingEmbedder};

    /// Every text maps onto one of two orthogonal axes, so similarity is
    /// either 1 or 0.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            if text.contains("lever") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
            Err(EmbedError::Backend("offline".into()))
        }
    }

    fn unit(scenario: &str, text: &str, confidence: f32, success: bool, age_secs: i64) -> MemoryUnit {
        MemoryUnit::new(
            scenario,
            MemoryKind::SequenceOutcome,
            text,
            confidence,
            success,
            Utc::now() - Duration::seconds(age_secs),
        )
    }

    // ── query text ───────────────────────────────────────────────────────────

    #[test]
    fn query_text_follows_scenario_family() {
        let registry = ScenarioRegistry::default();
        let none = Observation::default();
        assert_eq!(
            build_query_text(&registry, "lever_puzzle_3", &none),
            "successful lever sequence puzzle solution"
        );
        assert_eq!(
            build_query_text(&registry, "key_finder_1", &Observation::at(Position::new(3.0, 64.0, -2.0))),
            "key search near position 3 64 -2"
        );
        assert_eq!(build_query_text(&registry, "key_unlock_2", &none), "successful key finding strategy");
        assert_eq!(
            build_query_text(&registry, "maze_v1", &none),
            "successful maze navigation turn sequence"
        );
        assert_eq!(
            build_query_text(&registry, "bridge_build", &none),
            "task bridge_build successful strategy"
        );
    }

    // ── hybrid chain ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn lever_unit_is_retrieved_with_boost() {
        let mut store = VectorStore::open_in_memory(Arc::new(HashingEmbedder::default()));
        store
            .add_distilled(unit(
                "lever_puzzle_3",
                "Successful lever sequence 2-3-1 at attempt 4",
                0.9,
                true,
                0,
            ))
            .await
            .unwrap();

        let results = HybridRetriever::default()
            .retrieve(&store, &RetrievalRequest::new("lever_puzzle_3").top_k(5))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].record.text().contains("2-3-1"));
        assert_eq!(results[0].source, MemorySource::Distilled);
        assert!((results[0].boosted_score - results[0].similarity * 0.97).abs() < 1e-6);
    }

    #[tokio::test]
    async fn weak_hits_are_backfilled_with_recent_successes() {
        let mut store = VectorStore::open_in_memory(Arc::new(AxisEmbedder));
        // Only the failure embeds near the lever query.
        store.add_distilled(unit("lever_puzzle_3", "Failed lever sequence 3-2-1", 0.55, false, 30)).await.unwrap();
        store.add_distilled(unit("lever_puzzle_3", "Solved with 2-3-1", 0.9, true, 20)).await.unwrap();
        store.add_distilled(unit("lever_puzzle_3", "Solved again with 2-3-1", 0.9, true, 10)).await.unwrap();

        let results = HybridRetriever::default()
            .retrieve(&store, &RetrievalRequest::new("lever_puzzle_3").top_k(2))
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| r.record.success()));
        assert_eq!(results[0].source, MemorySource::DistilledRefresh);
        assert_eq!(results[0].record.text(), "Solved again with 2-3-1");
        assert_eq!(results[0].similarity, 1.0);
        assert_eq!(results[0].boosted_score, 1.0);
    }

    #[tokio::test]
    async fn successful_hit_skips_backfill() {
        let mut store = VectorStore::open_in_memory(Arc::new(AxisEmbedder));
        store.add_distilled(unit("lever_puzzle_3", "Failed lever 3-2-1", 0.55, false, 10)).await.unwrap();
        store.add_distilled(unit("lever_puzzle_3", "Solved with 2-3-1", 0.9, true, 5)).await.unwrap();

        let request = RetrievalRequest::new("lever_puzzle_3").min_similarity(-1.0);
        let results = HybridRetriever::default().retrieve(&store, &request).await;
        // Both units are similarity hits, so nothing is backfilled.
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.source == MemorySource::Distilled));
        let ids: HashSet<String> = results.iter().map(|r| r.record.id()).collect();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn empty_search_falls_back_to_successes() {
        // Nothing mentions "lever", so every unit is orthogonal to the query.
        let mut store = VectorStore::open_in_memory(Arc::new(AxisEmbedder));
        store.add_distilled(unit("lever_puzzle_3", "Solved puzzle with 2-3-1", 0.9, true, 0)).await.unwrap();
        store.add_distilled(unit("lever_puzzle_3", "Pulled 3-2-1, nothing happened", 0.55, false, 0)).await.unwrap();
        let results = HybridRetriever::default()
            .retrieve(&store, &RetrievalRequest::new("lever_puzzle_3"))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].record.success());
        assert_eq!(results[0].source, MemorySource::DistilledFallback);
        assert_eq!(results[0].similarity, FALLBACK_SCORE);
        assert_eq!(results[0].boosted_score, FALLBACK_SCORE);
    }

    #[tokio::test]
    async fn raw_only_requests_get_no_backfill() {
        let mut store = VectorStore::open_in_memory(Arc::new(AxisEmbedder));
        store.add_distilled(unit("lever_puzzle_3", "Solved puzzle with 2-3-1", 0.9, true, 0)).await.unwrap();
        store
            .add_raw(RawEpisode {
                id: "run-1_1".into(),
                scenario_id: "lever_puzzle_3".into(),
                kind: ScenarioKind::LeverPuzzle,
                text: "Failed attempt".into(),
                success: false,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let request = RetrievalRequest::new("lever_puzzle_3")
            .include_distilled(false)
            .include_raw(true);
        assert!(HybridRetriever::default().retrieve(&store, &request).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_scenario_without_memories_is_empty() {
        let store = VectorStore::open_in_memory(Arc::new(HashingEmbedder::default()));
        let results = HybridRetriever::default()
            .retrieve(&store, &RetrievalRequest::new("bridge_build"))
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn failures_become_empty_results() {
        let store = VectorStore::open_in_memory(Arc::new(BrokenEmbedder));
        let retriever = HybridRetriever::default();
        let request = RetrievalRequest::new("lever_puzzle_3");
        assert!(retriever.try_retrieve(&store, &request).await.is_err());
        assert!(retriever.retrieve(&store, &request).await.is_empty());
    }

    // ── comparison ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn comparison_splits_collections() {
        let mut store = VectorStore::open_in_memory(Arc::new(HashingEmbedder::default()));
        store.add_distilled(unit("maze_v1", "Successful maze route", 0.85, true, 0)).await.unwrap();
        store
            .add_raw(RawEpisode {
                id: "run-1_1".into(),
                scenario_id: "maze_v1".into(),
                kind: ScenarioKind::Maze,
                text: "Successful maze navigation with 9 steps".into(),
                success: true,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        let comparison = HybridRetriever::default()
            .retrieve_comparison(&store, "maze_v1", &Observation::default(), 5)
            .await
            .unwrap();
        assert_eq!(comparison.query_text, "successful maze navigation turn sequence");
        assert_eq!(comparison.distilled.len(), 1);
        assert_eq!(comparison.raw.len(), 1);
        assert_eq!(comparison.raw[0].source, MemorySource::Raw);
    }
}

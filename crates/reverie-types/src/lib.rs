//! `reverie-types` – shared data model of the episodic memory engine.
//!
//! Every other crate in the workspace speaks in these types: attempt logs
//! come in from the decision loop, [`MemoryUnit`]s and [`RawEpisode`]s are
//! stored, and [`RetrievalResult`]s go back out.

pub mod scenario;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use scenario::{AttemptLog, Observation, Position, ScenarioDetails, ScenarioKind, ScenarioRegistry};

/// Clamp a confidence value into `[0.0, 1.0]`.  `NaN` becomes `0.0`.
pub fn clamp_confidence(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distilled memory
// ─────────────────────────────────────────────────────────────────────────────

/// Memory-unit type tag, one per scenario family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    SequenceOutcome,
    LocationOutcome,
    RouteOutcome,
}

impl MemoryKind {
    pub fn for_scenario(kind: ScenarioKind) -> Self {
        match kind {
            ScenarioKind::LeverPuzzle => MemoryKind::SequenceOutcome,
            ScenarioKind::KeyFinder => MemoryKind::LocationOutcome,
            ScenarioKind::Maze => MemoryKind::RouteOutcome,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::SequenceOutcome => "sequence_outcome",
            MemoryKind::LocationOutcome => "location_outcome",
            MemoryKind::RouteOutcome => "route_outcome",
        }
    }
}

/// Outcome of an attempt as written into route payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failed,
}

impl From<bool> for Outcome {
    fn from(success: bool) -> Self {
        if success { Outcome::Success } else { Outcome::Failed }
    }
}

/// Structured payload of a route-outcome unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RoutePayload {
    pub outcome: Outcome,
    pub step_count: u32,
    pub turn_sequence: Vec<Position>,
    /// Natural-language hint for the next attempt.
    pub rule: String,
}

/// A compact, scenario-specific summary of one attempt.
///
/// Units are never edited after ingestion; a correction is a new unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUnit {
    pub id: Uuid,
    pub scenario_id: String,
    pub kind: MemoryKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<RoutePayload>,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f32,
    pub success: bool,
    #[serde(default)]
    pub evidence_run_ids: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl MemoryUnit {
    /// Construct a unit with a fresh id; `confidence` is clamped.
    pub fn new(
        scenario_id: impl Into<String>,
        kind: MemoryKind,
        text: impl Into<String>,
        confidence: f32,
        success: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario_id: scenario_id.into(),
            kind,
            text: text.into(),
            payload: None,
            confidence: clamp_confidence(confidence),
            success,
            evidence_run_ids: BTreeSet::new(),
            timestamp,
        }
    }

    pub fn with_payload(mut self, payload: RoutePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Record `run_id` as evidence.  Empty ids are ignored.
    pub fn with_evidence(mut self, run_id: &str) -> Self {
        if !run_id.is_empty() {
            self.evidence_run_ids.insert(run_id.to_string());
        }
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw episodes
// ─────────────────────────────────────────────────────────────────────────────

/// An unreduced, terse factual record of one attempt, kept for the raw arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEpisode {
    /// `<runId>_<attemptIndex>`.
    pub id: String,
    pub scenario_id: String,
    pub kind: ScenarioKind,
    pub text: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Records and retrieval results
// ─────────────────────────────────────────────────────────────────────────────

/// Either kind of stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "collection", rename_all = "snake_case")]
pub enum MemoryRecord {
    Distilled(MemoryUnit),
    Raw(RawEpisode),
}

impl MemoryRecord {
    pub fn id(&self) -> String {
        match self {
            MemoryRecord::Distilled(u) => u.id.to_string(),
            MemoryRecord::Raw(e) => e.id.clone(),
        }
    }

    pub fn scenario_id(&self) -> &str {
        match self {
            MemoryRecord::Distilled(u) => &u.scenario_id,
            MemoryRecord::Raw(e) => &e.scenario_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            MemoryRecord::Distilled(u) => &u.text,
            MemoryRecord::Raw(e) => &e.text,
        }
    }

    pub fn success(&self) -> bool {
        match self {
            MemoryRecord::Distilled(u) => u.success,
            MemoryRecord::Raw(e) => e.success,
        }
    }

    /// Confidence of a distilled unit; raw episodes carry none.
    pub fn confidence(&self) -> Option<f32> {
        match self {
            MemoryRecord::Distilled(u) => Some(u.confidence),
            MemoryRecord::Raw(_) => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MemoryRecord::Distilled(u) => u.timestamp,
            MemoryRecord::Raw(e) => e.timestamp,
        }
    }
}

/// Where a retrieval result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    /// Similarity hit in the distilled collection.
    Distilled,
    /// Similarity hit in the raw collection.
    Raw,
    /// Known success backfilled next to weak similarity hits.
    DistilledRefresh,
    /// Known success returned because similarity search found nothing.
    DistilledFallback,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Distilled => "distilled",
            MemorySource::Raw => "raw",
            MemorySource::DistilledRefresh => "distilled_refresh",
            MemorySource::DistilledFallback => "distilled_fallback",
        }
    }
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored memory annotated with its scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub record: MemoryRecord,
    /// Raw cosine similarity to the query.
    pub similarity: f32,
    /// Confidence-weighted score used for ranking.
    pub boosted_score: f32,
    pub source: MemorySource,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory mode
// ─────────────────────────────────────────────────────────────────────────────

/// The experimental arm that feeds the decision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    #[default]
    Distilled,
    Raw,
}

impl MemoryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryMode::Distilled => "distilled",
            MemoryMode::Raw => "raw",
        }
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown memory mode: {0}")]
pub struct UnknownMemoryMode(pub String);

impl FromStr for MemoryMode {
    type Err = UnknownMemoryMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "distilled" => Ok(MemoryMode::Distilled),
            "raw" => Ok(MemoryMode::Raw),
            other => Err(UnknownMemoryMode(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_confidence_bounds_and_nan() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f32::NAN), 0.0);
        assert!((clamp_confidence(0.55) - 0.55).abs() < f32::EPSILON);
    }

    #[test]
    fn memory_unit_new_clamps_and_tracks_evidence() {
        let unit = MemoryUnit::new(
            "lever_puzzle_3",
            MemoryKind::SequenceOutcome,
            "Successful lever sequence 2-3-1 at attempt 4",
            1.4,
            true,
            Utc::now(),
        )
        .with_evidence("run-a")
        .with_evidence("run-a")
        .with_evidence("");
        assert_eq!(unit.confidence, 1.0);
        assert_eq!(unit.evidence_run_ids.len(), 1);
        assert!(unit.evidence_run_ids.contains("run-a"));
    }

    #[test]
    fn memory_unit_roundtrip_keeps_payload() {
        let unit = MemoryUnit::new("maze_v1", MemoryKind::RouteOutcome, "{}", 0.85, true, Utc::now())
            .with_payload(RoutePayload {
                outcome: Outcome::Success,
                step_count: 12,
                turn_sequence: vec![Position::new(1.0, 0.0, 2.0)],
                rule: "Reached goal after 12 steps".into(),
            });
        let json = serde_json::to_string(&unit).unwrap();
        assert!(json.contains("\"route_outcome\""));
        assert!(json.contains("\"success\""));
        let back: MemoryUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, unit);
    }

    #[test]
    fn memory_unit_without_payload_omits_field() {
        let unit = MemoryUnit::new("lever_puzzle_1", MemoryKind::SequenceOutcome, "x", 0.9, true, Utc::now());
        let json = serde_json::to_string(&unit).unwrap();
        assert!(!json.contains("payload"));
    }

    #[test]
    fn memory_record_accessors() {
        let raw = MemoryRecord::Raw(RawEpisode {
            id: "run-1_2".into(),
            scenario_id: "maze_v1".into(),
            kind: ScenarioKind::Maze,
            text: "Failed maze navigation with 7 steps".into(),
            success: false,
            timestamp: Utc::now(),
        });
        assert_eq!(raw.id(), "run-1_2");
        assert_eq!(raw.scenario_id(), "maze_v1");
        assert_eq!(raw.confidence(), None);
        assert!(!raw.success());
    }

    #[test]
    fn memory_source_serializes_snake_case() {
        let json = serde_json::to_string(&MemorySource::DistilledFallback).unwrap();
        assert_eq!(json, "\"distilled_fallback\"");
        assert_eq!(MemorySource::DistilledRefresh.to_string(), "distilled_refresh");
    }

    #[test]
    fn memory_mode_parses_and_displays() {
        assert_eq!("raw".parse::<MemoryMode>().unwrap(), MemoryMode::Raw);
        assert_eq!("distilled".parse::<MemoryMode>().unwrap(), MemoryMode::Distilled);
        let err = "hybrid".parse::<MemoryMode>().unwrap_err();
        assert!(err.to_string().contains("hybrid"));
        assert_eq!(MemoryMode::default().to_string(), "distilled");
    }

    #[test]
    fn memory_kind_follows_scenario() {
        assert_eq!(MemoryKind::for_scenario(ScenarioKind::LeverPuzzle), MemoryKind::SequenceOutcome);
        assert_eq!(MemoryKind::for_scenario(ScenarioKind::KeyFinder), MemoryKind::LocationOutcome);
        assert_eq!(MemoryKind::for_scenario(ScenarioKind::Maze), MemoryKind::RouteOutcome);
    }
}

//! Deterministic reducers: one per scenario kind, each turning an
//! [`AttemptLog`] into memory units without any outside help.
//!
//! | kind           | unit kind          | confidence (success / failure) |
//! |----------------|--------------------|--------------------------------|
//! | lever puzzle   | `sequence_outcome` | 0.9 / 0.55                     |
//! | key finder     | `location_outcome` | 0.9 / 0.45                     |
//! | maze           | `route_outcome`    | 0.85 / 0.55                    |
//!
//! The text helpers ([`sequence_text`], [`location_header`],
//! [`route_payload`]) are public because the generative path reuses them to
//! recompute every factual field from the log.

use std::collections::HashMap;

use reverie_types::{
    AttemptLog, MemoryKind, MemoryUnit, Outcome, Position, RoutePayload, ScenarioDetails,
    ScenarioKind,
};

// ─────────────────────────────────────────────────────────────────────────────
// Reducer trait
// ─────────────────────────────────────────────────────────────────────────────

/// A pure attempt-log → memory-unit transformation for one scenario kind.
pub trait Reducer: Send + Sync {
    fn kind(&self) -> ScenarioKind;

    /// Units for `log`.  A log whose details belong to another kind yields
    /// nothing.
    fn reduce(&self, log: &AttemptLog) -> Vec<MemoryUnit>;
}

fn unit_for(log: &AttemptLog, kind: MemoryKind, text: String, confidence: f32) -> MemoryUnit {
    MemoryUnit::new(&log.scenario_id, kind, text, confidence, log.success, log.timestamp)
        .with_evidence(&log.run_id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Lever puzzle
// ─────────────────────────────────────────────────────────────────────────────

/// `"Successful lever sequence 2-3-1 at attempt 4"`, or
/// `"Lever sequence: unknown"` when nothing was pulled.
pub fn sequence_text(success: bool, sequence: &[u32], attempt_index: u32) -> String {
    if sequence.is_empty() {
        return "Lever sequence: unknown".to_string();
    }
    let status = if success { "Successful" } else { "Failed" };
    format!("{status} lever sequence {} at attempt {attempt_index}", join_sequence(sequence))
}

pub(crate) fn join_sequence(sequence: &[u32]) -> String {
    sequence.iter().map(u32::to_string).collect::<Vec<_>>().join("-")
}

pub fn sequence_confidence(success: bool) -> f32 {
    if success { 0.9 } else { 0.55 }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceReducer;

impl Reducer for SequenceReducer {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::LeverPuzzle
    }

    fn reduce(&self, log: &AttemptLog) -> Vec<MemoryUnit> {
        let ScenarioDetails::LeverPuzzle { sequence } = &log.details else {
            return Vec::new();
        };
        vec![unit_for(
            log,
            MemoryKind::SequenceOutcome,
            sequence_text(log.success, sequence, log.attempt_index),
            sequence_confidence(log.success),
        )]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key finder
// ─────────────────────────────────────────────────────────────────────────────

/// Where the next search should focus: the key sighting, then the stated
/// target, then the last waypoint of the search path.
pub fn focus_position(
    key_pos: Option<Position>,
    target_pos: Option<Position>,
    search_path: &[Position],
) -> Option<Position> {
    key_pos.or(target_pos).or_else(|| search_path.last().copied())
}

fn describe(position: Option<Position>) -> String {
    position.map_or_else(|| "unknown position".to_string(), |p| p.to_string())
}

/// The factual first sentence of a location unit.
pub fn location_header(log: &AttemptLog) -> Option<String> {
    let ScenarioDetails::KeyFinder {
        target_pos,
        key_pos,
        search_path,
        actions,
        ..
    } = &log.details
    else {
        return None;
    };
    let status = if log.success { "Key found" } else { "Key not found" };
    let focus = focus_position(*key_pos, *target_pos, search_path);
    Some(format!(
        "{status} at {} after {} actions targeting {}.",
        describe(focus),
        actions.len(),
        describe(*target_pos),
    ))
}

fn location_advisory(success: bool, visited_cells: usize, waypoints: usize) -> String {
    if success {
        "Prioritize this area for future searches.".to_string()
    } else {
        format!(
            "Area swept ({visited_cells} cells, {waypoints} waypoints); deprioritize unless new evidence emerges."
        )
    }
}

pub fn location_confidence(success: bool) -> f32 {
    if success { 0.9 } else { 0.45 }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocationReducer;

impl Reducer for LocationReducer {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::KeyFinder
    }

    fn reduce(&self, log: &AttemptLog) -> Vec<MemoryUnit> {
        let ScenarioDetails::KeyFinder {
            search_path,
            visited_cells,
            ..
        } = &log.details
        else {
            return Vec::new();
        };
        let Some(header) = location_header(log) else {
            return Vec::new();
        };
        let advisory = location_advisory(log.success, visited_cells.len(), search_path.len());
        vec![unit_for(
            log,
            MemoryKind::LocationOutcome,
            format!("{header} {advisory}"),
            location_confidence(log.success),
        )]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Maze
// ─────────────────────────────────────────────────────────────────────────────

/// Route payload recomputed from the log, including the default `rule`.
pub fn route_payload(log: &AttemptLog) -> Option<RoutePayload> {
    let ScenarioDetails::Maze {
        step_count,
        turn_sequence,
        ..
    } = &log.details
    else {
        return None;
    };
    let step_count = step_count.unwrap_or(turn_sequence.len() as u32);
    // Origin points are placeholders the navigator writes before a turn is known.
    let route: Vec<Position> = turn_sequence.iter().copied().filter(|p| !p.is_origin()).collect();
    let serialized = (!route.is_empty())
        .then(|| serde_json::to_string(&route).ok())
        .flatten();

    let rule = match (log.success, serialized) {
        (true, Some(seq)) => format!("Successful route uses turn sequence {seq}"),
        (true, None) => format!("Reached goal after {step_count} steps"),
        (false, Some(seq)) => format!("Avoid turn sequence {seq} because it led to a dead end"),
        (false, None) => "Avoid repeating this attempt; it failed without a recorded route".to_string(),
    };
    Some(RoutePayload {
        outcome: Outcome::from(log.success),
        step_count,
        turn_sequence: turn_sequence.clone(),
        rule,
    })
}

/// Unit text of a route payload: the payload itself as JSON.
pub fn route_text(payload: &RoutePayload) -> String {
    serde_json::to_string(payload).unwrap_or_else(|_| payload.rule.clone())
}

pub fn route_confidence(success: bool) -> f32 {
    if success { 0.85 } else { 0.55 }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RouteReducer;

impl Reducer for RouteReducer {
    fn kind(&self) -> ScenarioKind {
        ScenarioKind::Maze
    }

    fn reduce(&self, log: &AttemptLog) -> Vec<MemoryUnit> {
        let Some(payload) = route_payload(log) else {
            return Vec::new();
        };
        let text = route_text(&payload);
        vec![unit_for(log, MemoryKind::RouteOutcome, text, route_confidence(log.success)).with_payload(payload)]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReducerRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Reducers keyed by the scenario kind they handle.
pub struct ReducerRegistry {
    reducers: HashMap<ScenarioKind, Box<dyn Reducer>>,
}

impl ReducerRegistry {
    pub fn empty() -> Self {
        Self {
            reducers: HashMap::new(),
        }
    }

    /// Install `reducer` for its kind, replacing any previous one.
    pub fn register(&mut self, reducer: Box<dyn Reducer>) {
        self.reducers.insert(reducer.kind(), reducer);
    }

    pub fn get(&self, kind: ScenarioKind) -> Option<&dyn Reducer> {
        self.reducers.get(&kind).map(|r| r.as_ref())
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(SequenceReducer));
        registry.register(Box::new(LocationReducer));
        registry.register(Box::new(RouteReducer));
        registry
    }
}

//! Scenario families and the attempt logs they produce.
//!
//! A scenario id such as `lever_puzzle_3` or `maze_v1` belongs to a
//! *family* (`lever_puzzle`, `maze`).  [`ScenarioRegistry`] maps families to
//! a [`ScenarioKind`] explicitly, so an id that is not registered resolves to
//! `None` instead of silently falling through a chain of prefix checks.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// ScenarioKind
// ─────────────────────────────────────────────────────────────────────────────

/// The scenario families the memory engine knows how to distil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    /// Discrete-sequence puzzles (pull levers in the right order).
    LeverPuzzle,
    /// Positional search (find a key somewhere in an area).
    KeyFinder,
    /// Structured-route navigation (walk a maze).
    Maze,
}

impl ScenarioKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::LeverPuzzle => "lever_puzzle",
            ScenarioKind::KeyFinder => "key_finder",
            ScenarioKind::Maze => "maze",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScenarioRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit family → kind table.
///
/// Resolution tries the full scenario id first and then strips one trailing
/// `_segment` at a time, so `lever_puzzle_3` resolves through the
/// `lever_puzzle` family and `maze_v1` through `maze`.
///
/// ```rust
/// use reverie_types::{ScenarioKind, ScenarioRegistry};
///
/// let registry = ScenarioRegistry::default();
/// assert_eq!(registry.resolve("lever_puzzle_3"), Some(ScenarioKind::LeverPuzzle));
/// assert_eq!(registry.resolve("maze_v1"), Some(ScenarioKind::Maze));
/// assert_eq!(registry.resolve("mazes"), None);
/// ```
#[derive(Debug, Clone)]
pub struct ScenarioRegistry {
    families: HashMap<String, ScenarioKind>,
}

impl ScenarioRegistry {
    /// A registry with no families registered.
    pub fn empty() -> Self {
        Self {
            families: HashMap::new(),
        }
    }

    /// Register `family` as belonging to `kind`.  Returns the kind the family
    /// was previously mapped to, if any.
    pub fn register(&mut self, family: impl Into<String>, kind: ScenarioKind) -> Option<ScenarioKind> {
        self.families.insert(family.into(), kind)
    }

    /// Resolve the kind of `scenario_id`, or `None` for an unknown family.
    pub fn resolve(&self, scenario_id: &str) -> Option<ScenarioKind> {
        let mut candidate = scenario_id;
        loop {
            if let Some(kind) = self.families.get(candidate) {
                return Some(*kind);
            }
            match candidate.rfind('_') {
                Some(idx) if idx > 0 => candidate = &candidate[..idx],
                _ => return None,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

impl Default for ScenarioRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("lever_puzzle", ScenarioKind::LeverPuzzle);
        registry.register("key_finder", ScenarioKind::KeyFinder);
        registry.register("key_unlock", ScenarioKind::KeyFinder);
        registry.register("maze", ScenarioKind::Maze);
        registry
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Position
// ─────────────────────────────────────────────────────────────────────────────

/// A block position in the task world.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// AttemptLog
// ─────────────────────────────────────────────────────────────────────────────

/// Scenario-specific facts recorded by the decision loop for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioDetails {
    LeverPuzzle {
        /// Lever indices in the order they were pulled.
        #[serde(default)]
        sequence: Vec<u32>,
    },
    KeyFinder {
        /// Where the agent was told (or guessed) the key would be.
        #[serde(default)]
        target_pos: Option<Position>,
        /// Where the key was actually seen, if it was.
        #[serde(default)]
        key_pos: Option<Position>,
        #[serde(default)]
        search_path: Vec<Position>,
        #[serde(default)]
        visited_cells: Vec<Position>,
        #[serde(default)]
        actions: Vec<String>,
    },
    Maze {
        #[serde(default)]
        step_count: Option<u32>,
        #[serde(default)]
        turn_sequence: Vec<Position>,
        #[serde(default)]
        actions: Vec<String>,
    },
}

impl ScenarioDetails {
    pub fn kind(&self) -> ScenarioKind {
        match self {
            ScenarioDetails::LeverPuzzle { .. } => ScenarioKind::LeverPuzzle,
            ScenarioDetails::KeyFinder { .. } => ScenarioKind::KeyFinder,
            ScenarioDetails::Maze { .. } => ScenarioKind::Maze,
        }
    }
}

/// The structured record of one task attempt, produced by the external
/// decision loop and consumed read-only by distillation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptLog {
    pub scenario_id: String,
    pub run_id: String,
    pub attempt_index: u32,
    pub success: bool,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub details: ScenarioDetails,
}

impl AttemptLog {
    pub fn new(
        scenario_id: impl Into<String>,
        run_id: impl Into<String>,
        attempt_index: u32,
        success: bool,
        details: ScenarioDetails,
    ) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            run_id: run_id.into(),
            attempt_index,
            success,
            timestamp: Utc::now(),
            details,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation
// ─────────────────────────────────────────────────────────────────────────────

/// What the decision loop currently sees; only used to shape query text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub position: Option<Position>,
}

impl Observation {
    pub fn at(position: Position) -> Self {
        Self {
            position: Some(position),
        }
    }
}

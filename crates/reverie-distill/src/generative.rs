//! Generative distillation.
//!
//! A [`Generator`] (in practice a local Ollama model) is asked to phrase the
//! memory unit for an attempt.  The reply must match [`GeneratedUnit`]; its
//! JSON schema is sent along with the prompt.  Whatever the model says, the
//! facts stay the log's:
//!
//! | unit kind          | taken from the model                | recomputed from the log           |
//! |--------------------|-------------------------------------|-----------------------------------|
//! | `sequence_outcome` | confidence (bounded)                | text, outcome                     |
//! | `location_outcome` | advisory sentence, confidence (bounded) | header (status, focus, actions, target) |
//! | `route_outcome`    | `rule`, confidence (bounded)        | outcome, step count, turn sequence |
//!
//! "Bounded" means the model may only raise the confidence of a success and
//! only lower the confidence of a failure, relative to the template value.

use async_trait::async_trait;
use reverie_types::{AttemptLog, MemoryKind, MemoryUnit, RoutePayload, clamp_confidence};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::reducers::{location_header, route_text};

/// Sampling temperature used for distillation prompts.
pub const DISTILL_TEMPERATURE: f32 = 0.1;

// ─────────────────────────────────────────────────────────────────────────────
// Generator seam
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum GenerationError {
    /// The generation backend could not be reached or returned an error status.
    #[error("generation backend unavailable: {0}")]
    Unavailable(String),
    /// The backend answered but the envelope was not what we expected.
    #[error("unexpected generation response: {0}")]
    BadResponse(String),
}

/// Per-call options passed through to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    /// JSON schema the reply must satisfy, if the backend supports
    /// constrained output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<serde_json::Value>,
}

impl GenerationOptions {
    /// Options for distillation: low temperature and the [`GeneratedUnit`]
    /// schema.
    pub fn for_distillation() -> Self {
        Self {
            temperature: DISTILL_TEMPERATURE,
            format: serde_json::to_value(schema_for!(GeneratedUnit)).ok(),
        }
    }
}

/// Text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String, GenerationError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply schema
// ─────────────────────────────────────────────────────────────────────────────

/// What the model is asked to return.
#[derive(Debug, Clone, PartialEq, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeneratedUnit {
    SequenceOutcome {
        text: String,
        #[serde(default)]
        confidence: Option<f32>,
    },
    LocationOutcome {
        /// One advisory sentence for the next search.
        text: String,
        #[serde(default)]
        confidence: Option<f32>,
    },
    RouteOutcome {
        payload: RoutePayload,
        #[serde(default)]
        confidence: Option<f32>,
    },
}

impl GeneratedUnit {
    pub fn kind(&self) -> MemoryKind {
        match self {
            GeneratedUnit::SequenceOutcome { .. } => MemoryKind::SequenceOutcome,
            GeneratedUnit::LocationOutcome { .. } => MemoryKind::LocationOutcome,
            GeneratedUnit::RouteOutcome { .. } => MemoryKind::RouteOutcome,
        }
    }

    fn confidence(&self) -> Option<f32> {
        match self {
            GeneratedUnit::SequenceOutcome { confidence, .. }
            | GeneratedUnit::LocationOutcome { confidence, .. }
            | GeneratedUnit::RouteOutcome { confidence, .. } => *confidence,
        }
    }
}

/// Parse a model reply.  The whole reply is tried first, then the span from
/// the first `{` to the last `}`.
pub fn parse_generated(reply: &str) -> Option<GeneratedUnit> {
    let trimmed = reply.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = serde_json::from_str::<GeneratedUnit>(trimmed).ok().or_else(|| {
        let start = trimmed.find('{')?;
        let end = trimmed.rfind('}')?;
        (end > start)
            .then(|| serde_json::from_str::<GeneratedUnit>(&trimmed[start..=end]).ok())
            .flatten()
    })?;
    match &parsed {
        GeneratedUnit::SequenceOutcome { text, .. } | GeneratedUnit::LocationOutcome { text, .. }
            if text.trim().is_empty() =>
        {
            None
        }
        _ => Some(parsed),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// Build the distillation prompt for `log`, asking for a unit of `kind`.
pub fn build_prompt(kind: MemoryKind, log: &AttemptLog) -> String {
    let (task, shape) = match kind {
        MemoryKind::SequenceOutcome => (
            "a lever puzzle attempt",
            r#"{ "type": "sequence_outcome", "text": "<string>", "confidence": <number 0..1> }"#,
        ),
        MemoryKind::LocationOutcome => (
            "a key-finding attempt",
            r#"{ "type": "location_outcome", "text": "<one advisory sentence>", "confidence": <number 0..1> }"#,
        ),
        MemoryKind::RouteOutcome => (
            "a maze navigation attempt",
            r#"{ "type": "route_outcome", "payload": { "outcome": "success|failed", "step_count": <number>, "turn_sequence": [{"x":..,"y":..,"z":..}], "rule": "<string>" }, "confidence": <number 0..1> }"#,
        ),
    };
    let attempt = serde_json::to_string(log).unwrap_or_else(|_| format!("{log:?}"));
    [
        format!("You are distilling {task} into a single memory unit for later retrieval."),
        "Return only valid JSON. No extra text.".to_string(),
        "Schema:".to_string(),
        shape.to_string(),
        "Attempt:".to_string(),
        attempt,
    ]
    .join("\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Grounding
// ─────────────────────────────────────────────────────────────────────────────

fn bounded_confidence(incoming: Option<f32>, template: f32, success: bool) -> f32 {
    let incoming = incoming.map(clamp_confidence).unwrap_or(template);
    if success {
        incoming.max(template)
    } else {
        incoming.min(template)
    }
}

/// Merge a model reply into the deterministic `template` unit for `log`.
///
/// Returns `None` when the reply is for a different unit kind.
pub fn ground(generated: GeneratedUnit, template: &MemoryUnit, log: &AttemptLog) -> Option<MemoryUnit> {
    if generated.kind() != template.kind {
        debug!(expected = template.kind.as_str(), got = generated.kind().as_str(), "generated unit kind mismatch");
        return None;
    }
    let mut unit = template.clone();
    unit.confidence = bounded_confidence(generated.confidence(), template.confidence, log.success);

    match generated {
        GeneratedUnit::SequenceOutcome { .. } => {}
        GeneratedUnit::LocationOutcome { text, .. } => {
            let header = location_header(log)?;
            unit.text = format!("{header} {}", text.trim());
        }
        GeneratedUnit::RouteOutcome { payload, .. } => {
            let mut grounded = template.payload.clone()?;
            if !payload.rule.trim().is_empty() {
                grounded.rule = payload.rule.trim().to_string();
            }
            unit.text = route_text(&grounded);
            unit.payload = Some(grounded);
        }
    }
    Some(unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reducers::{LocationReducer, Reducer, RouteReducer, SequenceReducer};
    use reverie_types::{Outcome, Position, ScenarioDetails};

    fn lever_log(success: bool) -> AttemptLog {
        AttemptLog::new(
            "lever_puzzle_3",
            "run-1",
            4,
            success,
            ScenarioDetails::LeverPuzzle { sequence: vec![2, 3, 1] },
        )
    }

    // ── parsing ──────────────────────────────────────────────────────────────

    #[test]
    fn parses_clean_reply() {
        let reply = r#"{"type":"sequence_outcome","text":"Pull 2, 3 then 1","confidence":0.8}"#;
        assert_eq!(
            parse_generated(reply),
            Some(GeneratedUnit::SequenceOutcome {
                text: "Pull 2, 3 then 1".into(),
                confidence: Some(0.8)
            })
        );
    }

    #[test]
    fn parses_reply_wrapped_in_prose() {
        let reply = "Sure! Here it is:\n```json\n{\"type\":\"location_outcome\",\"text\":\"Search the east wing.\"}\n```";
        let parsed = parse_generated(reply).unwrap();
        assert_eq!(parsed.kind(), MemoryKind::LocationOutcome);
    }

    #[test]
    fn rejects_malformed_or_incomplete_replies() {
        assert_eq!(parse_generated(""), None);
        assert_eq!(parse_generated("no json here"), None);
        assert_eq!(parse_generated(r#"{"type":"sequence_outcome"}"#), None);
        assert_eq!(parse_generated(r#"{"type":"unknown","text":"x"}"#), None);
        assert_eq!(parse_generated(r#"{"type":"sequence_outcome","text":"   "}"#), None);
        assert_eq!(parse_generated(r#"{"type":"route_outcome","payload":{"rule":"x"}}"#), None);
    }

    #[test]
    fn distillation_options_carry_schema() {
        let options = GenerationOptions::for_distillation();
        assert!((options.temperature - 0.1).abs() < 1e-6);
        let schema = options.format.unwrap().to_string();
        assert!(schema.contains("sequence_outcome"));
        assert!(schema.contains("route_outcome"));
    }

    #[test]
    fn prompt_names_schema_and_attempt() {
        let prompt = build_prompt(MemoryKind::SequenceOutcome, &lever_log(true));
        assert!(prompt.contains("lever puzzle"));
        assert!(prompt.contains("\"sequence_outcome\""));
        assert!(prompt.contains("lever_puzzle_3"));
    }

    // ── grounding ────────────────────────────────────────────────────────────

    #[test]
    fn sequence_text_and_confidence_stay_grounded() {
        let log = lever_log(true);
        let template = &SequenceReducer.reduce(&log)[0];
        let generated = GeneratedUnit::SequenceOutcome {
            text: "Failed lever sequence 1-1-1".into(),
            confidence: Some(0.3),
        };
        let unit = ground(generated, template, &log).unwrap();
        assert_eq!(unit.text, "Successful lever sequence 2-3-1 at attempt 4");
        assert!((unit.confidence - 0.9).abs() < 1e-6);
        assert!(unit.success);

        let log = lever_log(false);
        let template = &SequenceReducer.reduce(&log)[0];
        let generated = GeneratedUnit::SequenceOutcome {
            text: "whatever".into(),
            confidence: Some(0.99),
        };
        let unit = ground(generated, template, &log).unwrap();
        assert!((unit.confidence - 0.55).abs() < 1e-6);
    }

    #[test]
    fn location_keeps_header_and_takes_advisory() {
        let log = AttemptLog::new(
            "key_finder_1",
            "run-1",
            1,
            true,
            ScenarioDetails::KeyFinder {
                target_pos: None,
                key_pos: Some(Position::new(2.0, 64.0, 2.0)),
                search_path: vec![],
                visited_cells: vec![],
                actions: vec!["move".into()],
            },
        );
        let template = &LocationReducer.reduce(&log)[0];
        let generated = GeneratedUnit::LocationOutcome {
            text: " Check behind the chest first. ".into(),
            confidence: None,
        };
        let unit = ground(generated, template, &log).unwrap();
        assert_eq!(
            unit.text,
            "Key found at (2,64,2) after 1 actions targeting unknown position. Check behind the chest first."
        );
        assert!((unit.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn route_keeps_facts_and_takes_rule() {
        let log = AttemptLog::new(
            "maze_v1",
            "run-1",
            1,
            false,
            ScenarioDetails::Maze {
                step_count: Some(6),
                turn_sequence: vec![Position::new(1.0, 64.0, 0.0)],
                actions: vec![],
            },
        );
        let template = &RouteReducer.reduce(&log)[0];
        let generated = GeneratedUnit::RouteOutcome {
            payload: RoutePayload {
                outcome: Outcome::Success,
                step_count: 99,
                turn_sequence: vec![],
                rule: "Turn left at the first junction instead".into(),
            },
            confidence: Some(0.7),
        };
        let unit = ground(generated, template, &log).unwrap();
        let payload = unit.payload.as_ref().unwrap();
        assert_eq!(payload.outcome, Outcome::Failed);
        assert_eq!(payload.step_count, 6);
        assert_eq!(payload.turn_sequence.len(), 1);
        assert_eq!(payload.rule, "Turn left at the first junction instead");
        assert!(unit.text.contains("Turn left at the first junction instead"));
        assert!((unit.confidence - 0.55).abs() < 1e-6);
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let log = lever_log(true);
        let template = &SequenceReducer.reduce(&log)[0];
        let generated = GeneratedUnit::LocationOutcome {
            text: "Look around".into(),
            confidence: Some(0.9),
        };
        assert!(ground(generated, template, &log).is_none());
    }
}

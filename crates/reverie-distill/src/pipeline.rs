//! The distillation pipeline: attempt log in, memory units out.
//!
//! Dispatch is by scenario kind, resolved through the
//! [`ScenarioRegistry`]; the deterministic reducer always runs and, when the
//! generative style is selected, the model's reply is grounded onto its
//! output.  Failures never escape: an unknown scenario, a mismatched log or a
//! broken generator all degrade to the template result or to no units at all.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reverie_types::{AttemptLog, MemoryUnit, RawEpisode, ScenarioRegistry};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::generative::{GenerationOptions, Generator, build_prompt, ground, parse_generated};
use crate::raw::raw_episode;
use crate::reducers::ReducerRegistry;

// ─────────────────────────────────────────────────────────────────────────────
// DistillStyle
// ─────────────────────────────────────────────────────────────────────────────

/// How attempts are turned into memory units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistillStyle {
    /// Store nothing distilled.
    None,
    /// Deterministic reducers only.
    #[default]
    Template,
    /// Model-phrased units grounded on the deterministic reducers.
    Generative,
}

impl DistillStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistillStyle::None => "none",
            DistillStyle::Template => "template",
            DistillStyle::Generative => "generative",
        }
    }
}

impl fmt::Display for DistillStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown distill style: {0}")]
pub struct UnknownDistillStyle(pub String);

impl FromStr for DistillStyle {
    type Err = UnknownDistillStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DistillStyle::None),
            "template" => Ok(DistillStyle::Template),
            "generative" | "ollama" => Ok(DistillStyle::Generative),
            other => Err(UnknownDistillStyle(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distiller
// ─────────────────────────────────────────────────────────────────────────────

pub struct Distiller {
    scenarios: ScenarioRegistry,
    reducers: ReducerRegistry,
    generator: Option<Arc<dyn Generator>>,
    generation: GenerationOptions,
}

impl Default for Distiller {
    fn default() -> Self {
        Self::new(ScenarioRegistry::default())
    }
}

impl Distiller {
    pub fn new(scenarios: ScenarioRegistry) -> Self {
        Self {
            scenarios,
            reducers: ReducerRegistry::default(),
            generator: None,
            generation: GenerationOptions::for_distillation(),
        }
    }

    pub fn with_reducers(mut self, reducers: ReducerRegistry) -> Self {
        self.reducers = reducers;
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn scenarios(&self) -> &ScenarioRegistry {
        &self.scenarios
    }

    /// The raw-arm record of `log`.
    pub fn raw_episode(&self, log: &AttemptLog) -> RawEpisode {
        raw_episode(log)
    }

    /// Deterministic units for `log`, or none for an unknown or mismatched
    /// scenario.
    pub fn distill_template(&self, log: &AttemptLog) -> Vec<MemoryUnit> {
        let Some(kind) = self.scenarios.resolve(&log.scenario_id) else {
            debug!(scenario = %log.scenario_id, "no scenario family registered; nothing to distill");
            return Vec::new();
        };
        if log.details.kind() != kind {
            warn!(
                scenario = %log.scenario_id,
                expected = %kind,
                got = %log.details.kind(),
                "attempt details do not match scenario family; skipping"
            );
            return Vec::new();
        }
        match self.reducers.get(kind) {
            Some(reducer) => reducer.reduce(log),
            None => {
                debug!(kind = %kind, "no reducer registered");
                Vec::new()
            }
        }
    }

    /// Units for `log` in the requested `style`.
    pub async fn distill(&self, log: &AttemptLog, style: DistillStyle) -> Vec<MemoryUnit> {
        if style == DistillStyle::None {
            return Vec::new();
        }
        let templates = self.distill_template(log);
        if style == DistillStyle::Template || templates.is_empty() {
            return templates;
        }
        let Some(generator) = &self.generator else {
            warn!(scenario = %log.scenario_id, "generative distillation requested without a generator; using templates");
            return templates;
        };

        let mut units = Vec::with_capacity(templates.len());
        for template in templates {
            let unit = match self.generate_one(generator.as_ref(), &template, log).await {
                Some(unit) => unit,
                None => template,
            };
            units.push(unit);
        }
        units
    }

    async fn generate_one(&self, generator: &dyn Generator, template: &MemoryUnit, log: &AttemptLog) -> Option<MemoryUnit> {
        let prompt = build_prompt(template.kind, log);
        let reply = match generator.generate(&prompt, &self.generation).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(scenario = %log.scenario_id, error = %e, "generative distillation failed; using template");
                return None;
            }
        };
        let Some(generated) = parse_generated(&reply) else {
            warn!(scenario = %log.scenario_id, reply_len = reply.len(), "generated unit did not match schema; using template");
            return None;
        };
        let grounded = ground(generated, template, log);
        if grounded.is_none() {
            warn!(scenario = %log.scenario_id, "generated unit could not be grounded; using template");
        }
        grounded
    }
}

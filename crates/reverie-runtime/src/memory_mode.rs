//! Memory-mode profiles: which collections feed retrieval and how attempts
//! are distilled for each experimental arm.
//!
//! | name                                        | mode        | retrieves  | distillation |
//! |---------------------------------------------|-------------|------------|--------------|
//! | `raw`, `rag`                                | `raw`       | raw        | none         |
//! | `distilled`                                 | `distilled` | distilled  | template     |
//! | `distilled-generative`, `distilled-ollama`  | `distilled` | distilled  | generative   |
//!
//! Unknown names resolve to `distilled`.

use std::fmt;

use reverie_distill::DistillStyle;
use reverie_types::MemoryMode;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryProfile {
    pub name: &'static str,
    pub mode: MemoryMode,
    pub include_raw: bool,
    pub include_distilled: bool,
    pub distill_style: DistillStyle,
    /// Label used to tag datasets produced under this profile.
    pub dataset: &'static str,
}

impl MemoryProfile {
    pub const RAW: MemoryProfile = MemoryProfile {
        name: "raw",
        mode: MemoryMode::Raw,
        include_raw: true,
        include_distilled: false,
        distill_style: DistillStyle::None,
        dataset: "rag_raw",
    };

    pub const DISTILLED: MemoryProfile = MemoryProfile {
        name: "distilled",
        mode: MemoryMode::Distilled,
        include_raw: false,
        include_distilled: true,
        distill_style: DistillStyle::Template,
        dataset: "distilled_template",
    };

    pub const DISTILLED_GENERATIVE: MemoryProfile = MemoryProfile {
        name: "distilled-generative",
        mode: MemoryMode::Distilled,
        include_raw: false,
        include_distilled: true,
        distill_style: DistillStyle::Generative,
        dataset: "distilled_generative",
    };

    /// Look a profile up by name, falling back to [`MemoryProfile::DISTILLED`].
    pub fn resolve(name: &str) -> MemoryProfile {
        match name.trim().to_ascii_lowercase().as_str() {
            "raw" | "rag" => Self::RAW,
            "distilled" => Self::DISTILLED,
            "distilled-generative" | "distilled-ollama" => Self::DISTILLED_GENERATIVE,
            other => {
                warn!(profile = other, "unknown memory profile; using distilled");
                Self::DISTILLED
            }
        }
    }

    pub fn all() -> [MemoryProfile; 3] {
        [Self::RAW, Self::DISTILLED, Self::DISTILLED_GENERATIVE]
    }
}

impl Default for MemoryProfile {
    fn default() -> Self {
        Self::DISTILLED
    }
}

impl fmt::Display for MemoryProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

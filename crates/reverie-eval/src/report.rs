//! Markdown performance report.

use std::fmt::Write;

use chrono::{DateTime, Utc};
use reverie_memory::StoreStats;
use serde::Serialize;

use crate::comparison::{ModeSummary, PerformanceComparison};

/// Relative gains of the distilled arm over the raw arm, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyFindings {
    pub attempt_reduction_pct: f64,
    pub duration_reduction_pct: f64,
    pub storage_reduction_pct: f64,
    /// Raw store size over distilled store size.
    pub compression_ratio: f64,
}

impl KeyFindings {
    /// `None` unless both arms have runs and every denominator is non-zero.
    pub fn compute(comparison: &PerformanceComparison) -> Option<Self> {
        let (d, r) = (&comparison.distilled, &comparison.raw);
        if !comparison.is_complete()
            || r.avg_attempts == 0.0
            || r.avg_duration_ms == 0.0
            || r.avg_store_size == 0.0
            || d.avg_store_size == 0.0
        {
            return None;
        }
        let reduction = |raw: f64, distilled: f64| (raw - distilled) / raw * 100.0;
        Some(Self {
            attempt_reduction_pct: reduction(r.avg_attempts, d.avg_attempts),
            duration_reduction_pct: reduction(r.avg_duration_ms, d.avg_duration_ms),
            storage_reduction_pct: reduction(r.avg_store_size, d.avg_store_size),
            compression_ratio: r.avg_store_size / d.avg_store_size,
        })
    }
}

fn kib(bytes: f64) -> String {
    format!("{:.2} KB", bytes / 1024.0)
}

fn mode_section(md: &mut String, title: &str, mode: &ModeSummary) {
    let _ = writeln!(md, "### {title}\n");
    let _ = writeln!(md, "- **Runs**: {}", mode.runs);
    let _ = writeln!(md, "- **Avg Attempts to Solve**: {:.2}", mode.avg_attempts);
    let _ = writeln!(md, "- **Avg Duration**: {:.2} seconds", mode.avg_duration_ms / 1000.0);
    let _ = writeln!(md, "- **Avg Store Size**: {}", kib(mode.avg_store_size));
    let _ = writeln!(md, "- **Retrieval Latency**: {:.2} ms", mode.avg_latency_ms);
    let _ = writeln!(md, "- **Success Rate**: {:.1}%\n", mode.success_rate * 100.0);
}

/// Render the comparison and current store status as Markdown.
pub fn render_report(comparison: &PerformanceComparison, stats: &StoreStats, generated_at: DateTime<Utc>) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Memory Performance Report\n");
    let _ = writeln!(md, "## Scenario: {}\n", comparison.scenario_id);
    let _ = writeln!(md, "Generated: {}\n", generated_at.to_rfc3339());

    let _ = writeln!(md, "## Current Vector Store Status\n");
    let _ = writeln!(md, "| Metric | Value |");
    let _ = writeln!(md, "|--------|-------|");
    let _ = writeln!(md, "| Distilled Memories | {} |", stats.distilled_count);
    let _ = writeln!(md, "| Raw Episodes | {} |", stats.raw_count);
    let _ = writeln!(md, "| Total Entries | {} |", stats.total_count);
    let _ = writeln!(md, "| Store Size | {} |\n", kib(stats.store_size_bytes as f64));

    let _ = writeln!(md, "## Performance Comparison\n");
    mode_section(&mut md, "Distilled Mode", &comparison.distilled);
    mode_section(&mut md, "Raw Mode", &comparison.raw);

    if let Some(findings) = KeyFindings::compute(comparison) {
        let _ = writeln!(md, "## Key Findings\n");
        let _ = writeln!(md, "- **Task Efficiency**: {:.1}% fewer attempts (distilled)", findings.attempt_reduction_pct);
        let _ = writeln!(md, "- **Time to Solve**: {:.1}% faster completion (distilled)", findings.duration_reduction_pct);
        let _ = writeln!(md, "- **Storage Reduction**: {:.1}%", findings.storage_reduction_pct);
        let _ = writeln!(md, "- **Compression Ratio**: {:.2}x", findings.compression_ratio);
        let _ = writeln!(
            md,
            "- **Success Rate**: distilled {:.0}%, raw {:.0}%",
            comparison.distilled.success_rate * 100.0,
            comparison.raw.success_rate * 100.0
        );
    }
    md
}

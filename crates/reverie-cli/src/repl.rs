//! REPL – Read-Eval-Print Loop for the Reverie interactive shell.
//!
//! Supported slash-commands:
//!   /help                          – show this list
//!   /settings                      – interactively edit `~/.reverie/config.toml`
//!   /stats                         – store counts and size
//!   /recall <scenario> [x y z]     – hybrid retrieval under the active profile
//!   /contrast <scenario> [x y z]   – distilled-only vs raw-only search
//!   /ingest <file.json>            – ingest attempt logs, one run per run id
//!   /compare <scenario>            – distilled vs raw over saved runs
//!   /report <scenario> [out.md]    – Markdown performance report
//!   /export <scenario> <file.json> – write the scenario's distilled memories
//!   /import <file.json>            – re-ingest exported memories
//!   /clear                         – destroy every stored memory
//!   /quit | /exit                  – exit the CLI

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use chrono::Utc;
use colored::Colorize;
use reverie_eval::{KeyFindings, ModeSummary, TaskOutcome, compare_performance, render_report};
use reverie_memory::{HybridRetriever, RetrievalRequest};
use reverie_runtime::session::RECALL_TOP_K;
use reverie_runtime::{MemoryEngine, MemoryProfile, MemorySession, SessionError};
use reverie_types::{AttemptLog, Observation, Position, RetrievalResult, ScenarioDetails};

use crate::config::{self, Config, EmbedderBackend};
use crate::prompt_line;

/// Everything the shell operates on.
pub struct App {
    cfg: Config,
    profile: MemoryProfile,
    engine: MemoryEngine,
    rt: tokio::runtime::Runtime,
}

impl App {
    pub fn new(cfg: Config, profile: MemoryProfile, engine: MemoryEngine, rt: tokio::runtime::Runtime) -> Self {
        Self {
            cfg,
            profile,
            engine,
            rt,
        }
    }
}

/// Entry point for the interactive REPL.  Returns on `/quit` or EOF.
pub fn run(mut app: App) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", "reverie>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else {
            continue;
        };
        let args: Vec<&str> = words.collect();

        match cmd {
            "/help" => cmd_help(),
            "/settings" => cmd_settings(&mut app),
            "/stats" => cmd_stats(&app),
            "/recall" => cmd_recall(&app, &args),
            "/contrast" => cmd_contrast(&app, &args),
            "/ingest" => cmd_ingest(&mut app, &args),
            "/compare" => cmd_compare(&app, &args),
            "/report" => cmd_report(&app, &args),
            "/export" => cmd_export(&app, &args),
            "/import" => cmd_import(&mut app, &args),
            "/clear" => cmd_clear(&mut app),
            "/quit" | "/exit" => {
                println!("{}", "Goodbye.".green());
                break;
            }
            other => {
                println!(
                    "{} '{}'. Type {} for available commands.",
                    "Unknown command:".red(),
                    other.yellow(),
                    "/help".bold()
                );
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Reverie Commands".bold().underline());
    println!("  {}                        – edit ~/.reverie/config.toml", "/settings".bold().cyan());
    println!("  {}                           – store counts and size", "/stats".bold().cyan());
    println!("  {}   – retrieve memories", "/recall <scenario> [x y z]".bold().cyan());
    println!("  {} – distilled-only vs raw-only search", "/contrast <scenario> [x y z]".bold().cyan());
    println!("  {}          – ingest attempt logs", "/ingest <file.json>".bold().cyan());
    println!("  {}          – distilled vs raw over saved runs", "/compare <scenario>".bold().cyan());
    println!("  {}  – Markdown performance report", "/report <scenario> [out.md]".bold().cyan());
    println!("  {} – export distilled memories", "/export <scenario> <file>".bold().cyan());
    println!("  {}          – import exported memories", "/import <file.json>".bold().cyan());
    println!("  {}                           – destroy every stored memory", "/clear".bold().cyan());
    println!("  {}                     – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}

fn cmd_settings(app: &mut App) {
    let mut cfg = app.cfg.clone();

    println!("{}", "Settings Editor".bold().underline());
    println!("  Press Enter to keep the current value.");

    cfg.profile = MemoryProfile::resolve(&prompt_line(
        &format!("  Profile (raw / distilled / distilled-generative) [{}]: ", cfg.profile),
        &cfg.profile,
    ))
    .name
    .to_string();

    let embedder = prompt_line(&format!("  Embedder (hashing / ollama) [{}]: ", cfg.embedder), &cfg.embedder.to_string());
    cfg.embedder = EmbedderBackend::parse(&embedder).unwrap_or_else(|| {
        println!("  {} '{}' is not a known embedder, keeping {}", "Warning:".yellow(), embedder, cfg.embedder);
        cfg.embedder
    });

    cfg.ollama_url = prompt_line(&format!("  Ollama URL [{}]: ", cfg.ollama_url), &cfg.ollama_url);
    cfg.embedding_model = prompt_line(&format!("  Embedding model [{}]: ", cfg.embedding_model), &cfg.embedding_model);
    cfg.generation_model = prompt_line(
        &format!("  Generation model [{}]: ", cfg.generation_model),
        &cfg.generation_model,
    );
    cfg.min_similarity = prompt_f32(&format!("  Min similarity [{}]: ", cfg.min_similarity), cfg.min_similarity);
    cfg.store_path = prompt_line(
        &format!("  Store file [{}]: ", cfg.store_path.display()),
        &cfg.store_path.to_string_lossy(),
    )
    .into();
    cfg.runs_dir = prompt_line(
        &format!("  Runs directory [{}]: ", cfg.runs_dir.display()),
        &cfg.runs_dir.to_string_lossy(),
    )
    .into();

    if let Err(e) = config::save(&cfg) {
        println!("{}: {}", "Error saving config".red(), e);
        return;
    }
    println!(
        "{} {}",
        "✓ Settings saved to".green(),
        config::config_path().display().to_string().bold()
    );

    let needs_reopen = cfg.store_path != app.cfg.store_path
        || cfg.embedder != app.cfg.embedder
        || cfg.ollama_url != app.cfg.ollama_url
        || cfg.embedding_model != app.cfg.embedding_model
        || cfg.generation_model != app.cfg.generation_model
        || cfg.profile != app.cfg.profile;
    app.profile = MemoryProfile::resolve(&cfg.profile);
    if needs_reopen {
        match crate::build_engine(&cfg, app.profile) {
            Ok(engine) => app.engine = engine,
            Err(e) => println!("{}: {} – keeping the previous store", "Failed to reopen store".red(), e),
        }
    } else {
        let registry = app.engine.distiller.scenarios().clone();
        app.engine.retriever = HybridRetriever::new(registry).with_min_similarity(cfg.min_similarity);
    }
    app.cfg = cfg;
}

fn cmd_stats(app: &App) {
    let stats = app.engine.store.stats();
    println!("{}", "Memory Store".bold().underline());
    println!("  File       : {}", app.cfg.store_path.display().to_string().yellow());
    println!("  Profile    : {}", app.profile.to_string().yellow());
    println!("  Distilled  : {}", stats.distilled_count);
    println!("  Raw        : {}", stats.raw_count);
    println!("  Total      : {}", stats.total_count);
    println!("  Size       : {:.2} KB", stats.store_size_bytes as f64 / 1024.0);
    match app.engine.store.dimension() {
        Some(d) => println!("  Dimension  : {d}"),
        None => println!("  Dimension  : {}", "unset".dimmed()),
    }
}

fn cmd_recall(app: &App, args: &[&str]) {
    let Some((scenario, observation)) = parse_target(args, "/recall <scenario> [x y z]") else {
        return;
    };
    let request = RetrievalRequest::new(scenario)
        .observation(observation.clone())
        .top_k(RECALL_TOP_K)
        .include_distilled(app.profile.include_distilled)
        .include_raw(app.profile.include_raw);
    let engine = &app.engine;
    println!("  Query: {}", engine.retriever.query_text(scenario, &observation).dimmed());
    let results = app.rt.block_on(engine.retriever.retrieve(&engine.store, &request));
    print_results(&results);
}

fn cmd_contrast(app: &App, args: &[&str]) {
    let Some((scenario, observation)) = parse_target(args, "/contrast <scenario> [x y z]") else {
        return;
    };
    let engine = &app.engine;
    match app.rt.block_on(engine.retriever.retrieve_comparison(&engine.store, scenario, &observation, RECALL_TOP_K)) {
        Ok(cmp) => {
            println!("  Query: {}", cmp.query_text.dimmed());
            println!("{}", "  Distilled".bold());
            print_results(&cmp.distilled);
            println!("{}", "  Raw".bold());
            print_results(&cmp.raw);
        }
        Err(e) => println!("{}: {}", "Search failed".red(), e),
    }
}

fn cmd_ingest(app: &mut App, args: &[&str]) {
    let [file] = args else {
        usage("/ingest <file.json>");
        return;
    };
    let logs = match read_attempt_logs(Path::new(file)) {
        Ok(logs) => logs,
        Err(e) => {
            println!("{}: {}", "Cannot read attempt logs".red(), e);
            return;
        }
    };
    let App {
        cfg,
        profile,
        engine,
        rt,
    } = app;
    match rt.block_on(ingest_runs(engine, *profile, &cfg.runs_dir, logs)) {
        Ok(saved) => {
            for run in saved {
                println!(
                    "  {} run {} ({}) – {} attempt(s), {} distilled, {}",
                    "✓".green(),
                    run.run_id.bold(),
                    run.scenario_id,
                    run.attempts,
                    run.distilled,
                    if run.success { "solved".green() } else { "unsolved".yellow() }
                );
            }
        }
        Err(e) => println!("{}: {}", "Ingest aborted".red(), e),
    }
}

fn cmd_compare(app: &App, args: &[&str]) {
    let [scenario] = args else {
        usage("/compare <scenario>");
        return;
    };
    let cmp = compare_performance(&app.cfg.runs_dir, scenario);
    println!("{} {}", "Performance".bold().underline(), scenario.bold());
    print_mode("Distilled", &cmp.distilled);
    print_mode("Raw", &cmp.raw);
    match KeyFindings::compute(&cmp) {
        Some(k) => {
            println!("  {:.1}% fewer attempts, {:.1}% faster", k.attempt_reduction_pct, k.duration_reduction_pct);
            println!(
                "  {:.1}% smaller store ({:.2}x compression)",
                k.storage_reduction_pct, k.compression_ratio
            );
        }
        None => println!("  {}", "Need runs in both modes for key findings.".dimmed()),
    }
}

fn cmd_report(app: &App, args: &[&str]) {
    let (scenario, out) = match args {
        [scenario] => (*scenario, None),
        [scenario, out] => (*scenario, Some(Path::new(out))),
        _ => {
            usage("/report <scenario> [out.md]");
            return;
        }
    };
    let cmp = compare_performance(&app.cfg.runs_dir, scenario);
    let report = render_report(&cmp, &app.engine.store.stats(), Utc::now());
    match out {
        None => println!("{report}"),
        Some(path) => match fs::write(path, report) {
            Ok(()) => println!("{} {}", "✓ Report written to".green(), path.display().to_string().bold()),
            Err(e) => println!("{}: {}", "Error writing report".red(), e),
        },
    }
}

fn cmd_export(app: &App, args: &[&str]) {
    let [scenario, file] = args else {
        usage("/export <scenario> <file.json>");
        return;
    };
    match app.engine.store.export_distilled(scenario, Path::new(file)) {
        Ok(n) => println!("{} {} memories to {}", "✓ Exported".green(), n, file.bold()),
        Err(e) => println!("{}: {}", "Export failed".red(), e),
    }
}

fn cmd_import(app: &mut App, args: &[&str]) {
    let [file] = args else {
        usage("/import <file.json>");
        return;
    };
    let App { engine, rt, .. } = app;
    match rt.block_on(engine.store.import_distilled(Path::new(file))) {
        Ok(n) => println!("{} {} memories", "✓ Imported".green(), n),
        Err(e) => println!("{}: {}", "Import failed".red(), e),
    }
}

fn cmd_clear(app: &mut App) {
    let answer = prompt_line(
        &format!("  {} Type 'yes' to delete every memory in {}: ", "⚠".yellow(), app.cfg.store_path.display()),
        "no",
    );
    if answer != "yes" {
        println!("  Cancelled.");
        return;
    }
    match app.engine.store.clear() {
        Ok(()) => println!("{}", "✓ Store cleared.".green()),
        Err(e) => println!("{}: {}", "Clear failed".red(), e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingest
// ─────────────────────────────────────────────────────────────────────────────

/// One saved run produced by [`ingest_runs`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IngestedRun {
    pub run_id: String,
    pub scenario_id: String,
    pub attempts: u32,
    pub distilled: usize,
    pub success: bool,
}

/// Accepts a JSON array of attempt logs or a single log.
fn read_attempt_logs(path: &Path) -> Result<Vec<AttemptLog>, String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    serde_json::from_str::<Vec<AttemptLog>>(&raw)
        .or_else(|_| serde_json::from_str::<AttemptLog>(&raw).map(|log| vec![log]))
        .map_err(|e| format!("{}: {}", path.display(), e))
}

/// Split logs into runs keyed by `(scenario_id, run_id)`, keeping first-seen
/// order, and order each run by attempt index.
pub(crate) fn group_runs(logs: Vec<AttemptLog>) -> Vec<Vec<AttemptLog>> {
    let mut runs: Vec<Vec<AttemptLog>> = Vec::new();
    for log in logs {
        match runs
            .iter_mut()
            .find(|run| run[0].run_id == log.run_id && run[0].scenario_id == log.scenario_id)
        {
            Some(run) => run.push(log),
            None => runs.push(vec![log]),
        }
    }
    for run in &mut runs {
        run.sort_by_key(|log| log.attempt_index);
    }
    runs
}

/// Steps taken in one attempt, as far as the log records them.
pub(crate) fn steps_of(log: &AttemptLog) -> u32 {
    match &log.details {
        ScenarioDetails::LeverPuzzle { sequence } => sequence.len() as u32,
        ScenarioDetails::KeyFinder { actions, .. } => actions.len() as u32,
        ScenarioDetails::Maze {
            step_count,
            turn_sequence,
            ..
        } => step_count.unwrap_or(turn_sequence.len() as u32),
    }
}

/// Outcome of one run: solved if any attempt succeeded, attempts counted up
/// to and including the first success.
pub(crate) fn outcome_of(run: &[AttemptLog]) -> TaskOutcome {
    let solved_at = run.iter().position(|log| log.success);
    let counted = solved_at.map_or(run.len(), |i| i + 1);
    TaskOutcome {
        success: solved_at.is_some(),
        attempts: counted as u32,
        total_steps: run[..counted].iter().map(steps_of).sum(),
    }
}

/// Replay each run through a [`MemorySession`]: recall before every
/// attempt, ingest after it, save the metrics file at the end.
pub(crate) async fn ingest_runs(
    engine: &mut MemoryEngine,
    profile: MemoryProfile,
    runs_dir: &Path,
    logs: Vec<AttemptLog>,
) -> Result<Vec<IngestedRun>, SessionError> {
    let mut saved = Vec::new();
    for run in group_runs(logs) {
        let first = &run[0];
        let (run_id, scenario_id) = (first.run_id.clone(), first.scenario_id.clone());
        let outcome = outcome_of(&run);

        let mut session = MemorySession::with_run_id(engine, profile, scenario_id.clone(), runs_dir, run_id.clone());
        let mut distilled = 0;
        for log in &run[..outcome.attempts as usize] {
            session.recall(&Observation::default()).await;
            distilled += session.record_attempt(log).await?.distilled_stored;
        }
        session.finish(outcome)?;
        saved.push(IngestedRun {
            run_id,
            scenario_id,
            attempts: outcome.attempts,
            distilled,
            success: outcome.success,
        });
    }
    Ok(saved)
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn usage(text: &str) {
    println!("  {} {}", "Usage:".yellow(), text.bold());
}

/// `<scenario> [x y z]`.
fn parse_target<'a>(args: &[&'a str], usage_text: &str) -> Option<(&'a str, Observation)> {
    match args {
        [scenario] => Some((*scenario, Observation::default())),
        [scenario, x, y, z] => match (x.parse(), y.parse(), z.parse()) {
            (Ok(x), Ok(y), Ok(z)) => Some((*scenario, Observation::at(Position::new(x, y, z)))),
            _ => {
                println!("  {} position must be three numbers", "Warning:".yellow());
                None
            }
        },
        _ => {
            usage(usage_text);
            None
        }
    }
}

fn print_results(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("  {}", "No memories.".dimmed());
        return;
    }
    for (i, r) in results.iter().enumerate() {
        let confidence = r
            .record
            .confidence()
            .map_or_else(|| "–".to_string(), |c| format!("{c:.2}"));
        let marker = if r.record.success() { "✓".green() } else { "✗".red() };
        println!(
            "  {:>2}. {} [{}] sim {:.3}  score {:.3}  conf {}",
            i + 1,
            marker,
            r.source.to_string().cyan(),
            r.similarity,
            r.boosted_score,
            confidence
        );
        println!("      {}", r.record.text());
    }
}

fn print_mode(title: &str, mode: &ModeSummary) {
    println!(
        "  {:<10} runs {:>3}  success {:>5.1}%  attempts {:.2}  duration {:.2}s  store {:.2} KB  latency {:.2} ms",
        title.bold(),
        mode.runs,
        mode.success_rate * 100.0,
        mode.avg_attempts,
        mode.avg_duration_ms / 1000.0,
        mode.avg_store_size / 1024.0,
        mode.avg_latency_ms
    );
}

/// Parse an `f32`.  Returns `default` when the user presses Enter or the
/// value is not a number.
fn prompt_f32(msg: &str, default: f32) -> f32 {
    let raw = prompt_line(msg, &default.to_string());
    match raw.parse::<f32>() {
        Ok(v) => v,
        Err(_) => {
            println!("  {} '{}' is not a number, keeping {}", "Warning:".yellow(), raw, default);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use reverie_distill::Distiller;
    use reverie_memory::{HashingEmbedder, VectorStore};

    use super::*;

    fn lever(run: &str, attempt: u32, success: bool, sequence: Vec<u32>) -> AttemptLog {
        AttemptLog::new("lever_puzzle_3", run, attempt, success, ScenarioDetails::LeverPuzzle { sequence })
    }

    #[test]
    fn runs_group_by_run_id_and_sort_by_attempt() {
        let runs = group_runs(vec![
            lever("a", 2, true, vec![2, 3, 1]),
            lever("b", 1, false, vec![1]),
            lever("a", 1, false, vec![1, 2, 3]),
        ]);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].iter().map(|l| l.attempt_index).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(runs[1][0].run_id, "b");
    }

    #[test]
    fn outcome_counts_up_to_first_success() {
        let run = vec![
            lever("a", 1, false, vec![1, 2]),
            lever("a", 2, true, vec![2, 3, 1]),
            lever("a", 3, true, vec![2, 3, 1]),
        ];
        let outcome = outcome_of(&run);
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.total_steps, 5);
    }

    #[test]
    fn maze_steps_fall_back_to_turn_count() {
        let log = AttemptLog::new(
            "maze_v1",
            "m",
            1,
            false,
            ScenarioDetails::Maze {
                step_count: None,
                turn_sequence: vec![Position::new(1.0, 0.0, 2.0)],
                actions: Vec::new(),
            },
        );
        assert_eq!(steps_of(&log), 1);
    }

    #[test]
    fn single_log_file_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        fs::write(&path, serde_json::to_string(&lever("a", 1, true, vec![3])).unwrap()).unwrap();
        assert_eq!(read_attempt_logs(&path).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ingest_saves_one_metrics_file_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::open_in_memory(Arc::new(HashingEmbedder::default()));
        let mut engine = MemoryEngine::new(store, Distiller::default());

        let saved = ingest_runs(
            &mut engine,
            MemoryProfile::DISTILLED,
            dir.path(),
            vec![
                lever("a", 1, false, vec![1, 2, 3]),
                lever("a", 2, true, vec![2, 3, 1]),
                lever("b", 1, true, vec![2, 3, 1]),
            ],
        )
        .await
        .unwrap();

        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].attempts, 2);
        assert!(saved.iter().all(|r| r.success));
        let cmp = compare_performance(dir.path(), "lever_puzzle_3");
        assert_eq!(cmp.distilled.runs, 2);
        assert_eq!(cmp.distilled.success_rate, 1.0);
        assert_eq!(engine.store.stats().raw_count, 3);
    }
}

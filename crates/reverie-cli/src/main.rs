//! `reverie` – interactive shell over the episodic memory engine.
//!
//! 1. Initialises tracing (console plus optional OTLP export).
//! 2. Checks for `~/.reverie/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 3. Probes Ollama when the configuration needs it.
//! 4. Opens the memory store and drops the user into a **REPL** with
//!    slash-commands (`/recall`, `/ingest`, `/compare`, `/report`, …).
//! 5. Intercepts **Ctrl-C**; store and metrics writes are atomic, so the
//!    process exits immediately.

mod config;
mod ollama;
mod repl;

use std::sync::Arc;

use colored::Colorize;
use reverie_distill::{DistillStyle, Distiller};
use reverie_memory::{Embedder, HashingEmbedder, HybridRetriever, VectorStore};
use reverie_runtime::{MemoryEngine, MemoryProfile, OllamaEmbedder, OllamaGenerator};
use tracing::{info, warn};

use crate::config::{Config, EmbedderBackend};

fn main() {
    // Hold the guard for the whole process; dropping it flushes spans.
    let _telemetry = reverie_runtime::init_tracing("reverie");

    print_banner();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – exiting.".yellow().bold());
        println!("{}", "  ✓ Store and metrics files are written atomically.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── First-Run Wizard ──────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };
    let profile = MemoryProfile::resolve(&cfg.profile);

    // ── Ollama discovery ──────────────────────────────────────────────────
    if cfg.embedder == EmbedderBackend::Ollama || profile.distill_style == DistillStyle::Generative {
        probe_ollama(&cfg, profile);
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    let engine = match build_engine(&cfg, profile) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}: {}", "Failed to open memory store".red(), e);
            std::process::exit(1);
        }
    };
    let stats = engine.store.stats();
    println!(
        "  Store {} – {} distilled, {} raw",
        cfg.store_path.display().to_string().bold(),
        stats.distilled_count,
        stats.raw_count
    );
    println!("  Profile {}", profile.to_string().bold());
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(repl::App::new(cfg, profile, engine, runtime));
}

/// Open the configured store and wire the embedder, distiller and retriever.
pub(crate) fn build_engine(cfg: &Config, profile: MemoryProfile) -> Result<MemoryEngine, String> {
    let embedder: Arc<dyn Embedder> = match cfg.embedder {
        EmbedderBackend::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderBackend::Ollama => Arc::new(OllamaEmbedder::new(&cfg.ollama_url, &cfg.embedding_model)),
    };
    let store = VectorStore::open(&cfg.store_path, embedder).map_err(|e| e.to_string())?;

    let mut distiller = Distiller::default();
    if profile.distill_style == DistillStyle::Generative {
        distiller = distiller.with_generator(Arc::new(OllamaGenerator::new(&cfg.ollama_url, &cfg.generation_model)));
    }
    let retriever = HybridRetriever::new(distiller.scenarios().clone()).with_min_similarity(cfg.min_similarity);
    info!(
        store = %cfg.store_path.display(),
        embedder = %cfg.embedder,
        profile = %profile,
        "memory engine ready"
    );
    Ok(MemoryEngine::new(store, distiller).with_retriever(retriever))
}

fn probe_ollama(cfg: &Config, profile: MemoryProfile) {
    print!("\n  Probing Ollama at {} … ", cfg.ollama_url.dimmed());
    match ollama::fetch_models(&cfg.ollama_url) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            let mut needed = Vec::new();
            if cfg.embedder == EmbedderBackend::Ollama {
                needed.push(&cfg.embedding_model);
            }
            if profile.distill_style == DistillStyle::Generative {
                needed.push(&cfg.generation_model);
            }
            for model in needed {
                if !ollama::has_model(&models, model) {
                    println!("  {} {} – run `{}`", "Missing model".yellow(), model.bold(), format!("ollama pull {model}").bold());
                }
            }
        }
        Err(_) => {
            println!("{}", "offline".yellow());
            println!(
                "  {}  Run `{}`; generative distillation will fall back to templates.",
                "No Ollama instance detected.".dimmed(),
                "ollama serve".bold()
            );
        }
    }
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Reverie First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Reverie.\n");

    let mut cfg = Config::default();
    config::apply_env_overrides(&mut cfg);

    println!("  How should memories be embedded?");
    println!("    1) Offline feature hashing  (default, no model server)");
    println!("    2) Ollama embedding model");
    match prompt_line("  Enter choice [1]: ", "1").trim() {
        "2" => cfg.embedder = EmbedderBackend::Ollama,
        _ => cfg.embedder = EmbedderBackend::Hashing,
    }

    println!("  Which memory profile?");
    for (i, profile) in MemoryProfile::all().iter().enumerate() {
        println!("    {}) {}", i + 1, profile.name);
    }
    cfg.profile = match prompt_line("  Enter choice [2]: ", "2").trim() {
        "1" => MemoryProfile::RAW.name.to_string(),
        "3" => MemoryProfile::DISTILLED_GENERATIVE.name.to_string(),
        _ => MemoryProfile::DISTILLED.name.to_string(),
    };

    let store = prompt_line(
        &format!("  Store file [{}]: ", cfg.store_path.display()),
        &cfg.store_path.to_string_lossy(),
    );
    cfg.store_path = store.into();

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ___                     _     "#.bold().cyan());
    println!("{}", r#"  / _ \___ _  _____ ____  (_)__  "#.bold().cyan());
    println!("{}", r#" / , _/ -_) |/ / -_) __/ / / -_) "#.bold().cyan());
    println!("{}", r#"/_/|_|\__/|___/\__/_/   /_/\__/  "#.bold().cyan());
    println!();
    println!("  {} {}", "Reverie".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Episodic memory for repeated attempts");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}

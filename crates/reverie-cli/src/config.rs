//! Configuration Vault – reads/writes `~/.reverie/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where embeddings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    /// Offline feature hashing; no model server needed.
    #[default]
    Hashing,
    Ollama,
}

impl EmbedderBackend {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hashing" | "hash" | "offline" => Some(EmbedderBackend::Hashing),
            "ollama" => Some(EmbedderBackend::Ollama),
            _ => None,
        }
    }
}

impl std::fmt::Display for EmbedderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedderBackend::Hashing => write!(f, "hashing"),
            EmbedderBackend::Ollama => write!(f, "ollama"),
        }
    }
}

/// Persisted user configuration stored in `~/.reverie/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// JSON document holding the distilled and raw collections.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Directory receiving one metrics file per run.
    #[serde(default = "default_runs_dir")]
    pub runs_dir: PathBuf,

    /// Memory profile used by `/ingest` and `/recall`
    /// (`raw`, `distilled`, `distilled-generative`).
    #[serde(default = "default_profile")]
    pub profile: String,

    #[serde(default)]
    pub embedder: EmbedderBackend,

    /// Base URL of the Ollama instance.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Model used for generative distillation.
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

fn default_store_path() -> PathBuf {
    reverie_dir(&home_dir()).join("memory.json")
}
fn default_runs_dir() -> PathBuf {
    reverie_dir(&home_dir()).join("runs")
}
fn default_profile() -> String {
    "distilled".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_generation_model() -> String {
    "llama3.1".to_string()
}
fn default_min_similarity() -> f32 {
    reverie_memory::retrieval::DEFAULT_MIN_SIMILARITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            runs_dir: default_runs_dir(),
            profile: default_profile(),
            embedder: EmbedderBackend::default(),
            ollama_url: default_ollama_url(),
            embedding_model: default_embedding_model(),
            generation_model: default_generation_model(),
            min_similarity: default_min_similarity(),
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

fn reverie_dir(home: &str) -> PathBuf {
    PathBuf::from(home).join(".reverie")
}

/// Return the path to `~/.reverie/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    reverie_dir(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `REVERIE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `REVERIE_STORE_PATH` | `store_path` |
/// | `REVERIE_RUNS_DIR` | `runs_dir` |
/// | `REVERIE_PROFILE` | `profile` |
/// | `REVERIE_EMBEDDER` | `embedder` |
/// | `REVERIE_OLLAMA_URL` | `ollama_url` |
/// | `REVERIE_EMBEDDING_MODEL` | `embedding_model` |
/// | `REVERIE_GENERATION_MODEL` | `generation_model` |
/// | `REVERIE_MIN_SIMILARITY` | `min_similarity` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("REVERIE_STORE_PATH") {
        cfg.store_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("REVERIE_RUNS_DIR") {
        cfg.runs_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("REVERIE_PROFILE") {
        cfg.profile = v;
    }
    if let Some(v) = lookup("REVERIE_EMBEDDER")
        && let Some(backend) = EmbedderBackend::parse(&v)
    {
        cfg.embedder = backend;
    }
    if let Some(v) = lookup("REVERIE_OLLAMA_URL") {
        cfg.ollama_url = v;
    }
    if let Some(v) = lookup("REVERIE_EMBEDDING_MODEL") {
        cfg.embedding_model = v;
    }
    if let Some(v) = lookup("REVERIE_GENERATION_MODEL") {
        cfg.generation_model = v;
    }
    if let Some(v) = lookup("REVERIE_MIN_SIMILARITY")
        && let Ok(min) = v.trim().parse::<f32>()
    {
        cfg.min_similarity = min;
    }
}

/// Save the config to disk, creating `~/.reverie/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

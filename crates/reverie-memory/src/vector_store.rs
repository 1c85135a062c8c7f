//! Vector Store.
//!
//! Keeps two append-only collections, `distilled` ([`MemoryUnit`]s) and
//! `raw` ([`RawEpisode`]s), each entry stored with the embedding of its text
//! and the time it was added.  The whole store lives in memory and is
//! rewritten to a single JSON document after every mutation.
//!
//! # Storage layout
//!
//! ```text
//! {
//!   "distilled": [ { <MemoryUnit fields>, "embedding": [..], "added_at": ".." } ],
//!   "raw":       [ { <RawEpisode fields>, "embedding": [..], "added_at": ".." } ]
//! }
//! ```
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a reader always sees either the previous document or
//! the new one.
//!
//! # Single writer
//!
//! Mutation takes `&mut self`, which serialises writers inside one process.
//! Two processes opening the same file will overwrite each other's appends;
//! only one active writer per store file is supported.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use reverie_memory::embedder::HashingEmbedder;
//! use reverie_memory::vector_store::{SearchOptions, VectorStore};
//! use reverie_types::{MemoryKind, MemoryUnit};
//!
//! # tokio_test_block_on(async {
//! let mut store = VectorStore::open_in_memory(Arc::new(HashingEmbedder::default()));
//! let unit = MemoryUnit::new(
//!     "lever_puzzle_3",
//!     MemoryKind::SequenceOutcome,
//!     "Successful lever sequence 2-3-1 at attempt 4",
//!     0.9,
//!     true,
//!     Utc::now(),
//! );
//! store.add_distilled(unit).await.unwrap();
//!
//! let hits = store
//!     .search("successful lever sequence", &SearchOptions::default())
//!     .await
//!     .unwrap();
//! assert_eq!(hits.len(), 1);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reverie_types::{
    MemoryRecord, MemorySource, MemoryUnit, RawEpisode, RetrievalResult, clamp_confidence,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embedder::{EmbedError, Embedder};

pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from vector store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbedError),
    /// Integrity violation: vectors of different lengths in one store.
    #[error("Embedding dimension mismatch: store holds {expected}-d vectors, got {found}-d")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("Embedding vectors must be non-empty")]
    EmptyEmbedding,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stored entries
// ─────────────────────────────────────────────────────────────────────────────

/// An ingested entry together with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry<T> {
    #[serde(flatten)]
    pub entry: T,
    pub embedding: Vec<f32>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    distilled: Vec<StoredEntry<MemoryUnit>>,
    #[serde(default)]
    raw: Vec<StoredEntry<RawEpisode>>,
}

impl StoreData {
    fn embeddings(&self) -> impl Iterator<Item = &[f32]> {
        self.distilled
            .iter()
            .map(|e| e.embedding.as_slice())
            .chain(self.raw.iter().map(|e| e.embedding.as_slice()))
    }

    /// The common embedding length, `None` for an empty store.
    fn uniform_dimension(&self) -> Result<Option<usize>> {
        let mut dimension: Option<usize> = None;
        for embedding in self.embeddings() {
            if embedding.is_empty() {
                return Err(StoreError::EmptyEmbedding);
            }
            match dimension {
                None => dimension = Some(embedding.len()),
                Some(expected) if expected != embedding.len() => {
                    return Err(StoreError::DimensionMismatch {
                        expected,
                        found: embedding.len(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(dimension)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search options / stats
// ─────────────────────────────────────────────────────────────────────────────

/// Filters for [`VectorStore::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Exact scenario id match; `None` searches every scenario.
    pub scenario_id: Option<String>,
    pub top_k: usize,
    pub include_distilled: bool,
    pub include_raw: bool,
    /// Candidates scoring below this similarity are discarded.
    pub min_similarity: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            scenario_id: None,
            top_k: 5,
            include_distilled: true,
            include_raw: true,
            min_similarity: 0.0,
        }
    }
}

/// Point-in-time size of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub distilled_count: usize,
    pub raw_count: usize,
    pub total_count: usize,
    /// On-disk size, or the serialised size for an in-memory store.
    pub store_size_bytes: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Scoring
// ─────────────────────────────────────────────────────────────────────────────

/// Confidence-weighted ranking score.
///
/// Distilled entries score `similarity * (0.7 + 0.3 * confidence)`; entries
/// without a confidence keep their similarity.  For a negative similarity
/// the weight is mirrored (`similarity * (1.0 - 0.3 * confidence)`) so the
/// score never decreases as confidence grows.
pub fn boosted_score(similarity: f32, confidence: Option<f32>) -> f32 {
    match confidence {
        Some(c) => {
            let c = clamp_confidence(c);
            if similarity >= 0.0 {
                similarity * (0.7 + 0.3 * c)
            } else {
                similarity * (1.0 - 0.3 * c)
            }
        }
        None => similarity,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// VectorStore
// ─────────────────────────────────────────────────────────────────────────────

/// Durable, append-only embedding store for distilled units and raw episodes.
pub struct VectorStore {
    path: Option<PathBuf>,
    data: StoreData,
    dimension: Option<usize>,
    embedder: Arc<dyn Embedder>,
}

impl VectorStore {
    /// Open (or create) the store backed by the JSON file at `path`.
    ///
    /// A missing or unparsable file yields an empty store and a warning.  A
    /// file whose embeddings disagree on dimension is refused.
    pub fn open(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = path.into();
        let data = load_data(&path);
        let dimension = data.uniform_dimension()?;
        info!(
            path = %path.display(),
            distilled = data.distilled.len(),
            raw = data.raw.len(),
            "vector store opened"
        );
        Ok(Self {
            path: Some(path),
            data,
            dimension,
            embedder,
        })
    }

    /// Open a store that never touches disk (useful for testing).
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            path: None,
            data: StoreData::default(),
            dimension: None,
            embedder,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Embedding dimension fixed by the first ingested entry.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    // ── ingestion ────────────────────────────────────────────────────────────

    /// Embed and append `record` to its collection, then persist.
    pub async fn add(&mut self, record: MemoryRecord) -> Result<()> {
        match record {
            MemoryRecord::Distilled(unit) => self.add_distilled(unit).await,
            MemoryRecord::Raw(episode) => self.add_raw(episode).await,
        }
    }

    /// Embed and append a distilled unit.  Its confidence is clamped on the
    /// way in.
    pub async fn add_distilled(&mut self, mut unit: MemoryUnit) -> Result<()> {
        unit.confidence = clamp_confidence(unit.confidence);
        let embedding = self.embed_checked(&embedding_text(&unit)).await?;
        debug!(id = %unit.id, scenario = %unit.scenario_id, "adding distilled memory");
        self.data.distilled.push(StoredEntry {
            entry: unit,
            embedding,
            added_at: Utc::now(),
        });
        if let Err(e) = self.commit() {
            self.data.distilled.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Embed and append a raw episode.
    pub async fn add_raw(&mut self, episode: RawEpisode) -> Result<()> {
        let embedding = self.embed_checked(&episode.text).await?;
        debug!(id = %episode.id, scenario = %episode.scenario_id, "adding raw episode");
        self.data.raw.push(StoredEntry {
            entry: episode,
            embedding,
            added_at: Utc::now(),
        });
        if let Err(e) = self.commit() {
            self.data.raw.pop();
            return Err(e);
        }
        Ok(())
    }

    async fn embed_checked(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = self.embedder.embed(text).await?;
        self.check_dimension(&embedding)?;
        Ok(embedding)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }
        match self.dimension {
            Some(expected) if expected != embedding.len() => Err(StoreError::DimensionMismatch {
                expected,
                found: embedding.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Persist the current state and fix the dimension once the first entry
    /// is known to have landed.
    fn commit(&mut self) -> Result<()> {
        self.persist()?;
        if self.dimension.is_none() {
            self.dimension = self.data.uniform_dimension()?;
        }
        Ok(())
    }

    // ── queries ──────────────────────────────────────────────────────────────

    /// Rank stored entries against `query`.
    ///
    /// The query is embedded once.  Candidates from the selected collections
    /// (distilled before raw, each in insertion order) are filtered by
    /// scenario and `min_similarity`, sorted by similarity, then stably
    /// re-sorted by boosted score, and the first `top_k` are returned.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<RetrievalResult>> {
        if options.top_k == 0 || (!options.include_distilled && !options.include_raw) {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;
        self.check_dimension(&query_embedding)?;

        let in_scope = |scenario_id: &str| {
            options
                .scenario_id
                .as_deref()
                .is_none_or(|wanted| wanted == scenario_id)
        };

        let mut results = Vec::new();
        if options.include_distilled {
            for stored in self.data.distilled.iter().filter(|s| in_scope(&s.entry.scenario_id)) {
                let similarity = self.embedder.similarity(&query_embedding, &stored.embedding);
                if similarity >= options.min_similarity {
                    results.push(RetrievalResult {
                        boosted_score: boosted_score(similarity, Some(stored.entry.confidence)),
                        record: MemoryRecord::Distilled(stored.entry.clone()),
                        similarity,
                        source: MemorySource::Distilled,
                    });
                }
            }
        }
        if options.include_raw {
            for stored in self.data.raw.iter().filter(|s| in_scope(&s.entry.scenario_id)) {
                let similarity = self.embedder.similarity(&query_embedding, &stored.embedding);
                if similarity >= options.min_similarity {
                    results.push(RetrievalResult {
                        boosted_score: similarity,
                        record: MemoryRecord::Raw(stored.entry.clone()),
                        similarity,
                        source: MemorySource::Raw,
                    });
                }
            }
        }

        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.sort_by(|a, b| b.boosted_score.total_cmp(&a.boosted_score));
        results.truncate(options.top_k);
        debug!(query, hits = results.len(), "vector search complete");
        Ok(results)
    }

    /// Distilled units of `scenario_id`, in insertion order.
    pub fn distilled_for<'a>(&'a self, scenario_id: &'a str) -> impl Iterator<Item = &'a MemoryUnit> + 'a {
        self.data
            .distilled
            .iter()
            .map(|s| &s.entry)
            .filter(move |u| u.scenario_id == scenario_id)
    }

    /// Raw episodes of `scenario_id`, in insertion order.
    pub fn raw_for<'a>(&'a self, scenario_id: &'a str) -> impl Iterator<Item = &'a RawEpisode> + 'a {
        self.data
            .raw
            .iter()
            .map(|s| &s.entry)
            .filter(move |e| e.scenario_id == scenario_id)
    }

    pub fn stats(&self) -> StoreStats {
        let store_size_bytes = match &self.path {
            Some(path) => fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            None => serde_json::to_vec_pretty(&self.data)
                .map(|b| b.len() as u64)
                .unwrap_or(0),
        };
        StoreStats {
            distilled_count: self.data.distilled.len(),
            raw_count: self.data.raw.len(),
            total_count: self.data.distilled.len() + self.data.raw.len(),
            store_size_bytes,
        }
    }

    // ── maintenance ──────────────────────────────────────────────────────────

    /// Destroy both collections and persist the empty store immediately.
    ///
    /// Reserved for test setup and explicit resets.
    pub fn clear(&mut self) -> Result<()> {
        warn!(path = ?self.path, "clearing vector store");
        self.data = StoreData::default();
        self.dimension = None;
        self.persist()
    }

    /// Write the distilled units of `scenario_id` (without embeddings) to
    /// `out` as a JSON array.  Returns how many were written.
    pub fn export_distilled(&self, scenario_id: &str, out: &Path) -> Result<usize> {
        let subset: Vec<&MemoryUnit> = self.distilled_for(scenario_id).collect();
        write_atomically(out, &serde_json::to_vec_pretty(&subset)?)?;
        info!(scenario = scenario_id, count = subset.len(), path = %out.display(), "exported distilled memories");
        Ok(subset.len())
    }

    /// Ingest a JSON array of distilled units previously written by
    /// [`export_distilled`](Self::export_distilled).
    ///
    /// A missing or malformed file imports nothing.  Returns how many units
    /// were added.
    pub async fn import_distilled(&mut self, input: &Path) -> Result<usize> {
        let raw = match fs::read_to_string(input) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %input.display(), error = %e, "distilled import file unreadable; nothing imported");
                return Ok(0);
            }
        };
        let units: Vec<MemoryUnit> = match serde_json::from_str(&raw) {
            Ok(units) => units,
            Err(e) => {
                warn!(path = %input.display(), error = %e, "distilled import file malformed; nothing imported");
                return Ok(0);
            }
        };
        let count = units.len();
        for unit in units {
            self.add_distilled(unit).await?;
        }
        Ok(count)
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_atomically(path, &serde_json::to_vec_pretty(&self.data)?)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Text a distilled unit is embedded under: its summary, or the serialised
/// payload when the summary is blank.
fn embedding_text(unit: &MemoryUnit) -> String {
    if unit.text.trim().is_empty()
        && let Some(payload) = &unit.payload
        && let Ok(json) = serde_json::to_string(payload)
    {
        return json;
    }
    unit.text.clone()
}

fn load_data(path: &Path) -> StoreData {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreData::default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "vector store unreadable; starting empty");
            return StoreData::default();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(data) => data,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "vector store malformed; starting empty");
            StoreData::default()
        }
    }
}

/// Replace `path` with `bytes` via a temp file in the same directory.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error(dir))?;
    tmp.write_all(bytes).map_err(io_error(path))?;
    tmp.as_file().sync_all().map_err(io_error(path))?;
    tmp.persist(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! `reverie-runtime` – Run orchestration and local model backends.
//!
//! Wires the memory store, distiller and metrics collector into one run and
//! provides the network collaborators the lower crates only know as traits.
//!
//! # Modules
//!
//! - [`session`] – [`MemoryEngine`][session::MemoryEngine] and
//!   [`MemorySession`][session::MemorySession]: recall before an attempt,
//!   ingest after it, save the run's metrics at the end.
//! - [`memory_mode`] – [`MemoryProfile`][memory_mode::MemoryProfile]:
//!   the experimental arms (`raw`, `distilled`, `distilled-generative`).
//! - [`llm_driver`] – [`OllamaGenerator`][llm_driver::OllamaGenerator]:
//!   the [`Generator`][reverie_distill::Generator] behind generative
//!   distillation, talking to [Ollama](https://ollama.com)
//!   (`http://localhost:11434`) with a JSON-schema constrained reply.
//! - [`embedder`] – [`OllamaEmbedder`][embedder::OllamaEmbedder]:
//!   an [`Embedder`][reverie_memory::Embedder] backed by Ollama's
//!   embeddings endpoint.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod embedder;
pub mod llm_driver;
pub mod memory_mode;
pub mod session;
pub mod telemetry;

pub use embedder::OllamaEmbedder;
pub use llm_driver::{LlmError, OllamaGenerator};
pub use memory_mode::MemoryProfile;
pub use session::{IngestReport, MemoryEngine, MemorySession, SessionError};
pub use telemetry::{TracerProviderGuard, init_tracing};

//! `reverie-memory` – The Memory Store.
//!
//! Gives the agent durable recall of what happened in earlier attempts,
//! backed by a single JSON document of embedded entries.
//!
//! # Modules
//!
//! - [`embedder`] – the [`Embedder`][embedder::Embedder] seam, cosine
//!   similarity and the offline [`HashingEmbedder`][embedder::HashingEmbedder].
//! - [`vector_store`] – [`VectorStore`][vector_store::VectorStore]: the
//!   append-only distilled/raw collections with atomic persistence and
//!   confidence-weighted similarity search.
//! - [`retrieval`] – [`HybridRetriever`][retrieval::HybridRetriever]:
//!   similarity search plus success backfill and empty-result fallback.

pub mod embedder;
pub mod retrieval;
pub mod vector_store;

pub use embedder::{EmbedError, Embedder, HashingEmbedder};
pub use retrieval::{HybridRetriever, RetrievalRequest};
pub use vector_store::{SearchOptions, StoreError, StoreStats, VectorStore};

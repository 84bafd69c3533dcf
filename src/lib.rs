//! # vecindex — Incremental Vector Search Engine
//!
//! Indexes text documents into a vector store and serves similarity search
//! over them. Indexing is incremental: content hashes skip unchanged
//! documents, and a configuration hash discards the index whenever the
//! chunking, embedding, or store settings change.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, defaults, and validation
//! - **[`chunker`]** — Document splitting (fixed, fixed-overlap, semantic)
//! - **[`embedder`]** — Text embedding (local ONNX model, OpenAI-compatible
//!   and Infinity-style HTTP providers, deterministic mock)
//! - **[`store`]** — Vector stores (exact in-memory flat store with disk
//!   persistence, remote Qdrant collection)
//! - **[`manager`]** — Pipeline orchestration, structured result reports,
//!   and index metadata

pub mod chunker;
pub mod config;
pub mod embedder;
pub mod manager;
pub mod store;

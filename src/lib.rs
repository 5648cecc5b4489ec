#![warn(missing_docs)]
//! Deterministic lexical hash embeddings stored in, and queried from, a
//! pgvector-backed Postgres table.

pub mod config;
pub mod document;
pub mod encoder;
pub mod error;
pub mod hasher;
pub mod query;
pub mod sync;
pub mod tokenizer;
pub mod vector_store;

pub use config::{ConnectionConfig, DistanceMetric, StoreArgs, StoreConfig};
pub use document::{render_context, Document, SimilarDocument};
pub use encoder::{encode, HashEncoder, DEFAULT_DIMENSION};
pub use error::{Error, Result};
pub use query::QueryEngine;
pub use sync::{DocumentOutcome, DocumentStatus, Synchronizer, UpsertReport};
pub use vector_store::{RefreshScope, SchemaState, TableName, VectorStore, WriteKind};

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber honoring `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

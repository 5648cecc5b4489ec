//! Error taxonomy for encoding, storage and retrieval.

use crate::sync::UpsertReport;

/// Failures surfaced by the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A vector or stored column disagrees with the configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Observed dimension.
        actual: usize,
    },
    /// `top_k` must be at least one.
    #[error("top_k must be a positive integer")]
    InvalidTopK,
    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The backing store could not be reached.
    #[error("failed to connect to Postgres at {target}")]
    Connect {
        /// Connection target with credentials omitted.
        target: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// A statement failed.
    #[error("{context}")]
    Database {
        /// What the statement was doing.
        context: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// Dropping or creating the ANN index failed.
    #[error("failed to rebuild index {index}")]
    Index {
        /// Index name.
        index: String,
        /// Driver error.
        #[source]
        source: tokio_postgres::Error,
    },
    /// Connectivity was lost partway through an upsert batch.
    ///
    /// `report` holds an outcome for every document of the batch: rows
    /// written before the failure keep their result, the rest are failed.
    #[error("upsert batch aborted after {} writes", .report.written())]
    BatchAborted {
        /// Outcomes up to and including the abort.
        report: Box<UpsertReport>,
        /// Error that ended the batch.
        source: Box<Error>,
    },
}

impl Error {
    /// Configuration errors are raised before the store is touched.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::InvalidTopK | Self::Config(_)
        )
    }

    /// True when the store is unreachable or the connection has closed.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Connect { .. } => true,
            Self::Database { source, .. } | Self::Index { source, .. } => source.is_closed(),
            Self::BatchAborted { source, .. } => source.is_connectivity(),
            _ => false,
        }
    }
}

/// Library result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attaches a description to driver errors, mirroring `anyhow::Context`.
pub(crate) trait DbContext<T> {
    fn db_context(self, context: impl Into<String>) -> Result<T>;

    fn with_db_context<F: FnOnce() -> String>(self, context: F) -> Result<T>;
}

impl<T> DbContext<T> for std::result::Result<T, tokio_postgres::Error> {
    fn db_context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::Database {
            context: context.into(),
            source,
        })
    }

    fn with_db_context<F: FnOnce() -> String>(self, context: F) -> Result<T> {
        self.map_err(|source| Error::Database {
            context: context(),
            source,
        })
    }
}

//! Error types for SIRENE ingestion
//!
//! Two levels are kept apart: [`RecordError`] describes one bad row and is
//! only ever counted, while [`IngestError`] reaches the orchestrator and
//! decides the job state.

use thiserror::Error;

/// Result type for job-level operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Job-level failures: chunk write failures or fatal errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The header lacks a column the natural key is built from
    #[error("Natural key column '{column}' is absent from the header of {path}")]
    MissingKeyColumn { column: String, path: String },

    /// A stored checkpoint does not describe the configured source
    #[error("Checkpoint for job '{job}' was recorded for {recorded}, not {configured}")]
    CheckpointMismatch {
        job: String,
        recorded: String,
        configured: String,
    },

    /// The chunk transaction was rolled back; the checkpoint did not move
    #[error("Chunk {chunk} failed and was rolled back: {source}")]
    ChunkWrite {
        chunk: u64,
        #[source]
        source: sqlx::Error,
    },

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether restarting from the last checkpoint can get past this error
    pub fn is_chunk_level(&self) -> bool {
        matches!(self, IngestError::ChunkWrite { .. })
    }
}

/// Row-level failures, skipped and counted by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The natural key is blank or does not have the expected shape
    #[error("row {row}: invalid natural key {field}={value:?}")]
    InvalidKey {
        row: u64,
        field: &'static str,
        value: Option<String>,
    },

    /// The row itself could not be read as a record of the header's shape
    #[error("row {row}: malformed record: {reason}")]
    Malformed { row: u64, reason: String },
}

impl RecordError {
    pub fn row(&self) -> u64 {
        match self {
            RecordError::InvalidKey { row, .. } | RecordError::Malformed { row, .. } => *row,
        }
    }
}

//! Chunked, restartable ingestion pipeline
//!
//! - **types**: raw rows, checkpoints, job state and the stage traits
//! - **reader**: CSV [`SourceOpener`] reading one chunk at a time
//! - **writer**: PostgreSQL [`ChunkWriter`] (multi-row upsert + checkpoint per transaction)
//! - **checkpoint**: PostgreSQL [`CheckpointStore`]
//! - **orchestrator**: [`Pipeline`], the state machine driving the stages

pub mod checkpoint;
pub mod orchestrator;
pub mod reader;
pub mod types;
pub mod writer;

use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;

pub use checkpoint::PgCheckpointStore;
pub use orchestrator::{Pipeline, PipelineBuilder, StopHandle};
pub use reader::{CsvSourceOpener, ReaderOptions};
pub use types::{
    Checkpoint, CheckpointStatus, CheckpointStore, ChunkWriter, JobState, JobSummary, Normalizer,
    RawRecord, RawSource, SourceOpener, SourcePosition,
};
pub use writer::PgChunkWriter;

use crate::config::IngestConfig;
use crate::error::Result;
use crate::sirene::{FromRawRecord, RecordNormalizer, SireneRecord};

/// Wire the CSV reader and PostgreSQL writer for entity `E`
pub fn pg_pipeline<E>(
    job_name: impl Into<String>,
    path: impl Into<PathBuf>,
    config: &IngestConfig,
    pool: PgPool,
    from_start: bool,
) -> Result<Pipeline<E>>
where
    E: SireneRecord + FromRawRecord,
{
    config.validate()?;

    Pipeline::builder(job_name)
        .chunk_size(config.chunk_size)
        .from_start(from_start)
        .opener(CsvSourceOpener::for_entity::<E>(path, config.reader.clone()))
        .normalizer(RecordNormalizer::<E>::new(config.fields))
        .writer(PgChunkWriter::<E>::new(pool.clone()))
        .checkpoints(Arc::new(PgCheckpointStore::new(pool)))
        .build()
}

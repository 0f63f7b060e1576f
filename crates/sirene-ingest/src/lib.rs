//! Bulk ingestion of the SIRENE stock files into PostgreSQL
//!
//! The stock files (`StockUniteLegale`, `StockEtablissement`) are read in
//! fixed-size chunks, normalized into typed entities and upserted one chunk
//! per transaction, with a checkpoint committed alongside every chunk so an
//! interrupted job resumes where it left off.
//!
//! # Modules
//!
//! - **sirene**: field parsers, entity models and row normalization
//! - **pipeline**: reader, writer, checkpoints and the orchestrator
//! - **config**: `SIRENE_*` environment configuration
//! - **db**: connection pool
//! - **lookup**: single-record client for the remote registry

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod db;
pub mod error;
pub mod lookup;
pub mod pipeline;
pub mod sirene;

pub use config::IngestConfig;
pub use error::{IngestError, RecordError, Result};
pub use pipeline::{pg_pipeline, JobState, JobSummary, Pipeline, StopHandle};
pub use sirene::{EntityKind, Establishment, LegalUnit};

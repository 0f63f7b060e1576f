//! Core types and stage traits for the chunked ingestion pipeline

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{RecordError, Result};

// ============================================================================
// Raw records
// ============================================================================

/// Column layout of an opened source, resolved once at open time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    /// Source column names in file order
    header: Vec<String>,
    /// Canonical column name -> cell position
    index: HashMap<String, usize>,
}

impl ColumnMap {
    /// Resolve canonical columns against a header row.
    ///
    /// `overrides` maps a canonical name to the name used by this particular
    /// file. Canonical columns the header lacks are simply left unmapped.
    pub fn from_header<I, S>(
        header: I,
        canonical: &[&str],
        overrides: &HashMap<String, String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let header: Vec<String> = header
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let name = name.as_ref().trim();
                // A BOM can only sit in front of the very first cell
                if i == 0 {
                    name.trim_start_matches('\u{feff}').to_string()
                } else {
                    name.to_string()
                }
            })
            .collect();

        let index = canonical
            .iter()
            .filter_map(|&column| {
                let source = overrides.get(column).map(String::as_str).unwrap_or(column);
                header
                    .iter()
                    .position(|h| h == source)
                    .map(|pos| (column.to_string(), pos))
            })
            .collect();

        Self { header, index }
    }

    /// Header-less layout: cells are taken in canonical order
    pub fn positional(canonical: &[&str]) -> Self {
        Self {
            header: canonical.iter().map(|c| c.to_string()).collect(),
            index: canonical
                .iter()
                .enumerate()
                .map(|(pos, c)| (c.to_string(), pos))
                .collect(),
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    /// Number of cells a well-formed row must have
    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Canonical columns this layout cannot resolve
    pub fn missing<'a>(&self, canonical: &[&'a str]) -> Vec<&'a str> {
        canonical
            .iter()
            .copied()
            .filter(|c| !self.contains(c))
            .collect()
    }
}

/// One source row, addressed by canonical column name
#[derive(Debug, Clone)]
pub struct RawRecord {
    row: u64,
    columns: Arc<ColumnMap>,
    values: csv::StringRecord,
}

impl RawRecord {
    pub fn new(row: u64, columns: Arc<ColumnMap>, values: csv::StringRecord) -> Self {
        Self {
            row,
            columns,
            values,
        }
    }

    /// Zero-based data-row number within the file
    pub fn row(&self) -> u64 {
        self.row
    }

    /// Raw cell for a canonical column, `None` when the layout lacks it
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .position(column)
            .and_then(|pos| self.values.get(pos))
    }

    /// Every header cell as a JSON object, keyed by source column name
    pub fn to_json(&self) -> serde_json::Value {
        let object = self
            .columns
            .header()
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.clone(), serde_json::Value::String(value.to_string())))
            .collect();
        serde_json::Value::Object(object)
    }

    #[cfg(test)]
    pub(crate) fn from_pairs(row: u64, pairs: &[(&str, &str)]) -> Self {
        let names: Vec<&str> = pairs.iter().map(|(name, _)| *name).collect();
        let columns = ColumnMap::from_header(names.iter(), &names, &HashMap::new());
        let values = pairs.iter().map(|(_, value)| *value).collect();
        Self::new(row, Arc::new(columns), values)
    }
}

/// Where the next unread record starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Data rows consumed so far
    pub row_offset: u64,
    pub byte: u64,
    pub line: u64,
}

/// A batch of raw rows plus the position right after the last one
#[derive(Debug)]
pub struct RawChunk {
    pub rows: Vec<std::result::Result<RawRecord, RecordError>>,
    pub end: SourcePosition,
}

// ============================================================================
// Checkpoints and job state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl CheckpointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Running => "running",
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::Stopped => "stopped",
        }
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(CheckpointStatus::Running),
            "completed" => Ok(CheckpointStatus::Completed),
            "failed" => Ok(CheckpointStatus::Failed),
            "stopped" => Ok(CheckpointStatus::Stopped),
            other => Err(format!("unknown checkpoint status '{other}'")),
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted progress marker of one job (maps to ingest_checkpoints)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_name: String,
    pub source_path: String,
    pub position: SourcePosition,
    /// Number of chunks committed by this job so far
    pub chunk_seq: u64,
    pub status: CheckpointStatus,
    pub run_id: Uuid,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn started(
        job_name: impl Into<String>,
        source_path: impl Into<String>,
        run_id: Uuid,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            source_path: source_path.into(),
            position: SourcePosition::default(),
            chunk_seq: 0,
            status: CheckpointStatus::Running,
            run_id,
            updated_at: Utc::now(),
        }
    }

    /// The checkpoint a chunk ending at `end` commits
    pub fn advanced(&self, end: SourcePosition) -> Self {
        Self {
            position: end,
            chunk_seq: self.chunk_seq + 1,
            status: CheckpointStatus::Running,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: CheckpointStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Whether a new run should continue from here instead of row 0
    pub fn is_resumable(&self) -> bool {
        self.status != CheckpointStatus::Completed
    }
}

/// Lifecycle of a pipeline instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Stopped
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters reported when a run ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_name: String,
    pub run_id: Uuid,
    pub state: JobState,
    pub rows_read: u64,
    pub rows_normalized: u64,
    /// Rows dropped because their natural key did not parse
    pub rows_skipped: u64,
    pub rows_malformed: u64,
    pub rows_written: u64,
    pub chunks_committed: u64,
    pub chunks_failed: u64,
    /// Data-row offset this run started from
    pub resume_offset: u64,
    /// Data-row offset of the last committed checkpoint
    pub last_committed_offset: u64,
    pub error: Option<String>,
}

impl JobSummary {
    pub fn new(job_name: impl Into<String>, run_id: Uuid, resume_offset: u64) -> Self {
        Self {
            job_name: job_name.into(),
            run_id,
            state: JobState::Running,
            rows_read: 0,
            rows_normalized: 0,
            rows_skipped: 0,
            rows_malformed: 0,
            rows_written: 0,
            chunks_committed: 0,
            chunks_failed: 0,
            resume_offset,
            last_committed_offset: resume_offset,
            error: None,
        }
    }

    pub fn record_error(&mut self, error: &RecordError) {
        match error {
            RecordError::InvalidKey { .. } => self.rows_skipped += 1,
            RecordError::Malformed { .. } => self.rows_malformed += 1,
        }
    }
}

// ============================================================================
// Stage traits
// ============================================================================

/// Opens a fresh reader over the source, positioned at `resume_from`
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, resume_from: Option<SourcePosition>) -> Result<Box<dyn RawSource>>;

    /// Identifies the source in checkpoints
    fn source_path(&self) -> String;
}

/// Forward-only stream of raw rows, pulled one chunk at a time
#[async_trait]
pub trait RawSource: Send {
    /// Up to `max` rows, or `None` once the source is exhausted
    async fn next_chunk(&mut self, max: usize) -> Result<Option<RawChunk>>;
}

/// Turns one raw row into an entity
pub trait Normalizer<E>: Send + Sync {
    fn normalize(&self, raw: &RawRecord) -> std::result::Result<E, RecordError>;
}

/// Persists one chunk and its checkpoint atomically
#[async_trait]
pub trait ChunkWriter<E>: Send + Sync {
    /// Returns the number of rows the upsert touched
    async fn write_chunk(&self, entities: &[E], checkpoint: &Checkpoint) -> Result<u64>;
}

/// Checkpoint persistence outside of chunk transactions
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, job_name: &str) -> Result<Option<Checkpoint>>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn list(&self) -> Result<Vec<Checkpoint>>;

    /// Returns whether a checkpoint existed
    async fn delete(&self, job_name: &str) -> Result<bool>;
}

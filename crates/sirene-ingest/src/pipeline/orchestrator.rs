//! Pipeline orchestrator
//!
//! Drives reader -> normalizer -> writer one chunk at a time on a single task.
//! This is the only place that moves a job between [`JobState`]s:
//!
//! ```text
//! Idle -> Running -> Completed
//!                 -> Failed    (chunk rolled back, or fatal error)
//!                 -> Stopped   (stop requested, honored between chunks)
//! ```
//!
//! Every committed chunk advances the checkpoint in the same transaction, so a
//! new run of the same job resumes right after the last committed chunk.

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::types::{
    Checkpoint, CheckpointStatus, CheckpointStore, ChunkWriter, JobState, JobSummary, Normalizer,
    RawRecord, SourceOpener,
};
use crate::error::{IngestError, RecordError, Result};

/// Record-level problems logged at `warn` before dropping to `debug`
const RECORD_WARN_LIMIT: u64 = 20;

/// Requests a running pipeline to halt after its in-flight chunk
#[derive(Debug, Clone)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn stop(&self) {
        self.0.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// One ingestion job over one source, for one entity type
pub struct Pipeline<E> {
    job_name: String,
    chunk_size: usize,
    from_start: bool,
    opener: Box<dyn SourceOpener>,
    normalizer: Box<dyn Normalizer<E>>,
    writer: Box<dyn ChunkWriter<E>>,
    checkpoints: Arc<dyn CheckpointStore>,
    state: watch::Sender<JobState>,
    stop: CancellationToken,
}

/// Builder for [`Pipeline`]; every stage is required
pub struct PipelineBuilder<E> {
    job_name: String,
    chunk_size: usize,
    from_start: bool,
    opener: Option<Box<dyn SourceOpener>>,
    normalizer: Option<Box<dyn Normalizer<E>>>,
    writer: Option<Box<dyn ChunkWriter<E>>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
}

impl<E> PipelineBuilder<E> {
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Ignore any stored checkpoint and start from the first data row
    pub fn from_start(mut self, from_start: bool) -> Self {
        self.from_start = from_start;
        self
    }

    pub fn opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.opener = Some(Box::new(opener));
        self
    }

    pub fn normalizer(mut self, normalizer: impl Normalizer<E> + 'static) -> Self {
        self.normalizer = Some(Box::new(normalizer));
        self
    }

    pub fn writer(mut self, writer: impl ChunkWriter<E> + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn build(self) -> Result<Pipeline<E>> {
        if self.job_name.trim().is_empty() {
            return Err(IngestError::config("job name must not be empty"));
        }
        if self.chunk_size == 0 {
            return Err(IngestError::config("chunk size must be greater than 0"));
        }

        let missing = |stage: &str| IngestError::config(format!("pipeline has no {stage}"));
        let (state, _) = watch::channel(JobState::Idle);

        Ok(Pipeline {
            job_name: self.job_name,
            chunk_size: self.chunk_size,
            from_start: self.from_start,
            opener: self.opener.ok_or_else(|| missing("source opener"))?,
            normalizer: self.normalizer.ok_or_else(|| missing("normalizer"))?,
            writer: self.writer.ok_or_else(|| missing("chunk writer"))?,
            checkpoints: self.checkpoints.ok_or_else(|| missing("checkpoint store"))?,
            state,
            stop: CancellationToken::new(),
        })
    }
}

impl<E: Send + Sync + 'static> Pipeline<E> {
    pub fn builder(job_name: impl Into<String>) -> PipelineBuilder<E> {
        PipelineBuilder {
            job_name: job_name.into(),
            chunk_size: crate::sirene::DEFAULT_CHUNK_SIZE,
            from_start: false,
            opener: None,
            normalizer: None,
            writer: None,
            checkpoints: None,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Watch state transitions from another task
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// A stopped pipeline stays stopped; resume with a new instance
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    /// Run (or resume) the job until completion, failure or stop.
    ///
    /// A chunk that fails to commit ends the run with a `Failed` summary.
    /// Fatal errors (I/O, configuration, missing key column, checkpoint
    /// mismatch) are returned as `Err` and also leave the job `Failed`.
    pub async fn run(&mut self) -> Result<JobSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("ingest_job", job = %self.job_name, %run_id);

        async {
            self.state.send_replace(JobState::Running);
            let result = self.execute(run_id).await;

            match &result {
                Ok(summary) => {
                    info!(
                        state = %summary.state,
                        rows_read = summary.rows_read,
                        rows_written = summary.rows_written,
                        rows_skipped = summary.rows_skipped,
                        rows_malformed = summary.rows_malformed,
                        chunks = summary.chunks_committed,
                        offset = summary.last_committed_offset,
                        "Job finished"
                    );
                    self.state.send_replace(summary.state);
                }
                Err(e) => {
                    error!(error = %e, "Job aborted");
                    self.state.send_replace(JobState::Failed);
                }
            }

            result
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, run_id: Uuid) -> Result<JobSummary> {
        let source_path = self.opener.source_path();

        let previous = if self.from_start {
            None
        } else {
            self.checkpoints.load(&self.job_name).await?
        };

        if let Some(previous) = &previous {
            if previous.source_path != source_path {
                return Err(IngestError::CheckpointMismatch {
                    job: self.job_name.clone(),
                    recorded: previous.source_path.clone(),
                    configured: source_path,
                });
            }
        }

        let mut checkpoint = match previous.filter(Checkpoint::is_resumable) {
            Some(previous) => Checkpoint {
                run_id,
                ..previous.with_status(CheckpointStatus::Running)
            },
            None => Checkpoint::started(&self.job_name, &source_path, run_id),
        };
        self.checkpoints.save(&checkpoint).await?;

        let mut summary = JobSummary::new(&self.job_name, run_id, checkpoint.position.row_offset);
        info!(
            path = %source_path,
            offset = summary.resume_offset,
            chunk_size = self.chunk_size,
            "Job started"
        );

        let outcome = self.drive(&mut checkpoint, &mut summary).await;

        match outcome {
            Ok(state) => {
                let status = match state {
                    JobState::Stopped => CheckpointStatus::Stopped,
                    _ => CheckpointStatus::Completed,
                };
                self.checkpoints.save(&checkpoint.with_status(status)).await?;
                summary.state = state;
                Ok(summary)
            }
            Err(e) => {
                self.mark_failed(&checkpoint).await;

                if !e.is_chunk_level() {
                    return Err(e);
                }

                error!(
                    error = %e,
                    offset = summary.last_committed_offset,
                    "Chunk rolled back; restart resumes from the last checkpoint"
                );
                summary.chunks_failed += 1;
                summary.state = JobState::Failed;
                summary.error = Some(e.to_string());
                Ok(summary)
            }
        }
    }

    /// Chunk loop; returns the terminal state on a clean exit
    async fn drive(&self, checkpoint: &mut Checkpoint, summary: &mut JobSummary) -> Result<JobState> {
        // Position 0 is not a record boundary once a header has been read
        let resume_from = (checkpoint.chunk_seq > 0).then_some(checkpoint.position);
        let mut source = self.opener.open(resume_from).await?;

        loop {
            if self.stop.is_cancelled() {
                info!(offset = checkpoint.position.row_offset, "Stop requested, halting");
                return Ok(JobState::Stopped);
            }

            let Some(chunk) = source.next_chunk(self.chunk_size).await? else {
                return Ok(JobState::Completed);
            };

            let next = checkpoint.advanced(chunk.end);
            let entities = self.normalize_chunk(chunk.rows, summary);

            let written = self.writer.write_chunk(&entities, &next).await?;
            *checkpoint = next;

            summary.rows_written += written;
            summary.chunks_committed += 1;
            summary.last_committed_offset = checkpoint.position.row_offset;

            info!(
                chunk = checkpoint.chunk_seq,
                rows = entities.len(),
                written,
                offset = checkpoint.position.row_offset,
                "Chunk committed"
            );
        }
    }

    fn normalize_chunk(
        &self,
        rows: Vec<std::result::Result<RawRecord, RecordError>>,
        summary: &mut JobSummary,
    ) -> Vec<E> {
        let mut entities = Vec::with_capacity(rows.len());

        for row in rows {
            summary.rows_read += 1;

            match row.and_then(|raw| self.normalizer.normalize(&raw)) {
                Ok(entity) => {
                    summary.rows_normalized += 1;
                    entities.push(entity);
                }
                Err(e) => {
                    summary.record_error(&e);
                    if summary.rows_skipped + summary.rows_malformed <= RECORD_WARN_LIMIT {
                        warn!(row = e.row(), error = %e, "Skipping record");
                    } else {
                        debug!(row = e.row(), error = %e, "Skipping record");
                    }
                }
            }
        }

        entities
    }

    async fn mark_failed(&self, checkpoint: &Checkpoint) {
        let failed = checkpoint.with_status(CheckpointStatus::Failed);
        if let Err(e) = self.checkpoints.save(&failed).await {
            warn!(error = %e, "Could not record failed status on checkpoint");
        }
    }
}

//! Checkpoint persistence (ingest_checkpoints table)
//!
//! Chunk commits write the checkpoint through [`save_checkpoint`] on the
//! chunk's own transaction. [`PgCheckpointStore`] covers everything outside
//! of a chunk: loading at start, status changes, listing and reset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::types::{Checkpoint, CheckpointStatus, CheckpointStore, SourcePosition};
use crate::error::{IngestError, Result};

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    job_name: String,
    source_path: String,
    row_offset: i64,
    byte_offset: i64,
    line: i64,
    chunk_seq: i64,
    status: String,
    run_id: Uuid,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = IngestError;

    fn try_from(row: CheckpointRow) -> Result<Self> {
        let status = row.status.parse::<CheckpointStatus>().map_err(IngestError::Config)?;

        Ok(Checkpoint {
            job_name: row.job_name,
            source_path: row.source_path,
            position: SourcePosition {
                row_offset: unsigned(row.row_offset),
                byte: unsigned(row.byte_offset),
                line: unsigned(row.line),
            },
            chunk_seq: unsigned(row.chunk_seq),
            status,
            run_id: row.run_id,
            updated_at: row.updated_at,
        })
    }
}

fn unsigned(value: i64) -> u64 {
    value.max(0) as u64
}

const SELECT_CHECKPOINT: &str = r#"
    SELECT job_name, source_path, row_offset, byte_offset, line, chunk_seq,
           status, run_id, updated_at
    FROM ingest_checkpoints
"#;

/// Upsert a checkpoint on an existing connection or transaction
pub async fn save_checkpoint(conn: &mut PgConnection, checkpoint: &Checkpoint) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingest_checkpoints
            (job_name, source_path, row_offset, byte_offset, line, chunk_seq, status, run_id, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (job_name)
        DO UPDATE SET
            source_path = EXCLUDED.source_path,
            row_offset = EXCLUDED.row_offset,
            byte_offset = EXCLUDED.byte_offset,
            line = EXCLUDED.line,
            chunk_seq = EXCLUDED.chunk_seq,
            status = EXCLUDED.status,
            run_id = EXCLUDED.run_id,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(&checkpoint.job_name)
    .bind(&checkpoint.source_path)
    .bind(checkpoint.position.row_offset as i64)
    .bind(checkpoint.position.byte as i64)
    .bind(checkpoint.position.line as i64)
    .bind(checkpoint.chunk_seq as i64)
    .bind(checkpoint.status.as_str())
    .bind(checkpoint.run_id)
    .bind(checkpoint.updated_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// [`CheckpointStore`] backed by PostgreSQL
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, job_name: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            "{SELECT_CHECKPOINT} WHERE job_name = $1"
        ))
        .bind(job_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Checkpoint::try_from).transpose()
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        save_checkpoint(&mut conn, checkpoint).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            "{SELECT_CHECKPOINT} ORDER BY job_name"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Checkpoint::try_from).collect()
    }

    async fn delete(&self, job_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ingest_checkpoints WHERE job_name = $1")
            .bind(job_name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> CheckpointRow {
        CheckpointRow {
            job_name: "job".into(),
            source_path: "/data/StockUniteLegale.csv".into(),
            row_offset: 4000,
            byte_offset: 812_345,
            line: 4001,
            chunk_seq: 2,
            status: status.into(),
            run_id: Uuid::nil(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let checkpoint = Checkpoint::try_from(row("failed")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(checkpoint.status, CheckpointStatus::Failed);
        assert_eq!(checkpoint.position.row_offset, 4000);
        assert_eq!(checkpoint.position.byte, 812_345);
        assert_eq!(checkpoint.chunk_seq, 2);
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        assert!(Checkpoint::try_from(row("paused")).is_err());
    }
}

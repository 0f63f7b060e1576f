//! Batch upsert writer
//!
//! One chunk is one transaction holding a single multi-row
//! `INSERT .. ON CONFLICT DO UPDATE` and the checkpoint upsert.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::debug;

use super::checkpoint::save_checkpoint;
use super::types::{Checkpoint, ChunkWriter};
use crate::error::{IngestError, Result};
use crate::sirene::{SireneRecord, MAX_BIND_PARAMS};

/// [`ChunkWriter`] upserting entities of type `E` into PostgreSQL
pub struct PgChunkWriter<E> {
    pool: PgPool,
    _entity: PhantomData<fn(&E)>,
}

impl<E> PgChunkWriter<E> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }
}

impl<E: SireneRecord> PgChunkWriter<E> {
    async fn write(&self, entities: &[E], checkpoint: &Checkpoint) -> sqlx::Result<u64> {
        let rows = last_occurrences(entities);
        if rows.len() < entities.len() {
            debug!(
                chunk = checkpoint.chunk_seq,
                collapsed = entities.len() - rows.len(),
                "Collapsed duplicate keys within chunk"
            );
        }

        let mut tx = self.pool.begin().await?;

        let mut written = 0;
        if !rows.is_empty() {
            let mut query_builder = upsert_statement(&rows);
            written = query_builder.build().execute(&mut *tx).await?.rows_affected();
        }

        save_checkpoint(&mut tx, checkpoint).await?;
        tx.commit().await?;

        Ok(written)
    }
}

#[async_trait]
impl<E: SireneRecord> ChunkWriter<E> for PgChunkWriter<E> {
    async fn write_chunk(&self, entities: &[E], checkpoint: &Checkpoint) -> Result<u64> {
        if entities.len() * E::COLUMNS.len() > MAX_BIND_PARAMS {
            return Err(IngestError::config(format!(
                "chunk of {} {} rows exceeds the bind parameter limit",
                entities.len(),
                E::KIND
            )));
        }

        self.write(entities, checkpoint)
            .await
            .map_err(|source| IngestError::ChunkWrite {
                chunk: checkpoint.chunk_seq,
                source,
            })
    }
}

/// Keep only the last occurrence of every key, in file order
fn last_occurrences<E: SireneRecord>(entities: &[E]) -> Vec<&E> {
    let last: HashMap<&str, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, entity)| (entity.key(), i))
        .collect();

    entities
        .iter()
        .enumerate()
        .filter(|(i, entity)| last.get(entity.key()) == Some(i))
        .map(|(_, entity)| entity)
        .collect()
}

/// Full replace-on-conflict upsert for one chunk
fn upsert_statement<'a, E: SireneRecord>(rows: &[&'a E]) -> QueryBuilder<'a, Postgres> {
    let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        E::TABLE,
        E::COLUMNS.join(", ")
    ));

    query_builder.push_values(rows.iter().copied(), |b, entity| entity.push_binds(b));

    let updates: Vec<String> = E::COLUMNS
        .iter()
        .filter(|&&column| column != E::KEY_COLUMN)
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect();

    query_builder.push(format!(
        " ON CONFLICT ({}) DO UPDATE SET {}, updated_at = now()",
        E::KEY_COLUMN,
        updates.join(", ")
    ));

    query_builder
}

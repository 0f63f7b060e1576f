//! Shared fixtures for integration tests

#![allow(dead_code, clippy::unwrap_used)]

use sirene_ingest::pipeline::types::{Checkpoint, ColumnMap, RawRecord, SourcePosition};
use sirene_ingest::sirene::{FieldOptions, FromRawRecord};
use sirene_ingest::{Establishment, LegalUnit};
use sqlx::PgPool;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const LEGAL_UNIT_HEADER: &str = "siren,denominationUniteLegale,categorieJuridiqueUniteLegale,activitePrincipaleUniteLegale,dateCreationUniteLegale,economieSocialeSolidaireUniteLegale";

fn raw(pairs: &[(&str, &str)], canonical: &[&str]) -> RawRecord {
    let names: Vec<&str> = pairs.iter().map(|(name, _)| *name).collect();
    let columns = ColumnMap::from_header(names.iter(), canonical, &HashMap::new());
    let values: csv::StringRecord = pairs.iter().map(|(_, value)| *value).collect();
    RawRecord::new(0, Arc::new(columns), values)
}

pub fn legal_unit(pairs: &[(&str, &str)]) -> LegalUnit {
    let raw = raw(pairs, <LegalUnit as sirene_ingest::sirene::SireneRecord>::SOURCE_COLUMNS);
    LegalUnit::from_raw(&raw, &FieldOptions::default()).unwrap()
}

pub fn establishment(pairs: &[(&str, &str)]) -> Establishment {
    let raw = raw(pairs, <Establishment as sirene_ingest::sirene::SireneRecord>::SOURCE_COLUMNS);
    Establishment::from_raw(&raw, &FieldOptions::default()).unwrap()
}

/// Checkpoint a chunk ending at data row `row_offset` would commit
pub fn checkpoint(job: &str, chunk_seq: u64, row_offset: u64) -> Checkpoint {
    let mut checkpoint = Checkpoint::started(job, "/data/StockUniteLegale.csv", Uuid::new_v4());
    checkpoint.chunk_seq = chunk_seq - 1;
    checkpoint.advanced(SourcePosition {
        row_offset,
        byte: row_offset * 64,
        line: row_offset + 1,
    })
}

pub fn csv_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{line}").unwrap();
    }
    file.flush().unwrap();
    file
}

pub async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

//! End-to-end runs: CSV file -> normalizer -> PostgreSQL, with resume

use sirene_ingest::pipeline::{CheckpointStatus, CheckpointStore, PgCheckpointStore};
use sirene_ingest::sirene::RawPayloadMode;
use sirene_ingest::{pg_pipeline, Establishment, IngestConfig, IngestError, JobState, LegalUnit};
use sqlx::PgPool;

mod helpers;
use helpers::{count, csv_file, LEGAL_UNIT_HEADER};

const JOB: &str = "sirene-unite-legale";

fn small_chunks() -> IngestConfig {
    IngestConfig::builder().chunk_size(2).build().unwrap()
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_full_run_then_idempotent_rerun(pool: PgPool) -> anyhow::Result<()> {
    let file = csv_file(&[
        LEGAL_UNIT_HEADER,
        "552100554,RENAULT,5710,29.10Z,1955-01-01,N",
        "542065479,PEUGEOT,5599,29.10Z,1896,N",
        "12345,TRUNCATED SIREN,5710,,,",
        "775665019,DANONE,5599,10.51A,1899-05,O",
        "383474814,AIRBUS,5710,30.30Z,,N",
    ]);
    let config = small_chunks();

    let summary = pg_pipeline::<LegalUnit>(JOB, file.path(), &config, pool.clone(), false)?
        .run()
        .await?;

    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(summary.rows_read, 5);
    assert_eq!(summary.rows_normalized, 4);
    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(summary.rows_written, 4);
    assert_eq!(summary.chunks_committed, 3);
    assert_eq!(summary.last_committed_offset, 5);
    assert_eq!(count(&pool, "sirene.unite_legale").await, 4);

    let date_creation: Option<chrono::NaiveDate> =
        sqlx::query_scalar("SELECT date_creation FROM sirene.unite_legale WHERE siren = $1")
            .bind("542065479")
            .fetch_one(&pool)
            .await?;
    assert_eq!(date_creation, chrono::NaiveDate::from_ymd_opt(1896, 1, 1));

    let store = PgCheckpointStore::new(pool.clone());
    let checkpoint = store.load(JOB).await?.expect("checkpoint");
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.position.row_offset, 5);

    // A completed job starts over and converges to the same rows
    let rerun = pg_pipeline::<LegalUnit>(JOB, file.path(), &config, pool.clone(), false)?
        .run()
        .await?;
    assert_eq!(rerun.state, JobState::Completed);
    assert_eq!(rerun.resume_offset, 0);
    assert_eq!(rerun.rows_read, 5);
    assert_eq!(count(&pool, "sirene.unite_legale").await, 4);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_failed_chunk_resumes_from_last_checkpoint(pool: PgPool) -> anyhow::Result<()> {
    let file = csv_file(&[
        LEGAL_UNIT_HEADER,
        "552100554,RENAULT,5710,29.10Z,1955-01-01,N",
        "542065479,PEUGEOT,5599,29.10Z,1896,N",
        "775665019,DANONE,12345,10.51A,1899-05,O",
        "383474814,AIRBUS,5710,30.30Z,,N",
        "356000000,LA POSTE,5510,53.10Z,1991-01-01,N",
    ]);
    let config = small_chunks();

    let failed = pg_pipeline::<LegalUnit>(JOB, file.path(), &config, pool.clone(), false)?
        .run()
        .await?;

    assert_eq!(failed.state, JobState::Failed);
    assert_eq!(failed.chunks_committed, 1);
    assert_eq!(failed.chunks_failed, 1);
    assert_eq!(failed.last_committed_offset, 2);
    assert!(failed.error.is_some());
    assert_eq!(count(&pool, "sirene.unite_legale").await, 2);

    let store = PgCheckpointStore::new(pool.clone());
    let checkpoint = store.load(JOB).await?.expect("checkpoint");
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    assert_eq!(checkpoint.position.row_offset, 2);
    assert_eq!(checkpoint.chunk_seq, 1);

    // Fix the cause, then restart
    sqlx::query("ALTER TABLE sirene.unite_legale ALTER COLUMN categorie_juridique TYPE VARCHAR(5)")
        .execute(&pool)
        .await?;

    let resumed = pg_pipeline::<LegalUnit>(JOB, file.path(), &config, pool.clone(), false)?
        .run()
        .await?;

    assert_eq!(resumed.state, JobState::Completed);
    assert_eq!(resumed.resume_offset, 2);
    assert_eq!(resumed.rows_read, 3);
    assert_eq!(resumed.chunks_committed, 2);
    assert_eq!(resumed.last_committed_offset, 5);
    assert_eq!(count(&pool, "sirene.unite_legale").await, 5);

    let checkpoint = store.load(JOB).await?.expect("checkpoint");
    assert_eq!(checkpoint.chunk_seq, 3);
    assert_eq!(checkpoint.run_id, resumed.run_id);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_establishment_file_with_semicolons_and_raw_payload(pool: PgPool) -> anyhow::Result<()> {
    let file = csv_file(&[
        "siren;nic;etablissementSiege;codePostalEtablissement;libelleCommuneEtablissement",
        "552100554;00013;true;92100;BOULOGNE-BILLANCOURT",
        "542065479;00011;false;01000;BOURG-EN-BRESSE",
        "542065479;123;false;01000;BOURG-EN-BRESSE",
    ]);
    let config = IngestConfig::builder()
        .delimiter(b';')
        .raw_payload(RawPayloadMode::Row)
        .build()?;

    let summary = pg_pipeline::<Establishment>("etab", file.path(), &config, pool.clone(), false)?
        .run()
        .await?;

    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.rows_skipped, 1);

    let (code_postal, raw_code_postal): (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT code_postal, raw->>'codePostalEtablissement' FROM sirene.etablissement WHERE siret = $1",
    )
    .bind("54206547900011")
    .fetch_one(&pool)
    .await?;
    assert_eq!(code_postal.as_deref(), Some("01000"));
    assert_eq!(raw_code_postal.as_deref(), Some("01000"));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_missing_key_column_is_fatal(pool: PgPool) -> anyhow::Result<()> {
    let file = csv_file(&["denominationUniteLegale,sigleUniteLegale", "RENAULT,RNO"]);

    let mut pipeline =
        pg_pipeline::<LegalUnit>(JOB, file.path(), &small_chunks(), pool.clone(), false)?;
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, IngestError::MissingKeyColumn { ref column, .. } if column == "siren"));
    assert_eq!(pipeline.state(), JobState::Failed);
    assert_eq!(count(&pool, "sirene.unite_legale").await, 0);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_checkpoint_for_other_source_is_rejected(pool: PgPool) -> anyhow::Result<()> {
    let first = csv_file(&[LEGAL_UNIT_HEADER, "552100554,RENAULT,5710,29.10Z,1955-01-01,N"]);
    let second = csv_file(&[LEGAL_UNIT_HEADER, "542065479,PEUGEOT,5599,29.10Z,1896,N"]);
    let config = small_chunks();

    pg_pipeline::<LegalUnit>(JOB, first.path(), &config, pool.clone(), false)?
        .run()
        .await?;

    let err = pg_pipeline::<LegalUnit>(JOB, second.path(), &config, pool.clone(), false)?
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::CheckpointMismatch { .. }));

    let checkpoint = PgCheckpointStore::new(pool.clone())
        .load(JOB)
        .await?
        .expect("checkpoint");
    assert_eq!(checkpoint.source_path, first.path().display().to_string());
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);

    // --from-start ignores the recorded source
    let summary = pg_pipeline::<LegalUnit>(JOB, second.path(), &config, pool.clone(), true)?
        .run()
        .await?;
    assert_eq!(summary.state, JobState::Completed);
    assert_eq!(count(&pool, "sirene.unite_legale").await, 2);

    Ok(())
}

//! Checkpoint store persistence

use sirene_ingest::pipeline::{CheckpointStatus, CheckpointStore, PgCheckpointStore};
use sqlx::PgPool;

mod helpers;
use helpers::checkpoint;

#[sqlx::test(migrations = "../../migrations")]
async fn test_load_missing_checkpoint(pool: PgPool) -> anyhow::Result<()> {
    let store = PgCheckpointStore::new(pool);
    assert!(store.load("sirene-unite-legale").await?.is_none());
    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_save_and_load_round_trip(pool: PgPool) -> anyhow::Result<()> {
    let store = PgCheckpointStore::new(pool);
    let saved = checkpoint("sirene-unite-legale", 3, 6000);

    store.save(&saved).await?;
    let loaded = store.load("sirene-unite-legale").await?.expect("saved checkpoint");

    assert_eq!(loaded.job_name, saved.job_name);
    assert_eq!(loaded.source_path, saved.source_path);
    assert_eq!(loaded.position, saved.position);
    assert_eq!(loaded.chunk_seq, 3);
    assert_eq!(loaded.status, CheckpointStatus::Running);
    assert_eq!(loaded.run_id, saved.run_id);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_save_overwrites_single_row_per_job(pool: PgPool) -> anyhow::Result<()> {
    let store = PgCheckpointStore::new(pool.clone());

    store.save(&checkpoint("job", 1, 2000)).await?;
    store
        .save(&checkpoint("job", 2, 4000).with_status(CheckpointStatus::Failed))
        .await?;

    let loaded = store.load("job").await?.expect("checkpoint");
    assert_eq!(loaded.position.row_offset, 4000);
    assert_eq!(loaded.status, CheckpointStatus::Failed);
    assert!(loaded.is_resumable());
    assert_eq!(helpers::count(&pool, "ingest_checkpoints").await, 1);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_list_and_delete(pool: PgPool) -> anyhow::Result<()> {
    let store = PgCheckpointStore::new(pool);

    store.save(&checkpoint("sirene-unite-legale", 1, 10)).await?;
    store
        .save(&checkpoint("sirene-etablissement", 4, 40).with_status(CheckpointStatus::Completed))
        .await?;

    let names: Vec<String> = store.list().await?.into_iter().map(|c| c.job_name).collect();
    assert_eq!(names, vec!["sirene-etablissement", "sirene-unite-legale"]);

    assert!(store.delete("sirene-etablissement").await?);
    assert!(!store.delete("sirene-etablissement").await?);
    assert_eq!(store.list().await?.len(), 1);

    Ok(())
}

//! SIRENE ingest - bulk loader for the SIRENE stock files

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sirene_common::logging::{init_logging, LogConfig, LogLevel};
use sirene_ingest::config::{parse_delimiter, IngestConfig};
use sirene_ingest::db::{create_pool, health_check, DbConfig};
use sirene_ingest::lookup::{LookupConfig, RegistryClient};
use sirene_ingest::pipeline::{CheckpointStore, PgCheckpointStore};
use sirene_ingest::{
    pg_pipeline, EntityKind, Establishment, JobState, JobSummary, LegalUnit, Pipeline,
};
use sqlx::PgPool;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sirene-ingest")]
#[command(author, version, about = "SIRENE stock file ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run or resume an ingestion job
    Run {
        /// Entity type of the file (legal-unit or establishment)
        #[arg(short, long)]
        kind: EntityKind,

        /// Path to the stock file
        #[arg(short, long, env = "SIRENE_FILE")]
        file: PathBuf,

        /// Job name (checkpoint key); defaults to one job per entity type
        #[arg(short, long)]
        job: Option<String>,

        /// Records per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Field delimiter
        #[arg(long)]
        delimiter: Option<String>,

        /// Ignore any checkpoint and start from the first row
        #[arg(long)]
        from_start: bool,
    },

    /// Show stored checkpoints
    Status {
        #[arg(short, long)]
        job: Option<String>,
    },

    /// Delete a checkpoint so the next run starts from the beginning
    Reset {
        #[arg(short, long)]
        job: String,
    },

    /// Fetch one record from the remote registry
    Lookup {
        #[arg(long, conflicts_with = "siret", required_unless_present = "siret")]
        siren: Option<String>,

        #[arg(long)]
        siret: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sirene-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run {
            kind,
            file,
            job,
            chunk_size,
            delimiter,
            from_start,
        } => {
            let mut config = IngestConfig::from_env()?;
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            if let Some(delimiter) = delimiter {
                config.reader.delimiter = parse_delimiter(&delimiter)?;
            }
            config.validate()?;

            let pool = connect().await?;
            let job = job.unwrap_or_else(|| kind.default_job_name().to_string());

            info!(%job, %kind, file = %file.display(), "Starting ingestion");

            let summary = match kind {
                EntityKind::LegalUnit => {
                    run_job(pg_pipeline::<LegalUnit>(job, file, &config, pool, from_start)?).await?
                }
                EntityKind::Establishment => {
                    run_job(pg_pipeline::<Establishment>(job, file, &config, pool, from_start)?)
                        .await?
                }
            };

            print_summary(&summary);

            if summary.state == JobState::Failed {
                bail!(
                    "job '{}' failed; rerun to resume from row {}",
                    summary.job_name,
                    summary.last_committed_offset
                );
            }
        }
        Command::Status { job } => {
            let store = PgCheckpointStore::new(connect().await?);
            let checkpoints = store.list().await?;

            println!(
                "{:<28} {:<10} {:>12} {:>8}  {}",
                "JOB", "STATUS", "OFFSET", "CHUNKS", "SOURCE"
            );
            for checkpoint in checkpoints
                .iter()
                .filter(|c| job.as_deref().is_none_or(|job| c.job_name == job))
            {
                println!(
                    "{:<28} {:<10} {:>12} {:>8}  {}",
                    checkpoint.job_name,
                    checkpoint.status,
                    checkpoint.position.row_offset,
                    checkpoint.chunk_seq,
                    checkpoint.source_path
                );
            }
        }
        Command::Reset { job } => {
            let store = PgCheckpointStore::new(connect().await?);
            if store.delete(&job).await? {
                info!(%job, "Checkpoint deleted");
                println!("Checkpoint for '{job}' deleted");
            } else {
                println!("No checkpoint for '{job}'");
            }
        }
        Command::Lookup { siren, siret } => {
            let client = RegistryClient::new(LookupConfig::from_env()?)?;
            let body = match (siren, siret) {
                (Some(siren), _) => client.unite_legale(&siren).await?,
                (None, Some(siret)) => client.etablissement(&siret).await?,
                (None, None) => bail!("either --siren or --siret is required"),
            };
            println!("{body}");
        }
    }

    Ok(())
}

async fn connect() -> Result<PgPool> {
    let db_config = DbConfig::from_env()?;
    let pool = create_pool(&db_config)
        .await
        .context("Failed to connect to database")?;
    health_check(&pool).await.context("Database health check failed")?;
    Ok(pool)
}

/// Run a pipeline, turning Ctrl-C into a stop request
async fn run_job<E: Send + Sync + 'static>(mut pipeline: Pipeline<E>) -> Result<JobSummary> {
    let stop = pipeline.stop_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current chunk");
            stop.stop();
        }
    });

    let result = pipeline.run().await;
    interrupt.abort();

    result.with_context(|| format!("job '{}' aborted", pipeline.job_name()))
}

fn print_summary(summary: &JobSummary) {
    println!("Job:              {}", summary.job_name);
    println!("Run:              {}", summary.run_id);
    println!("State:            {}", summary.state);
    println!("Rows read:        {}", summary.rows_read);
    println!("Rows normalized:  {}", summary.rows_normalized);
    println!("Rows skipped:     {}", summary.rows_skipped);
    println!("Rows malformed:   {}", summary.rows_malformed);
    println!("Rows written:     {}", summary.rows_written);
    println!("Chunks committed: {}", summary.chunks_committed);
    println!("Chunks failed:    {}", summary.chunks_failed);
    println!("Resumed at row:   {}", summary.resume_offset);
    println!("Committed to row: {}", summary.last_committed_offset);
    if let Some(error) = &summary.error {
        println!("Error:            {error}");
    }
}

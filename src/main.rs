//! # Shikin CLI
//!
//! The `shikin` binary drives the ingestion pipeline for Japanese
//! political-funding disclosure reports.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shikin init` | Create the SQLite database and run schema migrations |
//! | `shikin upload <files…>` | Upload PDFs and process them |
//! | `shikin process <ids…>` | Advance specific documents (`--reprocess` to redo) |
//! | `shikin batch` | Run one scheduler batch over retry-eligible documents |
//! | `shikin schedule` | Run batches on the configured cron expression |
//! | `shikin serve` | Start the HTTP trigger server |
//!
//! All commands read a TOML configuration via `--config`
//! (default `./config/shikin.toml`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use shikin::config::{load_config, Config};
use shikin::pipeline::{AdvanceOptions, Pipeline};
use shikin::storage::BlobStore;
use shikin::upload::{upload_document, UploadOutcome, PDF_MIME};
use shikin::{db, migrate, scheduler, server};

#[derive(Parser)]
#[command(
    name = "shikin",
    about = "Ingestion pipeline for Japanese political-funding disclosure reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shikin.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Upload one or more PDF reports and process each to completion.
    Upload {
        /// PDF files to upload.
        files: Vec<PathBuf>,
    },

    /// Advance specific documents through the pipeline.
    Process {
        /// Document ids.
        ids: Vec<String>,

        /// Reprocess even if already completed, replacing chunks and
        /// superseding financial records.
        #[arg(long)]
        reprocess: bool,
    },

    /// Run one batch over retry-eligible documents.
    Batch,

    /// Run batches on the configured cron expression until interrupted.
    Schedule,

    /// Start the HTTP trigger server.
    Serve,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "shikin=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn build_pipeline(config: Config) -> Result<Arc<Pipeline>> {
    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;
    let store = BlobStore::new(&config.storage.root)?;
    Ok(Arc::new(Pipeline::new(config, pool, store)?))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            BlobStore::new(&config.storage.root)?;
            println!("initialized database at {}", config.db.path.display());
            pool.close().await;
        }

        Commands::Upload { files } => {
            if files.is_empty() {
                anyhow::bail!("at least one file is required");
            }
            let pipeline = build_pipeline(config).await?;

            for path in files {
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                let bytes = std::fs::read(&path)?;

                match upload_document(&pipeline, &file_name, PDF_MIME, &bytes).await {
                    Ok(UploadOutcome::Created { document_id, .. }) => {
                        info!(%document_id, %file_name, "uploaded");
                        let outcome = pipeline
                            .advance(&document_id, AdvanceOptions::default())
                            .await;
                        print_outcome(&outcome);
                    }
                    Ok(UploadOutcome::ExistingFileName { document_id, status }) => {
                        println!(
                            "{}: file name already uploaded as {} (status: {})",
                            file_name, document_id, status
                        );
                    }
                    Err(e) => {
                        println!("{}: rejected — {}", file_name, e);
                    }
                }
            }
        }

        Commands::Process { ids, reprocess } => {
            if ids.is_empty() {
                anyhow::bail!("at least one document id is required");
            }
            let pipeline = build_pipeline(config).await?;
            let options = AdvanceOptions {
                force_reprocess: reprocess,
            };

            let mut tasks = tokio::task::JoinSet::new();
            for id in ids {
                let pipeline = pipeline.clone();
                tasks.spawn(async move { pipeline.advance(&id, options).await });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => print_outcome(&outcome),
                    Err(e) => println!("worker task failed: {}", e),
                }
            }
        }

        Commands::Batch => {
            let pipeline = build_pipeline(config).await?;
            let summary = scheduler::run_batch(pipeline).await?;
            println!("batch");
            println!("  selected: {}", summary.selected);
            println!("  succeeded: {}", summary.succeeded);
            println!("  failed: {}", summary.failed);
            for outcome in &summary.outcomes {
                print_outcome(outcome);
            }
        }

        Commands::Schedule => {
            let pipeline = build_pipeline(config).await?;
            scheduler::run_scheduled(pipeline).await?;
        }

        Commands::Serve => {
            let pipeline = build_pipeline(config).await?;
            server::run_server(pipeline).await?;
        }
    }

    Ok(())
}

fn print_outcome(outcome: &shikin::models::ItemOutcome) {
    if outcome.success {
        println!(
            "  {} ok — {}",
            outcome.document_id,
            outcome.message.as_deref().unwrap_or("done")
        );
    } else {
        println!(
            "  {} failed — {}",
            outcome.document_id,
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

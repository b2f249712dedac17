//! # finsight CLI
//!
//! ## Usage
//!
//! ```bash
//! finsight --config ./config/finsight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finsight init` | Create the SQLite database and job table |
//! | `finsight analyze <file>` | Analyze a PDF inline and print the report |
//! | `finsight submit <file>` | Stage a PDF and leave the job for workers |
//! | `finsight jobs list` | List jobs, newest first |
//! | `finsight jobs get <id>` | Print one job as JSON |
//! | `finsight serve` | Start the HTTP API |
//! | `finsight worker` | Process pending jobs until Ctrl-C |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finsight::config::{self, Config};
use finsight::jobs::{JobIntake, JobManager};
use finsight::models::JobStatus;
use finsight::store::{JobQuery, JobStore, SqliteJobStore};
use finsight::{db, migrate, queue, server, storage};

/// finsight: multi-stage LLM analysis of financial documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Secrets are read from the environment (or a `.env` file).
#[derive(Parser)]
#[command(name = "finsight", version, about = "Financial document analysis backend")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/finsight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and the job table. Safe to run repeatedly.
    Init,

    /// Run the full analysis on a PDF and print the final report.
    ///
    /// The file is copied into `[storage].upload_dir` first; the copy is
    /// removed when the job finishes.
    Analyze {
        file: PathBuf,

        /// Analysis question. Defaults to `[analysis].default_query`.
        #[arg(long)]
        query: Option<String>,
    },

    /// Stage a PDF and create a pending job for `finsight worker`.
    Submit {
        file: PathBuf,

        #[arg(long)]
        query: Option<String>,
    },

    /// Inspect stored jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Poll the database for pending jobs and run them.
    Worker {
        /// Worker name recorded on claimed jobs.
        #[arg(long)]
        id: Option<String>,
    },
}

#[derive(Subcommand)]
enum JobsAction {
    /// List jobs, newest first.
    List {
        /// Only jobs with this status (pending, processing, completed, failed).
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Print one job as JSON.
    Get { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "finsight=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Analyze { file, query } => {
            let manager = open_manager(&cfg).await?;
            let handle = storage::stage_document(&cfg.storage.upload_dir, &file)?;
            let original_name = display_name(&file);
            let job_id = manager
                .submit(query.as_deref(), &handle.path_str(), &original_name)
                .await?;
            let outcome = manager.run(&job_id, handle).await?;
            let job = manager.get(&job_id).await?;

            match (outcome.status, job.result()) {
                (JobStatus::Completed, Some(report)) => {
                    println!("{}", report);
                    if job.degraded() {
                        eprintln!("note: synthesis failed; the report is the raw stage outputs");
                    }
                }
                _ => anyhow::bail!(
                    "analysis of {} failed: {}",
                    original_name,
                    outcome.error.unwrap_or_default()
                ),
            }
        }
        Commands::Submit { file, query } => {
            // Submitting never talks to the LLM, so no provider credentials are needed.
            let intake = JobIntake::new(open_store(&cfg).await?, cfg.analysis.clone());
            let handle = storage::stage_document(&cfg.storage.upload_dir, &file)?;
            let job_id = intake
                .submit(query.as_deref(), &handle.path_str(), &display_name(&file))
                .await?;
            // The worker that claims the job removes the staged copy.
            handle.keep();
            println!("{}", job_id);
        }
        Commands::Jobs { action } => {
            let store = open_store(&cfg).await?;
            match action {
                JobsAction::List {
                    status,
                    limit,
                    offset,
                } => {
                    let jobs = store
                        .query(&JobQuery {
                            status,
                            limit,
                            offset,
                        })
                        .await?;
                    let total = store.count(status).await?;
                    if jobs.is_empty() {
                        println!("No jobs.");
                    }
                    for job in &jobs {
                        println!(
                            "{}  {:<10}  {}  {}",
                            job.id(),
                            job.status(),
                            job.created_at().format("%Y-%m-%d %H:%M:%S"),
                            job.original_name()
                        );
                    }
                    println!("{} of {} job(s)", jobs.len(), total);
                }
                JobsAction::Get { id } => {
                    let job = store
                        .load(&id)
                        .await?
                        .with_context(|| format!("job not found: {}", id))?;
                    println!("{}", serde_json::to_string_pretty(&job.view())?);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Worker { id } => {
            let worker = id.unwrap_or_else(|| format!("worker-{}", std::process::id()));
            let manager = Arc::new(open_manager(&cfg).await?);
            let poll = Duration::from_millis(cfg.queue.poll_interval_ms);
            queue::run_worker(manager, &worker, poll).await?;
        }
    }

    Ok(())
}

async fn open_store(cfg: &Config) -> anyhow::Result<Arc<dyn JobStore>> {
    let pool = db::connect(cfg).await?;
    migrate::create_schema(&pool).await?;
    Ok(Arc::new(SqliteJobStore::new(pool)))
}

async fn open_manager(cfg: &Config) -> anyhow::Result<JobManager> {
    let store = open_store(cfg).await?;
    JobManager::from_config(cfg, store)
}

fn display_name(file: &std::path::Path) -> String {
    file.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.pdf".to_string())
}

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use padron_core::job::{EnqueueRequest, JobStatus};
use padron_core::job_queue::JobQueue;
use padron_db::{Database, DatabaseConfig, LookupJobRepository};

#[derive(Parser)]
#[command(name = "padron", version, about = "Citizen-ID lookup queue")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue one citizen ID for resolution
    Enqueue {
        /// Citizen ID to resolve
        citizen_id: String,

        /// Priority (higher = claimed first)
        #[arg(short, long, default_value_t = 0)]
        priority: i16,

        /// Maximum resolution attempts
        #[arg(short, long)]
        max_attempts: Option<u32>,

        /// Requesting user ID
        #[arg(long)]
        requested_by: Option<Uuid>,
    },

    /// Queue citizen IDs from a CSV file (first column)
    Import {
        /// Path to the CSV file
        file: PathBuf,

        /// Priority applied to every imported job
        #[arg(short, long, default_value_t = 0)]
        priority: i16,

        /// Maximum resolution attempts
        #[arg(short, long)]
        max_attempts: Option<u32>,
    },

    /// List jobs in the queue
    List {
        /// Filter by status (queued, processing, done, failed)
        #[arg(short, long)]
        status: Option<String>,

        /// Number of jobs to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one job in full
    Show {
        /// Job ID
        id: Uuid,
    },

    /// Show queue counts per status
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("padron=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let repo = connect_db().await?;

    match cli.command {
        Commands::Enqueue {
            citizen_id,
            priority,
            max_attempts,
            requested_by,
        } => {
            let mut request = EnqueueRequest::new(citizen_id).with_priority(priority);
            if let Some(max) = max_attempts {
                request = request.with_max_attempts(max);
            }
            if let Some(requester) = requested_by {
                request = request.with_requested_by(requester);
            }
            let job = repo.enqueue(request).await?;
            println!("{} {}", job.id, job.status);
        }
        Commands::Import {
            file,
            priority,
            max_attempts,
        } => {
            let ids = read_citizen_ids(&file)?;
            let total = ids.len();
            for citizen_id in ids {
                let mut request = EnqueueRequest::new(citizen_id).with_priority(priority);
                if let Some(max) = max_attempts {
                    request = request.with_max_attempts(max);
                }
                let job = repo.enqueue(request).await?;
                println!("{} {}", job.id, job.citizen_id);
            }
            eprintln!("Queued {total} jobs from {}", file.display());
        }
        Commands::List { status, limit } => {
            let status = status
                .map(|s| s.parse::<JobStatus>())
                .transpose()
                .map_err(|e| anyhow::anyhow!(e))?;
            let jobs = repo.list_jobs(status, limit).await?;
            for job in jobs {
                println!(
                    "{}  {:<10}  {:<12}  attempts {}/{}  {}",
                    job.id,
                    job.status,
                    job.citizen_id,
                    job.attempts,
                    job.max_attempts,
                    job.last_error.as_deref().unwrap_or("-"),
                );
            }
        }
        Commands::Show { id } => {
            match repo.get_job(id).await? {
                Some(job) => println!("{}", serde_json::to_string_pretty(&job)?),
                None => anyhow::bail!("Job not found: {id}"),
            };
        }
        Commands::Stats => {
            for status in [
                JobStatus::Queued,
                JobStatus::Processing,
                JobStatus::Done,
                JobStatus::Failed,
            ] {
                let count = repo.count_by_status(status).await?;
                println!("{:<12} {count}", status.as_str());
            }
        }
    }

    Ok(())
}

async fn connect_db() -> Result<LookupJobRepository> {
    let config = DatabaseConfig::from_env().context("Database configuration missing")?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    Ok(db.job_repo())
}

/// Read citizen IDs from the first column of a CSV file.
///
/// Blank cells are skipped, as is a `citizen_id` header row.
fn read_citizen_ids(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut ids = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(cell) = record.get(0) else { continue };
        let cell = cell.trim();
        if cell.is_empty() || cell.eq_ignore_ascii_case("citizen_id") {
            continue;
        }
        ids.push(cell.to_string());
    }
    Ok(ids)
}

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "arbiter-cli")]
#[command(about = "Arbiter CLI - Warm up sandboxes, run submissions, manage the job queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the Docker runtime and cache language images
    WarmUp {
        /// Language to warm up (repeatable; defaults to all configured)
        #[arg(short, long = "language")]
        languages: Vec<String>,
    },

    /// List configured languages and their limits
    Languages,

    /// Run a source file once in a sandbox
    Run {
        /// Language identifier (e.g., python, cpp)
        #[arg(short, long)]
        language: String,

        /// Source file
        #[arg(short, long)]
        file: PathBuf,

        /// File whose contents are fed to stdin
        #[arg(short, long)]
        stdin_file: Option<PathBuf>,

        /// Wall-clock limit in ms (clamped to 1000..=60000)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Evaluate a source file against a JSON test file
    Evaluate {
        #[arg(short, long)]
        language: String,

        #[arg(short, long)]
        file: PathBuf,

        /// JSON array of {input, expected_output, hidden?}
        #[arg(long)]
        tests: PathBuf,

        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },

    /// Queue an evaluation for a worker
    Submit {
        #[arg(short, long)]
        language: String,

        #[arg(short, long)]
        file: PathBuf,

        #[arg(long)]
        tests: PathBuf,

        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Recorded in the job metadata
        #[arg(long)]
        submitter: Option<String>,
    },

    /// Show the published outcome of a queued job
    Status {
        job_id: String,
    },

    /// Ask the worker to abandon a queued or running job
    Cancel {
        job_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::WarmUp { languages } => {
            commands::warm_up(&languages).await?;
        }
        Commands::Languages => {
            commands::list_languages()?;
        }
        Commands::Run {
            language,
            file,
            stdin_file,
            timeout_ms,
        } => {
            commands::run(&language, &file, stdin_file.as_deref(), timeout_ms).await?;
        }
        Commands::Evaluate {
            language,
            file,
            tests,
            timeout_ms,
        } => {
            commands::evaluate(&language, &file, &tests, timeout_ms).await?;
        }
        Commands::Submit {
            language,
            file,
            tests,
            timeout_ms,
            submitter,
        } => {
            commands::submit(&language, &file, &tests, timeout_ms, submitter).await?;
        }
        Commands::Status { job_id } => {
            commands::status(&job_id).await?;
        }
        Commands::Cancel { job_id } => {
            commands::cancel(&job_id).await?;
        }
    }

    Ok(())
}

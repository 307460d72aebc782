//! jobman CLI tool.

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "jobman")]
#[command(about = "Job association registry toolkit", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, env = "JOBMAN_LOG_FORMAT", value_enum, default_value = "pretty")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a scenario to a fresh registry and check every outcome
    Run {
        /// Path to the scenario file
        #[arg(default_value = "scenario.kdl")]
        path: String,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate a scenario file without running it
    Validate {
        /// Path to the scenario file
        #[arg(default_value = "scenario.kdl")]
        path: String,
    },
    /// Hammer a shared registry from concurrent tasks and check invariants
    Stress {
        /// Number of distinct jobs to insert
        #[arg(
            long,
            default_value = "10000",
            value_parser = clap::value_parser!(u64).range(1..=1 << 31)
        )]
        jobs: u64,
        /// Number of concurrent tasks
        #[arg(long, default_value = "8")]
        workers: u64,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run { path, json } => {
            commands::run::run(&path, json)?;
        }
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Stress { jobs, workers } => {
            commands::stress::stress(jobs, workers).await?;
        }
    }

    Ok(())
}

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "praxis-cli")]
#[command(about = "Praxis CLI - Grade submissions and verify problem catalogs", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one source file against a problem
    Grade {
        /// Problem definition (JSON file) or a problem id within --problems
        #[arg(short, long)]
        problem: String,

        /// C++ source file to grade
        #[arg(short, long)]
        source: PathBuf,

        /// Problem catalog directory, for grading by id
        #[arg(long, default_value = "config/problems")]
        problems: PathBuf,

        /// Run every case even after a failure
        #[arg(long, default_value = "false")]
        exhaustive: bool,

        /// Emit the full verdict as JSON instead of a summary
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Compile and run every problem's reference solution against its own
    /// cases, to catch broken catalogs before students do
    Check {
        /// Problem catalog directory
        #[arg(long, default_value = "config/problems")]
        problems: PathBuf,
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
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    tracing::debug!(?config, "engine configuration resolved");

    let exit_code = match cli.command {
        Commands::Grade {
            problem,
            source,
            problems,
            exhaustive,
            json,
        } => commands::grade(&config, &problem, &source, &problems, exhaustive, json).await?,
        Commands::Check { problems } => commands::check(&config, &problems).await?,
    };

    std::process::exit(exit_code);
}

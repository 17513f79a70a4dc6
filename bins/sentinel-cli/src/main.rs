mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sentinel-cli")]
#[command(about = "Sentinel CLI - Prepare run configurations, submit and inspect runs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample run configuration selecting every built-in case
    Init {
        /// Output path
        #[arg(short, long, default_value = "sentinel.json")]
        path: String,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Parse and validate a configuration, then print the resolved plan
    Validate {
        /// Configuration file
        #[arg(short, long)]
        config: String,
    },

    /// Queue a run for a configuration
    Submit {
        /// Configuration file
        #[arg(short, long)]
        config: String,
    },

    /// Show the status of a run
    Status {
        /// Run ID
        #[arg(short, long)]
        run_id: Uuid,
    },

    /// Show the case results of a run
    Results {
        /// Run ID
        #[arg(short, long)]
        run_id: Uuid,

        /// Print the raw JSON detail instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Cancel a pending, queued or running run
    Cancel {
        /// Run ID
        #[arg(short, long)]
        run_id: Uuid,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { path, force } => {
            commands::init_configuration(&path, force).await?;
        }
        Commands::Validate { config } => {
            commands::validate_configuration(&config).await?;
        }
        Commands::Submit { config } => {
            commands::submit_run(&config).await?;
        }
        Commands::Status { run_id } => {
            commands::show_status(run_id).await?;
        }
        Commands::Results { run_id, json } => {
            commands::show_results(run_id, json).await?;
        }
        Commands::Cancel { run_id } => {
            commands::cancel_run(run_id).await?;
        }
    }

    Ok(())
}

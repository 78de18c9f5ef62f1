// ABOUTME: Entry point for the warden operator command line
// ABOUTME: Parses arguments, initializes logging, and dispatches to command handlers

use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::environments::EnvironmentCommands;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Warden - containment and emergency shutdown for autonomous workloads")]
#[command(version)]
struct Cli {
    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Environments(EnvironmentCommands),

    /// Create a snapshot of an environment's workspace
    Snapshot {
        /// Environment ID
        id: String,
    },
    /// Restore a workspace from a snapshot manifest
    Restore {
        /// Environment ID
        id: String,
        /// Path to the snapshot manifest (.json)
        manifest: PathBuf,
    },
    /// List completed snapshots of an environment
    Snapshots {
        /// Environment ID
        id: String,
    },
    /// Poll host resources and processes until the kill switch trips
    Watch {
        /// Poll interval in seconds (default: WARDEN_POLL_INTERVAL_SECS)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Trigger the kill switch immediately
    Kill {
        /// Reason recorded in the audit trail
        #[arg(long, default_value = "manual")]
        reason: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command, cli.json).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands, json: bool) -> anyhow::Result<()> {
    let warden = cli::build_warden()?;

    match command {
        Commands::Environments(cmd) => cmd.execute(&warden, json).await,
        Commands::Snapshot { id } => cli::snapshots::create_command(&warden, &id).await,
        Commands::Restore { id, manifest } => {
            cli::snapshots::restore_command(&warden, &id, &manifest).await
        }
        Commands::Snapshots { id } => cli::snapshots::list_command(&warden, &id, json).await,
        Commands::Watch { interval } => cli::safety::watch_command(&warden, interval).await,
        Commands::Kill { reason } => cli::safety::kill_command(&warden, &reason).await,
    }
}

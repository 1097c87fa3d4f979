//! Tidyflow command-line launcher
//!
//! - `watch`: run the watcher until Ctrl+C
//! - `scan`: one-shot proposals for existing files
//! - `proposals`: review, approve, reject
//! - `dirs`: manage the watch set (persisted to the config file)

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tidyflow::Organizer;
use tidyflow_logging::{init_logging, LogConfig};

mod cli;

#[derive(Parser, Debug)]
#[command(
    name = "tidyflow",
    version,
    about = "Watches folders and proposes where new files belong"
)]
struct Cli {
    /// Config file (default: ~/.tidyflow/config.toml)
    #[arg(short, long, global = true, env = "TIDYFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch configured directories and propose moves as files settle
    Watch {
        /// Propose moves for files already present before watching
        #[arg(long)]
        scan: bool,
    },

    /// Propose moves for the files currently in a directory
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Scan subdirectories recursively
        #[arg(short, long)]
        recursive: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Review pending proposals
    Proposals {
        #[command(subcommand)]
        action: cli::proposals::ProposalsAction,
    },

    /// Manage watched directories
    Dirs {
        #[command(subcommand)]
        action: cli::directories::DirsAction,
    },
}

impl Commands {
    fn wants_json(&self) -> bool {
        match self {
            Commands::Watch { .. } => false,
            Commands::Scan { json, .. } => *json,
            Commands::Proposals { action } => action.wants_json(),
            Commands::Dirs { action } => action.wants_json(),
        }
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let (config, config_path) = cli::load_config(cli.config.as_deref())?;
    let organizer = Organizer::new(config).await?;

    match cli.command {
        Commands::Watch { scan } => {
            cli::watch::run(cli::watch::WatchArgs { scan_existing: scan }, &organizer).await
        }
        Commands::Scan {
            path,
            recursive,
            json,
        } => {
            cli::scan::run(
                cli::scan::ScanArgs {
                    path,
                    recursive,
                    json,
                },
                &organizer,
            )
            .await
        }
        Commands::Proposals { action } => cli::proposals::run(action, &organizer).await,
        Commands::Dirs { action } => cli::directories::run(action, &organizer, &config_path).await,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.command.wants_json();

    if let Err(err) = init_logging(LogConfig {
        app_name: "tidyflow",
        verbose: cli.verbose,
        quiet: json_mode,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start async runtime: {}", err);
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run_command(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::print_json_error(&err);
            } else {
                eprintln!("Error: {:#}", err);
            }
            ExitCode::from(1)
        }
    }
}

//! Granary command-line interface
//!
//! - `ingest`: discover, classify and merge granules into the catalog
//! - `housekeep`: remove scenes with degenerate footprints
//! - `classify`: show how file names are classified
//! - `stats`: catalog size and slot fill counts
//! - `init-config`: write a default configuration file

use clap::{Parser, Subcommand};
use granary::LayoutMode;
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "granary", version, about = "Scene catalog for satellite product granules")]
struct Cli {
    /// Configuration file (default: ~/.granary/config.toml)
    #[arg(short, long, global = true, env = "GRANARY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging on stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest granules into the catalog
    Ingest {
        /// Directory to ingest instead of the configured sources
        #[arg(short, long)]
        root: Option<PathBuf>,

        /// Layout of --root (flat-legacy, directory-keyed, per-granule)
        #[arg(short, long)]
        layout: Option<LayoutMode>,

        /// Scene groups processed concurrently
        #[arg(long)]
        concurrency: Option<usize>,

        /// Skip the degenerate footprint cleanup
        #[arg(long)]
        no_housekeeping: bool,

        /// Output the ingest report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove scenes whose footprint reaches the pole
    Housekeep {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify file names with the configured rules
    Classify {
        /// File names (directories are ignored)
        #[arg(required = true)]
        names: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show catalog statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Destination (default: the --config path or ~/.granary/config.toml)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn command_wants_json(command: &Commands) -> bool {
    match command {
        Commands::Ingest { json, .. } => *json,
        Commands::Housekeep { json } => *json,
        Commands::Classify { json, .. } => *json,
        Commands::Stats { json } => *json,
        Commands::InitConfig { .. } => false,
    }
}

fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config;
    match cli.command {
        Commands::Ingest {
            root,
            layout,
            concurrency,
            no_housekeeping,
            json,
        } => cli::ingest::run(cli::ingest::IngestArgs {
            config,
            root,
            layout,
            concurrency,
            no_housekeeping,
            json,
        }),
        Commands::Housekeep { json } => {
            cli::housekeep::run(cli::housekeep::HousekeepArgs { config, json })
        }
        Commands::Classify { names, json } => {
            cli::classify::run(cli::classify::ClassifyArgs {
                config,
                names,
                json,
            })
        }
        Commands::Stats { json } => cli::stats::run(cli::stats::StatsArgs { config, json }),
        Commands::InitConfig { path, force } => {
            cli::init_config::run(cli::init_config::InitConfigArgs {
                path: path.or(config),
                force,
            })
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let logging = granary_logging::init_logging(granary_logging::LogConfig {
        app_name: "granary",
        verbose: cli.verbose,
        quiet: command_wants_json(&cli.command),
    });
    if let Err(e) = logging {
        eprintln!("Warning: failed to initialize logging: {:#}", e);
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", cli::error::render(&e));
            ExitCode::FAILURE
        }
    }
}

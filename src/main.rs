//! # Coverage Harvester CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest run` | Run every aggregator (or one) once |
//! | `harvest sources` | List sources and their watermarks |
//! | `harvest checkpoint show` | Dump stored watermarks |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use coverage_harvester::aggregator::RunOptions;
use coverage_harvester::logging::{self, LogFormat};
use coverage_harvester::registry::Registries;
use coverage_harvester::{config, ingest, sources};

/// Incremental coverage harvester: fetch keyword matches from news and
/// forum sources and store each one exactly once.
#[derive(Parser)]
#[command(name = "harvest", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    /// Log output format (stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run aggregators once.
    ///
    /// Each source is asked for entries newer than its watermark; new entries
    /// are written as posts and the watermark advances after the pass.
    Run {
        /// Only run this aggregator.
        #[arg(long)]
        aggregator: Option<String>,

        /// Ignore stored watermarks and fetch everything available.
        #[arg(long)]
        full: bool,

        /// Fetch and count without writing posts or advancing watermarks.
        #[arg(long)]
        dry_run: bool,
    },

    /// List configured sources and their watermarks.
    Sources,

    /// Inspect checkpoint stores.
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print every stored watermark.
    Show {
        /// Only this aggregator.
        #[arg(long)]
        aggregator: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format)?;

    let cfg = config::load_config(&cli.config)?;
    let registries = Registries::builtin();

    match cli.command {
        Commands::Run {
            aggregator,
            full,
            dry_run,
        } => {
            let cancel = Arc::new(AtomicBool::new(false));
            tokio::spawn(ingest::handle_interrupts(
                || async { tokio::signal::ctrl_c().await.is_ok() },
                cancel.clone(),
                || std::process::exit(130),
            ));

            let options = RunOptions { full, dry_run };
            ingest::run_harvest(&cfg, &registries, aggregator.as_deref(), options, &cancel)
                .await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg, &registries).await?;
        }
        Commands::Checkpoint { action } => match action {
            CheckpointAction::Show { aggregator } => {
                sources::show_checkpoints(&cfg, &registries, aggregator.as_deref()).await?;
            }
        },
    }

    Ok(())
}

mod commands;
mod language_config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tally_store::{Store, StoreConfig};
use tokio::signal;
use tracing::{info, warn};

use crate::commands::Session;

#[derive(Parser)]
#[command(name = "tally-cli")]
#[command(about = "Tally CLI - Store submissions and judge results", long_about = None)]
struct Cli {
    /// Per-operation timeout in milliseconds (overrides TALLY_OP_TIMEOUT_MS)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Language descriptors file
    #[arg(long, global = true, default_value = "config/languages.json")]
    languages: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a new submission and print it with its assigned id
    Add {
        /// Language name from the languages file (e.g. python3, c++17)
        #[arg(short, long)]
        lang: String,

        /// Source file, or - for stdin
        #[arg(short, long)]
        source: PathBuf,
    },

    /// Apply a judge update read from a JSON file (or - for stdin)
    Update {
        file: PathBuf,

        /// Fill totalTime / maxMemory from the results when absent
        #[arg(long, default_value = "false")]
        derive_totals: bool,
    },

    /// List submissions, newest first
    Query {
        /// Only submissions older than this id
        #[arg(short, long)]
        cursor: Option<String>,

        /// Keep paging until the oldest submission
        #[arg(long, default_value = "false")]
        all: bool,
    },

    /// Print one submission
    Show { id: String },

    /// Check that the store answers
    Ping,

    /// List configured languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON output only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Languages = cli.command {
        return commands::list_languages(&cli.languages);
    }

    let mut config = StoreConfig::from_env().context("Invalid store configuration")?;
    if let Some(ms) = cli.timeout_ms {
        config.op_timeout = Duration::from_millis(ms);
    }

    info!(backend = ?config.backend, "Tally CLI booting...");

    // A store that cannot be reached at startup is fatal
    let store = Store::connect(&config)
        .await
        .context("Failed to connect to submission store")?;

    let session = Session::new(store.clone());
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling in-flight operation");
            cancel.cancel();
        }
    });

    let outcome = match cli.command {
        Commands::Add { lang, source } => session.add(&cli.languages, &lang, &source).await,
        Commands::Update { file, derive_totals } => session.update(&file, derive_totals).await,
        Commands::Query { cursor, all } => session.query(cursor, all).await,
        Commands::Show { id } => session.show(&id).await,
        Commands::Ping => session.ping().await,
        Commands::Languages => Ok(()),
    };

    store.shutdown().await;
    outcome
}

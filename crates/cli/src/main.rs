//! folio - command-line client for the portfolio backend.

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::Parser,
    folio_session::{FileStorage, FolioClient},
    tracing::debug,
    tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt},
};

mod commands;

const DEFAULT_LOG_FILTER: &str = "folio=info";

/// folio - portfolio client session tools
#[derive(Parser, Debug)]
#[command(name = "folio", version, about, long_about = None)]
struct Cli {
    /// Path to folio.toml (defaults to the platform config directory)
    #[arg(short, long, env = "FOLIO_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: commands::Command,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = folio_config::load_config(cli.config.as_deref())?;
    let storage_path = match &config.storage_path {
        Some(path) => path.clone(),
        None => folio_config::default_storage_path()
            .context("no data directory available, set storage_path in folio.toml")?,
    };
    debug!(path = %storage_path.display(), "using session storage");
    let storage = FileStorage::open(&storage_path)
        .with_context(|| format!("failed to open {}", storage_path.display()))?;

    let client = FolioClient::new(&config, Arc::new(storage))?;
    commands::run(&client, cli.command).await
}

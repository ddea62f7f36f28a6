//! sentry-tap CLI - extract Sentry records as a schema-tagged stream.

mod config;
mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sentry_tap::catalog::{self, Catalog};
use sentry_tap::client::SentryClient;
use sentry_tap::http::reqwest_transport::ReqwestTransport;
use sentry_tap::output::JsonLineSink;
use sentry_tap::rate_limit::{ApiRateLimiter, DEFAULT_RPS};
use sentry_tap::state::{
    DiscardStateStore, FileStateStore, StateStore, TapState, parse_timestamp,
};
use sentry_tap::sync::{
    DEFAULT_PROJECT_CONCURRENCY, ShutdownFlag, SyncEngine, first_failure, run_streams,
};

use crate::config::{DEFAULT_REQUEST_TIMEOUT_SECS, TapConfig};

#[derive(Parser)]
#[command(name = "sentry-tap")]
#[command(version)]
#[command(about = "Extract Sentry records as a schema-tagged stream")]
#[command(
    long_about = "sentry-tap pulls projects, issues, events, teams, and users from one Sentry \
organization and emits them as line-delimited JSON messages on stdout. Issues and events are \
extracted incrementally: each run resumes from the bookmark persisted by the previous run."
)]
#[command(after_long_help = r#"EXAMPLES
    Print the stream catalog:
        $ sentry-tap --discover

    Run a full sync:
        $ sentry-tap --config config.json

    Resume from persisted bookmarks:
        $ sentry-tap --config config.json --state state.json

OUTPUT
    Records go to stdout as SCHEMA/RECORD/STATE messages; diagnostics go to
    stderr. Control verbosity with RUST_LOG (e.g. RUST_LOG=sentry_tap=debug).
"#)]
struct Cli {
    /// Path to the JSON configuration file (required for sync mode)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to a persisted state file with bookmarks from a previous run
    #[arg(short, long)]
    state: Option<PathBuf>,

    /// Path to a catalog file overriding the built-in stream catalog
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Print the stream catalog as JSON and exit
    #[arg(short, long)]
    discover: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sentry_tap=info,sentry_tap_cli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.discover {
        let catalog = catalog::discover()?;
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    let config_path = cli
        .config
        .as_deref()
        .ok_or("--config is required in sync mode")?;
    let config = TapConfig::load(config_path)?;

    let catalog = load_catalog(cli.catalog.as_deref())?;
    let state = load_state(&config, cli.state.as_deref())?;

    let store: Arc<dyn StateStore> = match &cli.state {
        Some(path) => Arc::new(FileStateStore::new(path)),
        None => Arc::new(DiscardStateStore),
    };

    let timeout = Duration::from_secs(
        config
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
    );
    let transport = ReqwestTransport::with_timeout(timeout)?;

    let mut client = SentryClient::new(
        Arc::new(transport),
        config.api_token.clone(),
        config.organization.clone(),
    )
    .with_rate_limiter(ApiRateLimiter::new(
        config.rate_limit_rps.unwrap_or(DEFAULT_RPS),
    ));
    if let Some(base_url) = &config.base_url {
        client = client.with_base_url(base_url.clone());
    }
    if let Some(max_pages) = config.max_pages {
        client = client.with_max_pages(max_pages);
    }

    let shutdown = ShutdownFlag::new();
    shutdown::setup_shutdown_handler(shutdown.clone());

    let sink = Arc::new(JsonLineSink::new(std::io::stdout()));
    let engine = SyncEngine::new(Arc::new(client), sink, store, state)
        .await?
        .with_concurrency(config.concurrency.unwrap_or(DEFAULT_PROJECT_CONCURRENCY))
        .with_shutdown(shutdown);

    let reports = run_streams(&engine, &catalog).await;
    for report in &reports {
        match &report.result {
            Ok(()) => tracing::info!(stream = %report.stream, "stream completed"),
            Err(e) => tracing::error!(stream = %report.stream, error = %e, "stream failed"),
        }
    }

    if first_failure(&reports).is_some() {
        std::process::exit(1);
    }
    Ok(())
}

/// Use the catalog file if one was given, otherwise the built-in catalog.
fn load_catalog(path: Option<&std::path::Path>) -> Result<Catalog, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let raw = std::fs::read(path)
                .map_err(|e| format!("reading catalog file {}: {e}", path.display()))?;
            let catalog = serde_json::from_slice(&raw)
                .map_err(|e| format!("parsing catalog file {}: {e}", path.display()))?;
            Ok(catalog)
        }
        None => Ok(catalog::discover()?),
    }
}

/// Seed bookmarks from the configured start date, then overlay any
/// previously persisted state.
fn load_state(
    config: &TapConfig,
    path: Option<&std::path::Path>,
) -> Result<TapState, Box<dyn std::error::Error>> {
    let start_date = parse_timestamp(&config.start_date)
        .map_err(|e| format!("config key start_date: {e}"))?;
    let mut state = TapState::seeded(&start_date);

    if let Some(path) = path {
        if let Some(persisted) = FileStateStore::load(path)? {
            state = state.merged_with(persisted);
        }
    }

    Ok(state)
}

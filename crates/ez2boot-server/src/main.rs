//! ez2boot Server
//!
//! Runs the scrape, manage, session and notification workers against one
//! catalog database until shut down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use ez2boot_core::config::{self, Config};
use ez2boot_core::tracing_init::{default_filter, init_tracing};
use ez2boot_server::notifications::{Dispatcher, SenderRegistry};
use ez2boot_server::provider::{InMemoryProvider, Provider};
use ez2boot_server::reconciler::Reconciler;
use ez2boot_server::scheduler::Scheduler;
use ez2boot_server::session::SessionLifecycle;
use ez2boot_server::storage::CatalogDatabase;

#[derive(Parser, Debug)]
#[command(name = "ez2boot-server")]
#[command(version, about = "ez2boot server - timed leases on cloud server groups")]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long, env = "EZ2BOOT_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file.
    #[arg(long, env = "EZ2BOOT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Provider adapter (memory, aws, azure).
    #[arg(long, env = "EZ2BOOT_PROVIDER")]
    provider: Option<String>,

    /// Tag key that opts instances in.
    #[arg(long, env = "EZ2BOOT_TAG_KEY")]
    tag_key: Option<String>,

    /// Instance fixture for the memory provider.
    #[arg(long, env = "EZ2BOOT_FIXTURE")]
    fixture: Option<PathBuf>,

    /// How often to scrape the provider (e.g. "30s").
    #[arg(long, env = "EZ2BOOT_SCRAPE_INTERVAL", value_parser = config::parse_duration)]
    scrape_interval: Option<Duration>,

    /// Tick of the manage, session and notification workers (e.g. "10s").
    #[arg(long, env = "EZ2BOOT_INTERNAL_CLOCK", value_parser = config::parse_duration)]
    internal_clock: Option<Duration>,

    /// Warn sessions this long before they expire (e.g. "15m").
    #[arg(long, env = "EZ2BOOT_WARNING_WINDOW", value_parser = config::parse_duration)]
    warning_window: Option<Duration>,

    /// Log level for ez2boot crates.
    #[arg(long, env = "EZ2BOOT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// Apply CLI/env values over the file-backed config.
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.db_path {
            config.database_path = Some(path.clone());
        }
        if let Some(kind) = &self.provider {
            config.provider.kind.clone_from(kind);
        }
        if let Some(tag_key) = &self.tag_key {
            config.provider.tag_key.clone_from(tag_key);
        }
        if let Some(fixture) = &self.fixture {
            config.provider.fixture_path = Some(fixture.clone());
        }
        if let Some(interval) = self.scrape_interval {
            config.workers.scrape_interval = interval;
        }
        if let Some(clock) = self.internal_clock {
            config.workers.internal_clock = clock;
        }
        if let Some(window) = self.warning_window {
            config.workers.warning_window = window;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&default_filter("ez2boot_server", &args.log_level), args.log_json);

    let mut config = config::load_config(args.config.as_deref())?;
    args.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        provider = %config.provider.kind,
        tag_key = %config.provider.tag_key,
        "Starting ez2boot-server"
    );

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => config::default_database_path()
            .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?,
    };
    info!(path = %db_path.display(), "Opening catalog database");
    let db = CatalogDatabase::open(&db_path).await?;

    let provider = build_provider(&config)?;
    let http = build_http_client()?;
    let registry = Arc::new(SenderRegistry::with_builtin(http));

    let scheduler = Scheduler::start(
        &config.workers,
        Arc::new(Reconciler::new(db.clone(), provider)),
        Arc::new(SessionLifecycle::new(
            db.clone(),
            config.workers.warning_window,
        )),
        Arc::new(Dispatcher::new(db, registry)),
    );

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    // Notify systemd that the workers are running (unix only).
    #[cfg(unix)]
    sd_notify::notify(true, &[sd_notify::NotifyState::Ready])?;

    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    scheduler.shutdown().await;

    info!("ez2boot-server stopped");
    Ok(())
}

fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn Provider>> {
    match config.provider.kind.as_str() {
        "memory" => {
            let provider = match &config.provider.fixture_path {
                Some(path) => InMemoryProvider::from_fixture(path)?,
                None => {
                    warn!("No fixture configured; simulated cloud starts empty");
                    InMemoryProvider::default()
                }
            };
            Ok(Arc::new(provider))
        }
        other @ ("aws" | "azure") => Err(anyhow::anyhow!(
            "Provider '{other}' needs an SDK binding implementing its client trait; \
             only 'memory' is available in this binary"
        )),
        other => Err(anyhow::anyhow!("Unknown provider '{other}'")),
    }
}

fn build_http_client() -> anyhow::Result<reqwest::Client> {
    // reqwest is built with `rustls-no-provider`; pick ring before the first client.
    let _ = rustls::crypto::ring::default_provider().install_default();
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?)
}

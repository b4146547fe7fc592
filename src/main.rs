//! afk-watcher - AFK detection daemon
//!
//! Polls the system idle time and reports active/AFK spans as heartbeats to
//! an ActivityWatch-compatible event server.

use anyhow::{Context, Result};
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use afk_watcher::cli::Cli;
use afk_watcher::config::{Config, LogFormat};
use afk_watcher::store::{MemoryStore, ServerClient};
use afk_watcher::tracker::{self, PresenceTracker};
use afk_watcher::idle;

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long queued heartbeats may take to reach the server on shutdown.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;
    config.validate()?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    init_tracing(level, config.logging.format)?;

    info!("Starting afk-watcher v{}", VERSION);

    let settings = config.settings(cli.testing, cli.timeout, cli.poll_time)?;
    let watcher = config.watcher(cli.testing);
    let bucket = watcher.bucket_name();

    let probe = idle::native_probe().context("Failed to open idle-time probe")?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let result = if cli.dry_run {
        info!("Dry run: events are kept in memory");
        let mut tracker = PresenceTracker::new(probe, MemoryStore::new(), settings, bucket)
            .with_orphan_check(tracker::parent_exited);
        let result = tracker.run(&cancel).await;

        for event in tracker.store().events(tracker.bucket()) {
            info!(
                "{} span from {} for {:.1}s",
                event.status(),
                event.timestamp,
                event.duration
            );
        }
        result
    } else {
        let url = config.server_url(cli.testing, cli.host.as_deref(), cli.port);
        let queue_dir = if cli.testing {
            config.logging.queue_dir().join("testing")
        } else {
            config.logging.queue_dir()
        };
        let client = ServerClient::new(
            &url,
            &watcher.client_name,
            &queue_dir,
            config.server.request_timeout(),
        )
        .context("Failed to create event server client")?;

        let mut tracker = PresenceTracker::new(probe, client, settings, bucket)
            .with_orphan_check(tracker::parent_exited);
        let result = tracker.run(&cancel).await;

        let client = tracker.into_store();
        if !client.flush(SHUTDOWN_FLUSH_TIMEOUT).await {
            info!("{} requests stay queued for the next run", client.pending());
        }
        client.close().await;
        result
    };

    // The tracker already logged why it stopped
    Ok(match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    ctrl_c().await;
}

/// Resolve on Ctrl-C; never resolve if the handler cannot be installed.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Initialize tracing subscriber with the given log level.
fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(filter)
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .try_init()?,
    }

    Ok(())
}

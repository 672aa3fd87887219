// # ipguardd - Threat feed blocklist daemon
//
// The ipguardd daemon is a thin host around `ipguard-core`:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Building the feed source, firewall client and snapshot store
// 4. Running the sync engine until a shutdown signal arrives
//
// ## Configuration
//
// ### Firewall
// - `IPGUARD_FIREWALL_HOST`: Host name or address of the Sophos appliance
// - `IPGUARD_FIREWALL_PORT`: Web admin port (default 4444)
// - `IPGUARD_FIREWALL_USERNAME`: API user
// - `IPGUARD_FIREWALL_PASSWORD`: API password
// - `IPGUARD_ACCEPT_INVALID_CERTS`: Accept self-signed certificates (default false)
//
// ### Feed
// - `IPGUARD_THREAT_LEVEL`: Primary threat level, 0-100 (default 50)
// - `IPGUARD_ENABLE_MULTIPLE_LISTS`: Merge additional levels (default false)
// - `IPGUARD_ADDITIONAL_THREAT_LEVELS`: Comma-separated extra levels
// - `IPGUARD_FEED_BASE_URL`: Override the feed endpoint
//
// ### Engine
// - `IPGUARD_UPDATE_INTERVAL_MINUTES`: Minutes between cycles (default 60)
// - `IPGUARD_MAX_RETRIES`: Attempts per phase
// - `IPGUARD_RETRY_DELAY_SECS`: Delay between attempts
// - `IPGUARD_STATE_DIR`: Snapshot directory (default /var/lib/ipguard)
//
// ### Logging
// - `IPGUARD_LOG_LEVEL`: trace, debug, info, warn, error (default info)
// - `IPGUARD_LOG_FILE`: Optional file receiving the timestamped engine log
//
// ## Signals
//
// - `SIGHUP`: re-read the environment and apply the new configuration
// - `SIGUSR1`: run a cycle now, bypassing the interval guard
// - `SIGTERM` / `SIGINT`: stop, aborting an in-flight cycle
//
// ## Example
//
// ```bash
// export IPGUARD_FIREWALL_HOST=192.168.1.1
// export IPGUARD_FIREWALL_USERNAME=api-user
// export IPGUARD_FIREWALL_PASSWORD=secret
// export IPGUARD_ACCEPT_INVALID_CERTS=true
// export IPGUARD_THREAT_LEVEL=30
//
// ipguardd
// ```

mod log_file;
mod settings;

use anyhow::{Context, Result};
use ipguard_core::traits::LogSink;
use ipguard_core::{
    CycleOutcome, FileSnapshotStore, GuardConfig, SyncEngine, SyncEvent, TracingLogSink,
};
use ipguard_feed_http::HttpFeedSource;
use ipguard_firewall_sophos::SophosClient;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

use crate::log_file::FileLogSink;
use crate::settings::Settings;

/// How long an in-flight cycle gets to wind down after a stop request
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit codes for ipguardd
///
/// - 0: Clean shutdown
/// - 1: Configuration error
/// - 2: Runtime error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum IpguardExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<IpguardExitCode> for ExitCode {
    fn from(code: IpguardExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// What the signal loop asks the daemon to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Reload,
    UpdateNow,
    Shutdown(&'static str),
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return IpguardExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {}", e);
        return IpguardExitCode::ConfigError.into();
    }

    let log_level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IpguardExitCode::ConfigError.into();
    }

    info!("Starting ipguardd daemon");
    info!("Configuration loaded: {:?}", settings);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IpguardExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(settings).await {
            error!("Daemon error: {:#}", e);
            IpguardExitCode::RuntimeError
        } else {
            IpguardExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Build the engine from settings and run it until shutdown
async fn run_daemon(settings: Settings) -> Result<()> {
    let config = settings.to_guard_config();
    config.validate().context("Invalid engine configuration")?;

    let feed = Arc::new(HttpFeedSource::new(config.feed.clone())?);
    let firewall = Arc::new(SophosClient::new()?);
    let store = Arc::new(
        FileSnapshotStore::new(&config.storage.dir, config.storage.max_backups)
            .await
            .context("Failed to open snapshot directory")?,
    );
    let sink: Arc<dyn LogSink> = match settings.log_file {
        Some(ref path) => Arc::new(
            FileLogSink::open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?,
        ),
        None => Arc::new(TracingLogSink),
    };

    info!("Snapshot directory: {}", config.storage.dir.display());
    info!("Firewall endpoint: {}", config.device.api_url());

    let (config_tx, config_rx) = watch::channel(config);
    let (engine, events) = SyncEngine::new(feed, firewall, store, sink, config_rx)?;
    let engine = Arc::new(engine);

    let event_logger = tokio::spawn(log_events(events));
    let mut scheduler = tokio::spawn(Arc::clone(&engine).run());

    let (control_tx, mut control_rx) = mpsc::channel(8);
    let mut signals = tokio::spawn(watch_signals(control_tx));

    info!("Daemon initialized successfully");

    let outcome = loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Some(Control::Reload) => reload(&config_tx),
                Some(Control::UpdateNow) => {
                    info!("Manual update requested");
                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        engine.force_cycle().await;
                    });
                }
                Some(Control::Shutdown(signal)) => {
                    info!("Received shutdown signal: {}", signal);
                    break Ok(());
                }
                None => break (&mut signals).await.context("Signal task failed")?,
            },
            joined = &mut scheduler => {
                event_logger.abort();
                return match joined {
                    Ok(result) => result.context("Scheduler stopped unexpectedly"),
                    Err(e) => Err(anyhow::anyhow!("Scheduler task failed: {}", e)),
                };
            }
        }
    };

    info!("Shutting down daemon");
    engine.stop();

    let stopped = match tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler).await {
        Ok(Ok(result)) => result.map_err(anyhow::Error::from),
        Ok(Err(e)) => Err(anyhow::anyhow!("Scheduler task failed: {}", e)),
        Err(_) => Err(anyhow::anyhow!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT)),
    };
    event_logger.abort();

    outcome.and(stopped)
}

/// Re-read the environment and publish the new configuration
///
/// An invalid environment keeps the running configuration.
fn reload(config_tx: &watch::Sender<GuardConfig>) {
    info!("Reloading configuration");

    let config = Settings::from_env().and_then(|settings| {
        settings.validate()?;
        let config = settings.to_guard_config();
        config.validate()?;
        Ok(config)
    });

    match config {
        Ok(config) => {
            if config_tx.send(config).is_err() {
                warn!("Engine is no longer listening for configuration changes");
            }
        }
        Err(e) => warn!("Keeping previous configuration: {:#}", e),
    }
}

async fn log_events(mut events: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::CycleFinished(result) => match result.outcome {
                CycleOutcome::Success => info!(
                    added = result.added.len(),
                    removed = result.removed.len(),
                    "Update cycle succeeded"
                ),
                CycleOutcome::Failed => {
                    let reason = result
                        .error
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    warn!("Update cycle failed: {}", reason);
                }
                outcome => info!("Update cycle finished: {:?}", outcome),
            },
            SyncEvent::RetryScheduled { delay } => {
                info!("Next attempt in {}s", delay.as_secs())
            }
            other => tracing::debug!("Engine event: {:?}", other),
        }
    }
}

/// Translate process signals into control messages
#[cfg(unix)]
async fn watch_signals(control: mpsc::Sender<Control>) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to setup SIGHUP handler")?;
    let mut sigusr1 =
        signal(SignalKind::user_defined1()).context("Failed to setup SIGUSR1 handler")?;

    loop {
        let message = tokio::select! {
            _ = sigterm.recv() => Control::Shutdown("SIGTERM"),
            _ = sigint.recv() => Control::Shutdown("SIGINT"),
            _ = sighup.recv() => Control::Reload,
            _ = sigusr1.recv() => Control::UpdateNow,
        };

        let shutdown = matches!(message, Control::Shutdown(_));
        if control.send(message).await.is_err() || shutdown {
            return Ok(());
        }
    }
}

/// Translate CTRL-C into a shutdown message
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn watch_signals(control: mpsc::Sender<Control>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL-C")?;
    let _ = control.send(Control::Shutdown("SIGINT")).await;
    Ok(())
}

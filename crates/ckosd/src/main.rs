//! ckosd - The ckos lock session service
//!
//! This is the main entry point for the ckosd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Lock engine boot (with integrity fallback)
//! - Tick, alarm and unlock-timeout timers
//! - Newline-delimited JSON commands on stdin, responses and events on stdout

use anyhow::{Context, Result};
use ckos_api::{ErrorCode, ErrorInfo, Event, Request, Response};
use ckos_config::load_config_or_default;
use ckos_core::{LockEngine, NoKeyDerivation};
use ckos_host_api::SystemClock;
use ckos_store::{PersistenceStore, SqliteStore};
use ckos_util::{default_config_path, CKOS_CONFIG_ENV, CKOS_DATA_DIR_ENV};
use ckosd::Service;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often the alarm slot and the unlock timeout are checked
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// ckosd - Lock session service for chastity key devices
#[derive(Parser, Debug)]
#[command(name = "ckosd")]
#[command(about = "Lock session service for chastity key devices", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/ckos/config.toml)
    #[arg(short, long, env = CKOS_CONFIG_ENV, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set CKOS_DATA_DIR env var)
    #[arg(short, long, env = CKOS_DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Daemon {
    service: Service,
    clock: Arc<SystemClock>,
    tick_interval: Duration,
    startup_events: Vec<Event>,
}

impl Daemon {
    fn new(args: &Args) -> Result<Self> {
        let mut settings = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        if let Some(data_dir) = &args.data_dir {
            settings.storage.data_dir = data_dir.clone();
        }

        info!(
            config_path = %args.config.display(),
            rolling_key_window = settings.engine.rolling_key_window,
            "Configuration loaded"
        );

        let data_dir = &settings.storage.data_dir;
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = settings.storage.database_path();
        let store: Arc<dyn PersistenceStore> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let clock = Arc::new(SystemClock::new());
        let (engine, report) = LockEngine::boot(
            clock.clone(),
            store,
            Arc::new(NoKeyDerivation),
            settings.engine.clone(),
        )
        .context("Failed to boot lock engine")?;

        if report.integrity_reset() {
            warn!(
                session = report.session_reset,
                counters = report.counters_reset,
                "Persisted state was reset after failing verification"
            );
        }

        let (service, startup_events) = Service::start(engine, &settings.control, &report);

        Ok(Self {
            service,
            clock,
            tick_interval: settings.control.tick_interval,
            startup_events,
        })
    }

    async fn run(mut self) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;

        emit_all(&mut stdout, &std::mem::take(&mut self.startup_events)).await?;

        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;

        let mut tick_timer = tokio::time::interval(self.tick_interval);
        let mut poll_timer = tokio::time::interval(POLL_INTERVAL);

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // Served-time accrual
                _ = tick_timer.tick() => {
                    let events = self.service.on_tick();
                    emit_all(&mut stdout, &events).await?;
                }

                // Wake alarm and actuator timeout
                _ = poll_timer.tick() => {
                    if let Some(alarm_utc) = self.clock.take_due_alarm(ckos_util::now_utc()) {
                        debug!(alarm_utc, "Alarm due");
                        let events = self.service.on_alarm();
                        emit_all(&mut stdout, &events).await?;
                    }
                    let events = self.service.check_unlock_timeout();
                    emit_all(&mut stdout, &events).await?;
                }

                line = lines.next_line(), if stdin_open => {
                    match line {
                        Ok(Some(line)) => self.handle_line(&mut stdout, &line).await?,
                        Ok(None) => {
                            info!("Command input closed, timers keep running");
                            stdin_open = false;
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to read command input");
                            stdin_open = false;
                        }
                    }
                }
            }
        }

        info!("Shutting down ckosd");
        let events = self.service.shutdown();
        emit_all(&mut stdout, &events).await?;

        info!("Shutdown complete");
        Ok(())
    }

    async fn handle_line(&mut self, stdout: &mut Stdout, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        match serde_json::from_str::<Request>(line) {
            Ok(request) => {
                debug!(request_id = request.request_id, "Request received");
                let (response, events) = self.service.handle_request(request);
                emit(stdout, &response).await?;
                emit_all(stdout, &events).await?;
            }
            Err(e) => {
                warn!(error = %e, "Malformed request");
                let response = Response::error(
                    0,
                    ErrorInfo::new(ErrorCode::InvalidRequest, format!("Malformed request: {e}")),
                );
                emit(stdout, &response).await?;
            }
        }
        Ok(())
    }
}

async fn emit<T: Serialize>(stdout: &mut Stdout, message: &T) -> Result<()> {
    let mut line = serde_json::to_vec(message).context("Failed to serialize message")?;
    line.push(b'\n');
    stdout
        .write_all(&line)
        .await
        .context("Failed to write to stdout")?;
    stdout.flush().await.context("Failed to flush stdout")?;
    Ok(())
}

async fn emit_all(stdout: &mut Stdout, events: &[Event]) -> Result<()> {
    for event in events {
        emit(stdout, event).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the protocol
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "ckosd starting");

    let daemon = Daemon::new(&args)?;
    daemon.run().await
}

//! Daemon startup and main loop for cliprelay
//!
//! Provides the daemon entry point, startup sequence, and the watch loop
//! that turns new clips into relay jobs.

use crate::compress::Compressor;
use crate::concurrency::{derive_plan, ConcurrencyPlan};
use crate::config::{Config, ConfigError};
use crate::discord::{UploadError, WebhookClient};
use crate::encode::FfmpegEncoder;
use crate::metrics::{collect_system_metrics, new_shared_metrics, SharedMetrics};
use crate::metrics_server::run_metrics_server;
use crate::probe::FfprobeProber;
use crate::progress::ProgressEvent;
use crate::relay::{RelayExecutor, RelayJob, RelaySettings};
use crate::sources::{active_watch_paths, SourceEnv};
use crate::startup::{run_startup_checks, StartupError};
use crate::stats::{current_timestamp_ms, default_state_dir, StatsError, StatsStore};
use crate::watcher::FolderWatcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// How often system metrics are refreshed
const METRICS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Statistics could not be opened
    #[error("Statistics error: {0}")]
    Stats(#[from] StatsError),

    /// The webhook client could not be created
    #[error("Webhook error: {0}")]
    Webhook(#[from] UploadError),

    /// A background task failed
    #[error("Server error: {0}")]
    Server(String),
}

/// Statistics directory from the config, or the per-user default
pub fn resolve_state_dir(cfg: &Config) -> Result<PathBuf, DaemonError> {
    match &cfg.relay.state_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(default_state_dir()?),
    }
}

/// Compressor backed by the configured ffmpeg and ffprobe
pub fn build_compressor(cfg: &Config) -> Compressor {
    let timeout = cfg.compression.encoder_timeout_secs.map(Duration::from_secs);
    Compressor::new(
        Arc::new(FfmpegEncoder::new(cfg.compression.ffmpeg_path.clone(), timeout)),
        Arc::new(FfprobeProber::new(cfg.compression.ffprobe_path.clone())),
    )
}

/// Executor wired to the real encoder, prober, and webhook
pub fn build_executor(
    cfg: &Config,
    plan: ConcurrencyPlan,
    stats: Arc<StatsStore>,
    metrics: SharedMetrics,
) -> Result<RelayExecutor, DaemonError> {
    let uploader = WebhookClient::new(
        cfg.discord.webhook_url.clone(),
        Duration::from_secs(cfg.discord.timeout_secs),
    )?;
    Ok(RelayExecutor::new(
        plan,
        build_compressor(cfg),
        uploader,
        stats,
        metrics,
        RelaySettings::from_config(cfg),
    ))
}

/// Apply tagged progress events to the metrics until every sender is gone
pub fn spawn_progress_forwarder(
    mut rx: UnboundedReceiver<(String, ProgressEvent)>,
    metrics: SharedMetrics,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((job_id, event)) = rx.recv().await {
            let mut snapshot = metrics.write().await;
            snapshot.apply_progress(&job_id, event);
        }
        debug!("Progress forwarder stopped");
    })
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived concurrency plan
    pub concurrency_plan: ConcurrencyPlan,
    /// Shared metrics state
    pub metrics: SharedMetrics,
    /// Persistent clip counters
    pub stats: Arc<StatsStore>,
    /// Executor for relay jobs
    pub executor: Arc<RelayExecutor>,
    progress_tx: UnboundedSender<(String, ProgressEvent)>,
    progress_rx: Mutex<Option<UnboundedReceiver<(String, ProgressEvent)>>>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// This performs the full startup sequence:
    /// 1. Load config from file and apply environment overrides
    /// 2. Validate it
    /// 3. Run startup checks (webhook URL, ffmpeg, ffprobe) unless skipped
    /// 4. Open the statistics store, starting a new session
    /// 5. Derive concurrency plan and build the executor
    ///
    /// # Returns
    /// * `Ok(Daemon)` - Daemon initialized successfully
    /// * `Err(DaemonError)` - Initialization failed
    pub async fn new<P: AsRef<Path>>(config_path: P, skip_checks: bool) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config, skip_checks)
    }

    /// Initialize the daemon with an existing configuration
    pub fn with_config(config: Config, skip_checks: bool) -> Result<Self, DaemonError> {
        config.validate()?;

        if skip_checks {
            warn!("Skipping startup checks");
        } else {
            let report = run_startup_checks(&config)?;
            debug!(?report, "Startup checks passed");
        }

        let state_dir = resolve_state_dir(&config)?;
        let stats = Arc::new(StatsStore::open(&state_dir)?);
        info!(path = %stats.path().display(), "Opened statistics");

        let concurrency_plan = derive_plan(&config);
        info!(
            total_cores = concurrency_plan.total_cores,
            max_concurrent_jobs = concurrency_plan.max_concurrent_jobs,
            "Derived concurrency plan"
        );

        let metrics = new_shared_metrics();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let executor = build_executor(&config, concurrency_plan.clone(), stats.clone(), metrics.clone())?
            .with_progress(progress_tx.clone());

        Ok(Self {
            config,
            concurrency_plan,
            metrics,
            stats,
            executor: Arc::new(executor),
            progress_tx,
            progress_rx: Mutex::new(Some(progress_rx)),
        })
    }

    /// Get the shared metrics
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Sender feeding the progress forwarder
    pub fn progress_sender(&self) -> UnboundedSender<(String, ProgressEvent)> {
        self.progress_tx.clone()
    }

    /// Start the metrics HTTP server
    ///
    /// Spawns the HTTP server as a background task.
    pub fn start_metrics_server(&self) -> tokio::task::JoinHandle<()> {
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(metrics).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }

    /// Start the metrics update task
    ///
    /// Periodically refreshes system metrics and clip statistics in the shared state.
    pub fn start_metrics_updater(&self) -> tokio::task::JoinHandle<()> {
        let metrics = self.metrics.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            loop {
                let system_metrics = collect_system_metrics();
                {
                    let mut snapshot = metrics.write().await;
                    snapshot.system = system_metrics;
                    snapshot.stats = stats.snapshot();
                    snapshot.timestamp_unix_ms = current_timestamp_ms();
                }
                tokio::time::sleep(METRICS_UPDATE_INTERVAL).await;
            }
        })
    }

    /// Start applying progress events to the metrics
    ///
    /// Returns `None` if the forwarder was already started.
    pub async fn start_progress_forwarder(&self) -> Option<tokio::task::JoinHandle<()>> {
        let rx = self.progress_rx.lock().await.take()?;
        Some(spawn_progress_forwarder(rx, self.metrics.clone()))
    }

    /// Spawn a relay task for a newly discovered clip
    pub fn spawn_job(&self, path: PathBuf, size_bytes: u64) -> tokio::task::JoinHandle<()> {
        let executor = self.executor.clone();
        let job = RelayJob::new(path, size_bytes);
        info!(job_id = %job.id, file = %job.source_path.display(), size_bytes, "New clip detected");
        tokio::spawn(async move {
            // Failures are logged and counted by the executor
            let _ = executor.execute(job).await;
        })
    }

    /// Run the daemon
    ///
    /// Starts the metrics server, metrics updater, and progress forwarder,
    /// then polls the watch folders until Ctrl-C.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let _server_handle = self.start_metrics_server();
        let _updater_handle = self.start_metrics_updater();
        let _forwarder_handle = self.start_progress_forwarder().await;

        let roots = active_watch_paths(&self.config, &SourceEnv::from_system());
        if roots.is_empty() {
            warn!("No folders to watch; set watch.paths or enable a recorder folder");
        }
        for root in &roots {
            info!(path = %root.display(), "Watching folder");
        }

        let mut watcher = Some(FolderWatcher::new(
            roots,
            self.config.watch.recursive,
            self.config.watch.max_recursive_dirs,
        ));
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.watch.poll_interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
            }

            let Some(mut current) = watcher.take() else {
                break;
            };
            let (current, found) = tokio::task::spawn_blocking(move || {
                let found = current.poll();
                (current, found)
            })
            .await
            .map_err(|e| DaemonError::Server(format!("Watcher task failed: {}", e)))?;
            watcher = Some(current);

            for candidate in found {
                self.spawn_job(candidate.path, candidate.size_bytes);
            }
        }

        Ok(())
    }
}

//! cliprelay
//!
//! Watches recorder folders for new clips, compresses them under the Discord
//! upload limit, and posts them to a webhook.

pub mod compress;
pub mod concurrency;
pub mod daemon;
pub mod discord;
pub mod encode;
pub mod metrics;
pub mod metrics_server;
pub mod probe;
pub mod progress;
pub mod relay;
pub mod scan;
pub mod size_gate;
pub mod sources;
pub mod stability;
pub mod startup;
pub mod stats;
pub mod watcher;

pub use cliprelay_config as config;
pub use cliprelay_config::Config;
pub use compress::{
    compress_file, CompressError, CompressionOutcome, CompressionTarget, Compressor, Ladder, MediaKind,
};
pub use concurrency::{derive_plan, ConcurrencyPlan};
pub use daemon::{build_compressor, build_executor, resolve_state_dir, Daemon, DaemonError};
pub use discord::{UploadError, WebhookClient};
pub use encode::{extract_audio, EncodeError, Encoder, FfmpegEncoder};
pub use metrics::{
    collect_system_metrics, new_shared_metrics, JobMetrics, ProgressRecord, RelaySnapshot, SharedMetrics,
    SystemMetrics,
};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError, METRICS_PORT};
pub use probe::{DurationProber, FfprobeProber, ProbeError};
pub use progress::{ChannelProgress, NullProgress, ProgressEvent, ProgressSink, RecordingProgress};
pub use relay::{RelayError, RelayExecutor, RelayJob, RelaySettings, RelayState};
pub use sources::{active_watch_paths, SourceEnv, SourceError};
pub use startup::{check_tool, check_webhook_url, parse_tool_version, run_startup_checks, StartupError};
pub use stats::{RelayStats, StatsError, StatsStore};
pub use watcher::FolderWatcher;

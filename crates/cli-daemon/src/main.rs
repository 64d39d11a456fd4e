//! CLI entry point for cliprelay
//!
//! Runs the watch daemon, relays or compresses single files, and manages
//! statistics and the config file.

use cliprelay::config::BYTES_PER_MB;
use cliprelay::stats::current_timestamp_ms;
use cliprelay::{
    build_compressor, build_executor, compress_file, derive_plan, new_shared_metrics, resolve_state_dir,
    run_startup_checks, ChannelProgress, Config, Daemon, ProgressEvent, RelayJob, RelayStats, StatsStore,
};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn Error + Send + Sync>>;

/// cliprelay - Send new game clips to Discord, compressed to fit
#[derive(Parser, Debug)]
#[command(name = "cliprelay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch folders and relay new clips until interrupted
    Run {
        /// Skip startup checks (webhook URL, ffmpeg, ffprobe)
        #[arg(long)]
        skip_checks: bool,
    },

    /// Relay one file: compress if needed, then upload
    Send {
        file: PathBuf,

        /// Message posted with the file, instead of the configured one
        #[arg(short, long)]
        message: Option<String>,

        /// Send only the audio track
        #[arg(long)]
        audio_only: bool,

        /// Skip startup checks (webhook URL, ffmpeg, ffprobe)
        #[arg(long)]
        skip_checks: bool,
    },

    /// Compress one file under the limit without uploading
    Compress {
        file: PathBuf,

        /// Size limit in MB, instead of the configured one
        #[arg(long)]
        max_mb: Option<u64>,

        /// Use the audio ladder
        #[arg(long)]
        audio: bool,
    },

    /// Show, reset, export, or import relay statistics
    Stats {
        /// Start a new session
        #[arg(long)]
        reset_session: bool,

        /// Write statistics to a file
        #[arg(long, value_name = "PATH")]
        export: Option<PathBuf>,

        /// Take lifetime counters from an exported file
        #[arg(long, value_name = "PATH")]
        import: Option<PathBuf>,
    },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Config from `path` if it exists, otherwise defaults; env overrides apply either way
fn load_config(path: &Path) -> Result<Config, Box<dyn Error + Send + Sync>> {
    if path.exists() {
        return Ok(Config::load(path)?);
    }
    warn!(path = %path.display(), "Config file not found, using defaults");
    let mut config = Config::default();
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Log progress events as they arrive
fn spawn_progress_logger() -> UnboundedSender<(String, ProgressEvent)> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, ProgressEvent)>();
    tokio::spawn(async move {
        while let Some((_, event)) = rx.recv().await {
            match &event.error {
                Some(error) => warn!(stage = %event.stage, error = %error, "{}", event.message),
                None => info!(stage = %event.stage, progress = event.progress, "{}", event.message),
            }
        }
    });
    tx
}

async fn cmd_run(config_path: &Path, skip_checks: bool) -> CliResult {
    if !config_path.exists() {
        return Err(format!(
            "config file {} not found; create one with `cliprelay init`",
            config_path.display()
        )
        .into());
    }

    let daemon = Daemon::new(config_path, skip_checks).await?;
    info!(
        max_concurrent_jobs = daemon.concurrency_plan.max_concurrent_jobs,
        "Daemon initialized"
    );
    info!("Serving metrics on http://127.0.0.1:{}/metrics", cliprelay::METRICS_PORT);

    daemon.run().await?;
    Ok(())
}

async fn cmd_send(
    config_path: &Path,
    file: PathBuf,
    message: Option<String>,
    audio_only: bool,
    skip_checks: bool,
) -> CliResult {
    let mut config = load_config(config_path)?;
    if message.is_some() {
        config.discord.message = message;
    }
    config.compression.audio_only |= audio_only;

    if !skip_checks {
        run_startup_checks(&config)?;
    }

    // A one-shot send counts toward the running session rather than starting one
    let stats = Arc::new(StatsStore::load(&resolve_state_dir(&config)?)?);
    let executor = build_executor(&config, derive_plan(&config), stats.clone(), new_shared_metrics())?
        .with_progress(spawn_progress_logger());

    let job = executor.execute(RelayJob::from_path(file)?).await?;
    println!(
        "Sent {} ({:.2} MB)",
        job.source_path.display(),
        job.size_sent.unwrap_or(0) as f64 / BYTES_PER_MB as f64
    );
    Ok(())
}

async fn cmd_compress(config_path: &Path, file: PathBuf, max_mb: Option<u64>, audio: bool) -> CliResult {
    let mut config = load_config(config_path)?;
    if let Some(max_mb) = max_mb {
        config.compression.max_file_size_mb = max_mb;
        config.validate()?;
    }

    let compressor = build_compressor(&config);
    let ceiling = config.max_file_size_bytes();
    let progress = ChannelProgress::new("compress", spawn_progress_logger());

    let output = tokio::task::spawn_blocking(move || compress_file(&compressor, &file, audio, ceiling, &progress))
        .await??;

    println!("{}", output.display());
    Ok(())
}

fn format_span(secs: u64) -> String {
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h {}m", secs / 3600, (secs % 3600) / 60),
        _ => format!("{}d", secs / 86_400),
    }
}

fn format_age(now_ms: i64, then_ms: i64) -> String {
    format!("{} ago", format_span(((now_ms - then_ms).max(0) / 1000) as u64))
}

fn print_stats(stats: &RelayStats, uptime: Duration) {
    let now = current_timestamp_ms();
    println!("Total clips:    {}", stats.total_clips);
    println!("Session clips:  {}", stats.session_clips);
    println!(
        "Total sent:     {:.2} MB",
        stats.total_size_bytes as f64 / BYTES_PER_MB as f64
    );
    match stats.last_clip_time_ms {
        Some(last) => println!("Last clip:      {}", format_age(now, last)),
        None => println!("Last clip:      never"),
    }
    println!("Session uptime: {}", format_span(uptime.as_secs()));
}

fn cmd_stats(config_path: &Path, reset_session: bool, export: Option<PathBuf>, import: Option<PathBuf>) -> CliResult {
    let config = load_config(config_path)?;
    let store = StatsStore::load(&resolve_state_dir(&config)?)?;

    if let Some(src) = import {
        store.import(&src)?;
        info!(path = %src.display(), "Imported statistics");
    }
    if reset_session {
        store.reset_session()?;
        info!("Started a new session");
    }
    if let Some(dest) = export {
        store.export(&dest)?;
        info!(path = %dest.display(), "Exported statistics");
    }

    print_stats(&store.snapshot(), store.uptime());
    Ok(())
}

fn cmd_init(config_path: &Path, force: bool) -> CliResult {
    if config_path.exists() && !force {
        return Err(format!("{} already exists; pass --force to overwrite", config_path.display()).into());
    }
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(config_path, Config::default().to_toml_string()?)?;
    println!("Wrote {}", config_path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json_logs);

    let result = match cli.command {
        Command::Run { skip_checks } => cmd_run(&cli.config, skip_checks).await,
        Command::Send {
            file,
            message,
            audio_only,
            skip_checks,
        } => cmd_send(&cli.config, file, message, audio_only, skip_checks).await,
        Command::Compress { file, max_mb, audio } => cmd_compress(&cli.config, file, max_mb, audio).await,
        Command::Stats {
            reset_session,
            export,
            import,
        } => cmd_stats(&cli.config, reset_session, export, import),
        Command::Init { force } => cmd_init(&cli.config, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_defaults() {
        let cli = Cli::try_parse_from(["cliprelay", "run"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.toml"));
        assert!(!cli.json_logs);
        assert!(matches!(cli.command, Command::Run { skip_checks: false }));
    }

    #[test]
    fn test_parse_send_with_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "cliprelay",
            "send",
            "clip.mp4",
            "--message",
            "gg",
            "--audio-only",
            "--config",
            "relay.toml",
            "--json-logs",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("relay.toml"));
        assert!(cli.json_logs);
        match cli.command {
            Command::Send {
                file,
                message,
                audio_only,
                skip_checks,
            } => {
                assert_eq!(file, PathBuf::from("clip.mp4"));
                assert_eq!(message.as_deref(), Some("gg"));
                assert!(audio_only);
                assert!(!skip_checks);
            }
            other => panic!("expected Send, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_compress_and_stats() {
        let cli = Cli::try_parse_from(["cliprelay", "compress", "a.mp4", "--max-mb", "25", "--audio"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Compress { max_mb: Some(25), audio: true, .. }
        ));

        let cli = Cli::try_parse_from(["cliprelay", "stats", "--reset-session", "--export", "out.json"]).unwrap();
        match cli.command {
            Command::Stats {
                reset_session,
                export,
                import,
            } => {
                assert!(reset_session);
                assert_eq!(export, Some(PathBuf::from("out.json")));
                assert_eq!(import, None);
            }
            other => panic!("expected Stats, got {:?}", other),
        }
    }

    #[test]
    fn test_send_requires_file() {
        assert!(Cli::try_parse_from(["cliprelay", "send"]).is_err());
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(10_000, 5_000), "5s ago");
        assert_eq!(format_age(600_000, 0), "10m ago");
        assert_eq!(format_age(5_400_000, 0), "1h 30m ago");
        assert_eq!(format_age(3 * 86_400_000, 0), "3d ago");
        assert_eq!(format_age(0, 5_000), "0s ago");
    }

    #[test]
    fn test_format_span() {
        assert_eq!(format_span(0), "0s");
        assert_eq!(format_span(90), "1m");
        assert_eq!(format_span(7_260), "2h 1m");
        assert_eq!(format_span(2 * 86_400 + 5), "2d");
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = std::env::temp_dir().join(format!("cliprelay-init-{}", std::process::id()));
        let path = dir.join("config.toml");
        let _ = std::fs::remove_dir_all(&dir);

        cmd_init(&path, false).unwrap();
        assert!(Config::load_from_file(&path).is_ok());
        assert!(cmd_init(&path, false).is_err());
        assert!(cmd_init(&path, true).is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}

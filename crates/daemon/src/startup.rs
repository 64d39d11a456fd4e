//! Startup checks module for cliprelay
//!
//! Provides preflight checks to verify system requirements before starting the daemon:
//! - ffmpeg and ffprobe run
//! - the ffmpeg version can be read (logged, never enforced)
//! - a webhook URL is configured and looks like one

use crate::config::Config;
use crate::encode::hide_console_window;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{tool} not available: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Invalid Discord webhook URL: {0}")]
    WebhookUrl(String),
}

/// What the checks found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// ffmpeg major version, when the banner could be parsed
    pub ffmpeg_major: Option<u32>,
    pub ffprobe_major: Option<u32>,
}

/// Parse the major version from `<tool> -version` output
///
/// Handles release banners (`ffmpeg version 7.1.2 ...`) and tag builds
/// prefixed with `n` (`ffmpeg version n8.0-123-gabcdef ...`). Snapshot builds
/// (`ffmpeg version N-112345-g...`) carry no version and yield `None`.
pub fn parse_tool_version(output: &str, tool: &str) -> Option<u32> {
    let marker = format!("{} version", tool.to_lowercase());
    let line = output
        .lines()
        .map(str::to_lowercase)
        .find(|line| line.contains(&marker))?;

    let token = line.split(&marker).nth(1)?.split_whitespace().next()?.to_string();
    let major = token
        .strip_prefix('n')
        .unwrap_or(&token)
        .split(['.', '-'])
        .next()?;

    major.parse().ok()
}

/// Run `<program> -version` and return its major version
///
/// # Returns
/// * `Ok(Some(major))` - the tool ran and reported a version
/// * `Ok(None)` - the tool ran but the version could not be read
/// * `Err(StartupError::ToolUnavailable)` - the tool did not start or failed
pub fn check_tool(tool: &str, program: &Path) -> Result<Option<u32>, StartupError> {
    let mut cmd = Command::new(program);
    cmd.arg("-version");
    hide_console_window(&mut cmd);

    let output = cmd.output().map_err(|e| StartupError::ToolUnavailable {
        tool: tool.to_string(),
        reason: format!("{} -version failed; is it installed and in PATH? Error: {}", program.display(), e),
    })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            tool: tool.to_string(),
            reason: format!("{} -version exited with {}", program.display(), output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let major = parse_tool_version(&stdout, tool);
    match major {
        Some(major) => info!(tool, major, "Found {}", tool),
        None => warn!(
            tool,
            banner = stdout.lines().next().unwrap_or("(empty)"),
            "Could not parse version"
        ),
    }
    Ok(major)
}

/// Check that a webhook URL is configured and is an http(s) URL
pub fn check_webhook_url(url: &str) -> Result<(), StartupError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(StartupError::WebhookUrl(
            "no webhook URL configured; set discord.webhook_url or CLIPRELAY_WEBHOOK_URL".to_string(),
        ));
    }

    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| StartupError::WebhookUrl(format!("'{}' is not an http(s) URL", url)))?;

    if rest.split('/').next().unwrap_or_default().is_empty() {
        return Err(StartupError::WebhookUrl(format!("'{}' has no host", url)));
    }

    Ok(())
}

/// Run all startup checks in order
///
/// 1. Webhook URL
/// 2. ffmpeg
/// 3. ffprobe
pub fn run_startup_checks(cfg: &Config) -> Result<StartupReport, StartupError> {
    check_webhook_url(&cfg.discord.webhook_url)?;
    let ffmpeg_major = check_tool("ffmpeg", &cfg.compression.ffmpeg_path)?;
    let ffprobe_major = check_tool("ffprobe", &cfg.compression.ffprobe_path)?;
    Ok(StartupReport {
        ffmpeg_major,
        ffprobe_major,
    })
}

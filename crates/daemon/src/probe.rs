//! Duration probing for source videos.
//!
//! The compression pipeline only needs one number from the media-inspection
//! tool: the container duration in seconds. It is used to derive the target
//! bitrate for the video ladders.

use crate::encode::hide_console_window;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The inspection tool could not be started.
    #[error("ffprobe unavailable: {0}")]
    Unavailable(#[source] std::io::Error),

    /// The inspection tool exited with a failure status.
    #[error("ffprobe failed: {0}")]
    Failed(String),

    /// No duration was printed.
    #[error("ffprobe reported no duration")]
    Empty,

    /// The printed duration is not a number.
    #[error("Failed to parse duration {0:?}")]
    Parse(String),

    /// The duration is zero, negative or not finite.
    #[error("Duration must be positive, got {0}")]
    NonPositive(f64),
}

/// Source of video durations.
pub trait DurationProber: Send + Sync {
    /// Duration of the media at `path`, in seconds.
    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// Runs `ffprobe` to read `format=duration`.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
}

impl FfprobeProber {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfprobeProber {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

/// Build the ffprobe command for reading a file's duration.
///
/// Produces `ffprobe -v quiet -show_entries format=duration -of csv=p=0 <path>`,
/// which prints a single decimal number of seconds.
pub fn build_probe_command(program: &Path, path: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"]);
    cmd.arg(path);
    cmd.stdin(Stdio::null());
    hide_console_window(&mut cmd);
    cmd
}

impl DurationProber for FfprobeProber {
    fn probe_duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let output = build_probe_command(&self.program, path)
            .output()
            .map_err(ProbeError::Unavailable)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::Failed(format!(
                "ffprobe exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse the duration printed by ffprobe.
///
/// # Returns
/// * `Ok(seconds)` - a finite, positive duration
/// * `Err(ProbeError)` - empty, non-numeric or non-positive output
pub fn parse_duration(stdout: &str) -> Result<f64, ProbeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Err(ProbeError::Empty);
    }

    let seconds: f64 = trimmed
        .parse()
        .map_err(|_| ProbeError::Parse(trimmed.to_string()))?;

    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ProbeError::NonPositive(seconds));
    }

    Ok(seconds)
}

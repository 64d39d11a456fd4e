//! ffmpeg invocation for cliprelay
//!
//! Runs the transcoder with a prepared argument list, without a console
//! window, and optionally kills it once a deadline passes.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Lines of encoder stderr kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// How often a bounded invocation checks on the child
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Windows process creation flag that suppresses the console window
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder could not be started
    #[error("Failed to start encoder: {0}")]
    Spawn(#[source] std::io::Error),

    /// Encoder process exited with non-zero status
    #[error("Encoder failed with exit code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// Encoder process was terminated by signal
    #[error("Encoder process was terminated by signal")]
    Terminated,

    /// Encoder ran past its deadline and was killed
    #[error("Encoder timed out after {secs} seconds")]
    TimedOut { secs: u64 },

    /// Encoder reported success but wrote nothing
    #[error("Encoder produced no output at {0}")]
    MissingOutput(PathBuf),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something that can run one transcoding invocation.
///
/// `args` is the complete argument list; the output path is its last element.
pub trait Encoder: Send + Sync {
    fn invoke(&self, args: &[String]) -> Result<(), EncodeError>;
}

/// Keep background tool invocations from flashing a console on Windows.
pub fn hide_console_window(cmd: &mut Command) {
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    #[cfg(not(windows))]
    let _ = cmd;
}

/// The ffmpeg-backed [`Encoder`]
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl FfmpegEncoder {
    /// Create an encoder for `program`, unbounded unless `timeout` is set
    pub fn new(program: impl Into<PathBuf>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg", None)
    }
}

/// Build the ffmpeg command for one invocation.
///
/// # Arguments
/// * `program` - ffmpeg executable
/// * `args` - full argument list, output path last
///
/// # Returns
/// A configured Command with stdin/stdout detached and stderr piped
pub fn build_ffmpeg_command(program: &Path, args: &[String]) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    hide_console_window(&mut cmd);
    cmd
}

impl Encoder for FfmpegEncoder {
    fn invoke(&self, args: &[String]) -> Result<(), EncodeError> {
        debug!(program = %self.program.display(), ?args, "Running encoder");

        let mut child = build_ffmpeg_command(&self.program, args)
            .spawn()
            .map_err(EncodeError::Spawn)?;

        let stderr_reader = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let waited = wait_with_deadline(&mut child, self.timeout);

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        let status = waited?;
        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(EncodeError::Failed { code, stderr }),
                None => Err(EncodeError::Terminated),
            }
        }
    }
}

/// Wait for `child`, killing it if `timeout` elapses first.
fn wait_with_deadline(child: &mut Child, timeout: Option<Duration>) -> Result<ExitStatus, EncodeError> {
    let Some(timeout) = timeout else {
        return Ok(child.wait()?);
    };

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            // Reap so the pipe closes and the reader thread finishes
            let _ = child.wait();
            return Err(EncodeError::TimedOut {
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

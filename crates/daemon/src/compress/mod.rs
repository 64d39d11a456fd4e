//! Adaptive compression pipeline
//!
//! Given a source file and a byte ceiling, walks an ordered ladder of
//! encoder strategies and keeps the first output that fits. Per-strategy
//! failures are logged and skipped; only exhausting every applicable ladder
//! is an error. The source file is never modified.

pub mod attempt;
mod audio;
pub mod strategy;
mod video;

use crate::encode::{EncodeError, Encoder};
use crate::probe::{DurationProber, ProbeError};
use crate::progress::{ProgressEvent, ProgressSink, STAGE_COMPRESSION};
use crate::size_gate::{check_ceiling, compression_ratio_percent, CeilingResult};
use attempt::{attempt_path, canonical_output_path, TempAttempt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strategy::{StrategyDescriptor, StrategyTables};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use attempt::{COMPRESSED_SUFFIX, TEMP_MARKERS};
pub use strategy::{
    derive_target_bitrate, AudioSettings, VideoQuality, VideoSettings, AUDIO_LADDER,
    BITRATE_FLOOR_BPS, BITRATE_GATE_BPS, FALLBACK_STRATEGY, RESOLUTION_LADDER,
};

/// Error type for the compression pipeline
#[derive(Debug, Error)]
pub enum CompressError {
    /// Duration probing failed (recovered internally via the fallback encode)
    #[error("Probe failed: {0}")]
    Probe(#[from] ProbeError),

    /// One strategy's encoder invocation failed (recovered internally)
    #[error("Encode failed: {0}")]
    Encode(#[from] EncodeError),

    /// No strategy produced an output under the ceiling
    #[error("Could not compress under {ceiling_bytes} bytes after {attempts} attempts")]
    CompressionExhausted { attempts: usize, ceiling_bytes: u64 },

    /// The target cannot be compressed to at all
    #[error("Invalid compression target: {0}")]
    InvalidTarget(String),

    /// IO error reading the source or promoting the output
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What kind of media a source holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_is_audio(is_audio: bool) -> Self {
        if is_audio {
            MediaKind::Audio
        } else {
            MediaKind::Video
        }
    }

    /// Extension of the canonical output
    pub fn output_extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }
}

/// Which ladder produced an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ladder {
    Audio,
    Resolution,
    Bitrate,
    Fallback,
}

/// Input to one compression call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionTarget {
    source: PathBuf,
    ceiling_bytes: u64,
    kind: MediaKind,
}

impl CompressionTarget {
    /// Create a target; the ceiling must be positive
    pub fn new(source: impl Into<PathBuf>, ceiling_bytes: u64, kind: MediaKind) -> Result<Self, CompressError> {
        if ceiling_bytes == 0 {
            return Err(CompressError::InvalidTarget(
                "size ceiling must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            source: source.into(),
            ceiling_bytes,
            kind,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn output_path(&self) -> PathBuf {
        canonical_output_path(&self.source, self.kind.output_extension())
    }
}

/// A successful compression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionOutcome {
    pub output_path: PathBuf,
    /// Description of the strategy that fit
    pub description: String,
    pub size_bytes: u64,
    pub ladder: Ladder,
    /// Encoder invocations made, including the successful one
    pub attempts: usize,
}

/// Per-call bookkeeping shared by the ladders
pub(crate) struct Run<'a> {
    pub target: &'a CompressionTarget,
    pub progress: &'a dyn ProgressSink,
    pub original_bytes: u64,
    pub attempts: usize,
}

/// Runs compression ladders against an [`Encoder`].
///
/// Holds no per-call state; one instance serves any number of concurrent
/// calls on different sources.
#[derive(Clone)]
pub struct Compressor {
    encoder: Arc<dyn Encoder>,
    prober: Arc<dyn DurationProber>,
    tables: StrategyTables,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor")
            .field("tables", &self.tables)
            .finish_non_exhaustive()
    }
}

impl Compressor {
    pub fn new(encoder: Arc<dyn Encoder>, prober: Arc<dyn DurationProber>) -> Self {
        Self {
            encoder,
            prober,
            tables: StrategyTables::standard(),
        }
    }

    /// Replace the strategy tables
    pub fn with_tables(mut self, tables: StrategyTables) -> Self {
        self.tables = tables;
        self
    }

    pub fn tables(&self) -> &StrategyTables {
        &self.tables
    }

    pub fn encoder(&self) -> &Arc<dyn Encoder> {
        &self.encoder
    }

    /// Compress `target` under its ceiling.
    ///
    /// Blocks until done; run it on a blocking worker from async code.
    ///
    /// # Returns
    /// * `Ok(CompressionOutcome)` - the canonical output, under the ceiling
    /// * `Err(CompressError::CompressionExhausted)` - nothing fit; no files left behind
    /// * `Err(CompressError::Io)` - the source could not be read or the output not written
    pub fn compress(
        &self,
        target: &CompressionTarget,
        progress: &dyn ProgressSink,
    ) -> Result<CompressionOutcome, CompressError> {
        let original_bytes = fs::metadata(target.source())?.len();
        info!(
            source = %target.source().display(),
            original_bytes,
            ceiling_bytes = target.ceiling_bytes(),
            kind = ?target.kind(),
            "Compressing"
        );

        let mut run = Run {
            target,
            progress,
            original_bytes,
            attempts: 0,
        };

        let found = match target.kind() {
            MediaKind::Audio => self.compress_audio(&mut run)?,
            MediaKind::Video => self.compress_video(&mut run)?,
        };

        match found {
            Some(outcome) => Ok(outcome),
            None => {
                let err = CompressError::CompressionExhausted {
                    attempts: run.attempts,
                    ceiling_bytes: target.ceiling_bytes(),
                };
                error!(source = %target.source().display(), error = %err, "Compression exhausted");
                progress.emit(ProgressEvent::failed(
                    STAGE_COMPRESSION,
                    "Could not compress file under the size limit",
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }

    /// Try `strategies` in order; the first output under the ceiling wins.
    ///
    /// Returns `Ok(None)` when none fit. Encoder failures and missing
    /// outputs count as misses.
    pub(crate) fn run_ladder(
        &self,
        run: &mut Run<'_>,
        strategies: &[StrategyDescriptor],
        ladder: Ladder,
    ) -> Result<Option<CompressionOutcome>, CompressError> {
        let target = run.target;
        let source = target.source();
        let total = strategies.len();

        for (i, strategy) in strategies.iter().enumerate() {
            run.progress.emit(ProgressEvent::stage(
                STAGE_COMPRESSION,
                i as f64 / total as f64,
                format!("Trying {} compression...", strategy.description),
            ));

            let temp = TempAttempt::new(attempt_path(source, ladder, i));
            let args = strategy.encoder_args(source, temp.path());
            run.attempts += 1;

            if let Err(e) = self.encoder.invoke(&args) {
                warn!(
                    ladder = ?ladder,
                    strategy = %strategy.description,
                    error = %e,
                    "Compression attempt failed"
                );
                continue;
            }

            let size_bytes = match temp.size() {
                Ok(size) => size,
                Err(e) => {
                    warn!(
                        strategy = %strategy.description,
                        error = %e,
                        "Encoder produced no readable output"
                    );
                    continue;
                }
            };

            match check_ceiling(size_bytes, target.ceiling_bytes()) {
                CeilingResult::Fits => {
                    let output_path = temp.promote(&target.output_path())?;
                    let ratio = compression_ratio_percent(size_bytes, run.original_bytes).unwrap_or(0.0);
                    info!(
                        output = %output_path.display(),
                        strategy = %strategy.description,
                        size_bytes,
                        "Compressed successfully"
                    );
                    run.progress.emit(ProgressEvent::completed(
                        STAGE_COMPRESSION,
                        format!(
                            "Compressed to {} ({:.1}% of original size)",
                            strategy.description, ratio
                        ),
                    ));
                    return Ok(Some(CompressionOutcome {
                        output_path,
                        description: strategy.description.to_string(),
                        size_bytes,
                        ladder,
                        attempts: run.attempts,
                    }));
                }
                CeilingResult::Exceeds { size_bytes, ceiling_bytes } => {
                    debug!(
                        strategy = %strategy.description,
                        size_bytes,
                        ceiling_bytes,
                        "Attempt over ceiling"
                    );
                }
            }
        }

        Ok(None)
    }
}

/// Compress a file in one call.
///
/// # Arguments
/// * `compressor` - the configured pipeline
/// * `source` - file to compress; left untouched
/// * `is_audio` - pick the audio ladder instead of the video ladders
/// * `ceiling_bytes` - upload limit, from `max_file_size_mb * 1024 * 1024`
/// * `progress` - receives progress events
pub fn compress_file(
    compressor: &Compressor,
    source: &Path,
    is_audio: bool,
    ceiling_bytes: u64,
    progress: &dyn ProgressSink,
) -> Result<PathBuf, CompressError> {
    let target = CompressionTarget::new(source, ceiling_bytes, MediaKind::from_is_audio(is_audio))?;
    Ok(compressor.compress(&target, progress)?.output_path)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::fs::File;
    use std::sync::Mutex;

    /// Writes a file of a scripted size at the output path of each call.
    ///
    /// Call `n` writes `sizes[n]`, or `default_size` past the end of the
    /// script. Calls listed in `fail_calls` write a partial file and fail.
    pub struct SizedEncoder {
        pub sizes: Vec<u64>,
        pub default_size: u64,
        pub fail_calls: Vec<usize>,
        pub calls: Mutex<Vec<Vec<String>>>,
    }

    impl SizedEncoder {
        pub fn new(sizes: Vec<u64>, default_size: u64) -> Self {
            Self {
                sizes,
                default_size,
                fail_calls: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Encoder for SizedEncoder {
        fn invoke(&self, args: &[String]) -> Result<(), EncodeError> {
            let mut calls = self.calls.lock().unwrap();
            let index = calls.len();
            calls.push(args.to_vec());

            let output = args.last().expect("output path is last");
            let file = File::create(output)?;
            if self.fail_calls.contains(&index) {
                file.set_len(10)?;
                return Err(EncodeError::Failed {
                    code: 1,
                    stderr: "scripted failure".to_string(),
                });
            }
            let size = self.sizes.get(index).copied().unwrap_or(self.default_size);
            file.set_len(size)?;
            Ok(())
        }
    }

    /// Returns a fixed duration, or fails when `None`
    pub struct FixedProber(pub Option<f64>);

    impl DurationProber for FixedProber {
        fn probe_duration(&self, _path: &Path) -> Result<f64, ProbeError> {
            self.0.ok_or(ProbeError::Empty)
        }
    }

    pub fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.windows(2)
            .find(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
    }

    /// Every file in `dir`, sorted by name
    pub fn dir_listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub fn sparse_file(path: &Path, size: u64) {
        File::create(path).unwrap().set_len(size).unwrap();
    }
}

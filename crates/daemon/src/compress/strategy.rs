//! Strategy tables for the compression ladders.
//!
//! Every ladder is an ordered list of [`StrategyDescriptor`]s from the
//! largest expected output to the smallest. Compressors take the first
//! strategy whose output fits, so table order decides output quality.

use std::borrow::Cow;
use std::path::Path;

/// Derived bitrates below this use the bitrate ladder instead of CRF encoding
pub const BITRATE_GATE_BPS: u64 = 300_000;

/// Lowest bitrate the bitrate ladder will try
pub const BITRATE_FLOOR_BPS: u64 = 100_000;

/// Share of the ceiling given to the video stream when deriving bitrate
pub const VIDEO_BUDGET_FACTOR: f64 = 0.8;

/// Video rate control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoQuality {
    /// Constant rate factor
    Crf(u8),
    /// Average bitrate in bits/sec, capped at 2x peak with a 4x buffer
    Bitrate(u64),
}

/// Video stream parameters of a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSettings {
    pub codec: &'static str,
    pub preset: &'static str,
    pub quality: VideoQuality,
    /// Scale filter expression, e.g. `scale=1280:720`
    pub scale: Option<&'static str>,
    /// Frame-rate filter expression, e.g. `fps=30`
    pub fps: Option<&'static str>,
}

impl VideoSettings {
    /// Scale then fps, comma-joined; `None` when neither is set
    pub fn filter_chain(&self) -> Option<String> {
        let filters: Vec<&str> = [self.scale, self.fps].into_iter().flatten().collect();
        if filters.is_empty() {
            None
        } else {
            Some(filters.join(","))
        }
    }
}

/// Audio stream parameters of a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioSettings {
    pub codec: &'static str,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    /// Channel count; only forced for audio-only strategies
    pub channels: Option<u8>,
}

/// One row of a strategy table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDescriptor {
    /// `None` for audio-only output
    pub video: Option<VideoSettings>,
    pub audio: AudioSettings,
    pub description: Cow<'static, str>,
}

impl StrategyDescriptor {
    /// Full encoder argument list reading `input` and writing `output`.
    ///
    /// The output path is always the last argument, preceded by `-y`.
    pub fn encoder_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec!["-i".to_string(), input.to_string_lossy().into_owned()];

        match &self.video {
            None => {
                args.extend([
                    "-vn".to_string(),
                    "-acodec".to_string(),
                    self.audio.codec.to_string(),
                    "-ab".to_string(),
                    format!("{}k", self.audio.bitrate_kbps),
                    "-ar".to_string(),
                    self.audio.sample_rate.to_string(),
                ]);
                if let Some(channels) = self.audio.channels {
                    args.extend(["-ac".to_string(), channels.to_string()]);
                }
            }
            Some(video) => {
                args.extend(["-c:v".to_string(), video.codec.to_string()]);
                match video.quality {
                    VideoQuality::Crf(crf) => {
                        args.extend([
                            "-preset".to_string(),
                            video.preset.to_string(),
                            "-crf".to_string(),
                            crf.to_string(),
                        ]);
                    }
                    VideoQuality::Bitrate(bps) => {
                        args.extend([
                            "-b:v".to_string(),
                            bps.to_string(),
                            "-preset".to_string(),
                            video.preset.to_string(),
                            "-maxrate".to_string(),
                            bps.saturating_mul(2).to_string(),
                            "-bufsize".to_string(),
                            bps.saturating_mul(4).to_string(),
                        ]);
                    }
                }
                if let Some(chain) = video.filter_chain() {
                    args.extend(["-vf".to_string(), chain]);
                }
                args.extend([
                    "-c:a".to_string(),
                    self.audio.codec.to_string(),
                    "-b:a".to_string(),
                    format!("{}k", self.audio.bitrate_kbps),
                    "-ar".to_string(),
                    self.audio.sample_rate.to_string(),
                ]);
            }
        }

        args.extend(["-y".to_string(), output.to_string_lossy().into_owned()]);
        args
    }
}

const fn audio_row(bitrate_kbps: u32, sample_rate: u32, channels: u8, description: &'static str) -> StrategyDescriptor {
    StrategyDescriptor {
        video: None,
        audio: AudioSettings {
            codec: "mp3",
            bitrate_kbps,
            sample_rate,
            channels: Some(channels),
        },
        description: Cow::Borrowed(description),
    }
}

#[allow(clippy::too_many_arguments)]
const fn crf_row(
    preset: &'static str,
    crf: u8,
    scale: Option<&'static str>,
    fps: &'static str,
    audio_kbps: u32,
    audio_rate: u32,
    description: &'static str,
) -> StrategyDescriptor {
    StrategyDescriptor {
        video: Some(VideoSettings {
            codec: "libx264",
            preset,
            quality: VideoQuality::Crf(crf),
            scale,
            fps: Some(fps),
        }),
        audio: AudioSettings {
            codec: "aac",
            bitrate_kbps: audio_kbps,
            sample_rate: audio_rate,
            channels: None,
        },
        description: Cow::Borrowed(description),
    }
}

/// MP3 ladder, 128 kbps stereo down to 16 kbps mono
pub static AUDIO_LADDER: [StrategyDescriptor; 7] = [
    audio_row(128, 44_100, 2, "128 kbps stereo"),
    audio_row(96, 44_100, 2, "96 kbps stereo"),
    audio_row(64, 22_050, 2, "64 kbps stereo"),
    audio_row(48, 22_050, 2, "48 kbps stereo"),
    audio_row(32, 22_050, 1, "32 kbps mono"),
    audio_row(24, 16_000, 1, "24 kbps mono"),
    audio_row(16, 11_025, 1, "16 kbps mono"),
];

/// H.264 CRF ladder, full resolution down to 240p
pub static RESOLUTION_LADDER: [StrategyDescriptor; 12] = [
    crf_row("fast", 23, None, "fps=30", 128, 44_100, "Full resolution, 30fps"),
    crf_row("fast", 25, None, "fps=30", 96, 44_100, "Full resolution, good quality"),
    crf_row("fast", 23, Some("scale=1280:720"), "fps=30", 96, 44_100, "720p, 30fps"),
    crf_row("fast", 25, Some("scale=1280:720"), "fps=30", 64, 22_050, "720p, standard quality"),
    crf_row("fast", 23, Some("scale=960:540"), "fps=30", 64, 22_050, "540p, 30fps"),
    crf_row("fast", 25, Some("scale=960:540"), "fps=24", 48, 22_050, "540p, 24fps"),
    crf_row("fast", 23, Some("scale=854:480"), "fps=30", 48, 22_050, "480p, 30fps"),
    crf_row("fast", 25, Some("scale=854:480"), "fps=24", 48, 22_050, "480p, 24fps"),
    crf_row("fast", 23, Some("scale=640:360"), "fps=24", 32, 22_050, "360p, 24fps"),
    crf_row("fast", 25, Some("scale=640:360"), "fps=20", 32, 22_050, "360p, 20fps"),
    crf_row("veryfast", 25, Some("scale=426:240"), "fps=20", 32, 22_050, "240p, 20fps"),
    crf_row("veryfast", 27, Some("scale=426:240"), "fps=15", 24, 16_000, "240p, 15fps"),
];

/// Single-pass encode used when the source duration is unknown
pub static FALLBACK_STRATEGY: StrategyDescriptor = StrategyDescriptor {
    video: Some(VideoSettings {
        codec: "libx264",
        preset: "veryfast",
        quality: VideoQuality::Crf(40),
        scale: Some("scale=iw*0.5:ih*0.5"),
        fps: Some("fps=15"),
    }),
    audio: AudioSettings {
        codec: "aac",
        bitrate_kbps: 32,
        sample_rate: 22_050,
        channels: None,
    },
    description: Cow::Borrowed("Fallback, half resolution, 15fps"),
};

/// Per-tier bitrate divisors, scale and fps of the bitrate ladder.
///
/// A divisor of 0 marks the absolute floor tier.
const BITRATE_TIERS: [(u64, Option<&str>, Option<&str>, &str); 6] = [
    (1, None, None, "full resolution"),
    (2, Some("scale=iw*0.8:ih*0.8"), Some("fps=30"), "80% resolution, 30fps"),
    (3, Some("scale=iw*0.6:ih*0.6"), Some("fps=24"), "60% resolution, 24fps"),
    (4, Some("scale=iw*0.5:ih*0.5"), Some("fps=20"), "50% resolution, 20fps"),
    (6, Some("scale=iw*0.4:ih*0.4"), Some("fps=15"), "40% resolution, 15fps"),
    (0, Some("scale=iw*0.3:ih*0.3"), Some("fps=10"), "30% resolution, 10fps"),
];

/// Target video bitrate (bits/sec) for a byte ceiling spread over `duration_secs`.
///
/// `ceiling * 0.8 * 8 / duration`, truncated; 20% of the budget is left for
/// audio and container overhead. Returns 0 for a non-positive duration.
pub fn derive_target_bitrate(ceiling_bytes: u64, duration_secs: f64) -> u64 {
    if !(duration_secs.is_finite() && duration_secs > 0.0) {
        return 0;
    }
    (ceiling_bytes as f64 * VIDEO_BUDGET_FACTOR * 8.0 / duration_secs) as u64
}

/// The set of ladders a compressor walks.
///
/// [`StrategyTables::standard`] holds the production tables; tests swap in
/// shorter synthetic ones.
#[derive(Debug, Clone)]
pub struct StrategyTables {
    pub audio: Vec<StrategyDescriptor>,
    pub resolution: Vec<StrategyDescriptor>,
    pub fallback: StrategyDescriptor,
    pub bitrate_gate_bps: u64,
    pub bitrate_floor_bps: u64,
}

impl Default for StrategyTables {
    fn default() -> Self {
        Self::standard()
    }
}

impl StrategyTables {
    pub fn standard() -> Self {
        Self {
            audio: AUDIO_LADDER.to_vec(),
            resolution: RESOLUTION_LADDER.to_vec(),
            fallback: FALLBACK_STRATEGY.clone(),
            bitrate_gate_bps: BITRATE_GATE_BPS,
            bitrate_floor_bps: BITRATE_FLOOR_BPS,
        }
    }

    /// True when a derived bitrate is too low for CRF encoding
    pub fn needs_bitrate_ladder(&self, target_bps: u64) -> bool {
        target_bps < self.bitrate_gate_bps
    }

    /// Bitrate ladder starting at `target_bps`.
    ///
    /// Tiers are target, /2, /3, /4, /6 and the floor, each paired with a
    /// smaller scale and frame rate. No tier goes below the floor. Audio is
    /// 64k on the first tier only.
    pub fn bitrate_ladder(&self, target_bps: u64) -> Vec<StrategyDescriptor> {
        BITRATE_TIERS
            .iter()
            .enumerate()
            .map(|(i, &(divisor, scale, fps, label))| {
                let bps = if divisor == 0 {
                    self.bitrate_floor_bps
                } else {
                    (target_bps / divisor).max(self.bitrate_floor_bps)
                };
                StrategyDescriptor {
                    video: Some(VideoSettings {
                        codec: "libx264",
                        preset: "veryfast",
                        quality: VideoQuality::Bitrate(bps),
                        scale,
                        fps,
                    }),
                    audio: AudioSettings {
                        codec: "aac",
                        bitrate_kbps: if i == 0 { 64 } else { 32 },
                        sample_rate: 22_050,
                        channels: None,
                    },
                    description: Cow::Owned(format!("{} kbps, {}", bps / 1000, label)),
                }
            })
            .collect()
    }
}

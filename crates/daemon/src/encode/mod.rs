//! Encoder invocation for cliprelay

pub mod extract;
pub mod ffmpeg;

pub use extract::{derived_base_name, extract_audio, extract_audio_args, extracted_audio_path, AUDIO_SUFFIX};
pub use ffmpeg::{build_ffmpeg_command, hide_console_window, EncodeError, Encoder, FfmpegEncoder};

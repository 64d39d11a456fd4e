//! Audio track extraction

use super::ffmpeg::{EncodeError, Encoder};
use std::path::{Path, PathBuf};

/// Suffix of extracted audio files, before the extension
pub const AUDIO_SUFFIX: &str = "_audio";

/// Base name of every file derived from `source`: `<stem>_<ext>`, or the
/// bare stem when `source` has no extension.
///
/// Sources that differ only by extension get different bases.
pub fn derived_base_name(source: &Path) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match source.extension() {
        Some(ext) => format!("{}_{}", stem, ext.to_string_lossy()),
        None => stem,
    }
}

/// Where [`extract_audio`] writes for `video`: `<stem>_<ext>_audio.mp3` beside it
pub fn extracted_audio_path(video: &Path) -> PathBuf {
    video.with_file_name(format!("{}{}.mp3", derived_base_name(video), AUDIO_SUFFIX))
}

/// Arguments extracting the audio of `video` into `output` as 128k/44.1kHz MP3
pub fn extract_audio_args(video: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        video.to_string_lossy().into_owned(),
        "-vn".to_string(),
        "-acodec".to_string(),
        "mp3".to_string(),
        "-ab".to_string(),
        "128k".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

/// Extract the audio track of `video` into an MP3 next to it.
///
/// # Returns
/// * `Ok(path)` - the extracted `<stem>_<ext>_audio.mp3`
/// * `Err(EncodeError)` - the encoder failed or wrote nothing
pub fn extract_audio(encoder: &dyn Encoder, video: &Path) -> Result<PathBuf, EncodeError> {
    let output = extracted_audio_path(video);
    encoder.invoke(&extract_audio_args(video, &output))?;

    if !output.is_file() {
        return Err(EncodeError::MissingOutput(output));
    }
    Ok(output)
}

//! Per-strategy temporary outputs.
//!
//! Each strategy writes into its own temp file wrapped in a [`TempAttempt`].
//! The guard deletes the file when dropped, so every early return and every
//! failed strategy cleans up after itself. Only [`TempAttempt::promote`]
//! keeps the file, by moving it to the canonical output path.

use super::Ladder;
use crate::encode::derived_base_name;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Marker in the file stem of every finished output
pub const COMPRESSED_SUFFIX: &str = "_compressed";

/// Stem markers of intermediates the pipeline creates next to the source
pub const TEMP_MARKERS: [&str; 3] = ["_temp_", "_bitrate_", "_fallback"];

/// Canonical output for `source`: `<stem>_<src ext>_compressed.<extension>`
/// in the same folder
pub fn canonical_output_path(source: &Path, extension: &str) -> PathBuf {
    source.with_file_name(format!("{}{}.{}", derived_base_name(source), COMPRESSED_SUFFIX, extension))
}

/// Temp file for attempt `index` of `ladder`.
///
/// Names are unique per source file name, ladder and index, so concurrent
/// jobs on different sources never collide.
pub fn attempt_path(source: &Path, ladder: Ladder, index: usize) -> PathBuf {
    let base = derived_base_name(source);
    let name = match ladder {
        Ladder::Audio => format!("{}_temp_{}.mp3", base, index),
        Ladder::Resolution => format!("{}_temp_{}.mp4", base, index),
        Ladder::Bitrate => format!("{}_bitrate_{}.mp4", base, index),
        Ladder::Fallback => format!("{}_fallback.mp4", base),
    };
    source.with_file_name(name)
}

/// A temp output that is removed on drop unless promoted
#[derive(Debug)]
pub struct TempAttempt {
    path: PathBuf,
    keep: bool,
}

impl TempAttempt {
    pub fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of whatever the encoder wrote
    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Move the temp file to `dest`, replacing any stale file there.
    ///
    /// Tries a rename first and falls back to copy when the rename fails
    /// (cross-device moves). On copy the temp file is still removed on drop.
    pub fn promote(mut self, dest: &Path) -> io::Result<PathBuf> {
        if fs::rename(&self.path, dest).is_ok() {
            self.keep = true;
            return Ok(dest.to_path_buf());
        }
        fs::copy(&self.path, dest)?;
        Ok(dest.to_path_buf())
    }
}

impl Drop for TempAttempt {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temp file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_attempt_paths_are_distinct() {
        let source = Path::new("/clips/match.mkv");
        assert_eq!(attempt_path(source, Ladder::Resolution, 0), PathBuf::from("/clips/match_mkv_temp_0.mp4"));
        assert_eq!(attempt_path(source, Ladder::Audio, 3), PathBuf::from("/clips/match_mkv_temp_3.mp3"));
        assert_eq!(attempt_path(source, Ladder::Bitrate, 2), PathBuf::from("/clips/match_mkv_bitrate_2.mp4"));
        assert_eq!(attempt_path(source, Ladder::Fallback, 0), PathBuf::from("/clips/match_mkv_fallback.mp4"));
    }

    #[test]
    fn test_same_stem_sources_get_separate_paths() {
        let mp4 = Path::new("/clips/clip.mp4");
        let mkv = Path::new("/clips/clip.mkv");
        for ladder in [Ladder::Audio, Ladder::Resolution, Ladder::Bitrate, Ladder::Fallback] {
            assert_ne!(attempt_path(mp4, ladder, 0), attempt_path(mkv, ladder, 0));
        }
        assert_ne!(canonical_output_path(mp4, "mp4"), canonical_output_path(mkv, "mp4"));
    }

    #[test]
    fn test_canonical_output_path() {
        assert_eq!(
            canonical_output_path(Path::new("/clips/match.mkv"), "mp4"),
            PathBuf::from("/clips/match_mkv_compressed.mp4")
        );
    }

    #[test]
    fn test_dropped_attempt_is_removed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a_temp_0.mp4");
        fs::write(&path, b"partial").unwrap();

        {
            let attempt = TempAttempt::new(path.clone());
            assert_eq!(attempt.size().unwrap(), 7);
        }

        assert!(!path.exists());
    }

    #[test]
    fn test_drop_without_file_is_quiet() {
        let dir = TempDir::new().unwrap();
        drop(TempAttempt::new(dir.path().join("never_written.mp4")));
    }

    #[test]
    fn test_promote_replaces_stale_output() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a_temp_2.mp4");
        let dest = dir.path().join("a_compressed.mp4");
        fs::write(&temp, b"fresh").unwrap();
        fs::write(&dest, b"stale output").unwrap();

        let promoted = TempAttempt::new(temp.clone()).promote(&dest).unwrap();

        assert_eq!(promoted, dest);
        assert_eq!(fs::read(&dest).unwrap(), b"fresh");
        assert!(!temp.exists());
    }
}

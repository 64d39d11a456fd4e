//! Scanner module for discovering clip files in watched folders.
//!
//! This module walks the watched folders for video files, filtering by
//! extension and skipping the intermediates the pipeline writes next to
//! the source.

use crate::compress::{COMPRESSED_SUFFIX, TEMP_MARKERS};
use crate::encode::AUDIO_SUFFIX;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Video file extensions relayed by the watcher (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v"];

/// A candidate clip discovered during scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    /// Full path to the clip.
    pub path: PathBuf,
    /// File size in bytes at discovery time.
    pub size_bytes: u64,
    /// Last modified time of the file.
    pub modified_time: SystemTime,
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = ext.to_lowercase();
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Checks if a file was written by the pipeline itself.
///
/// Relaying these would loop: every compressed upload would be picked up
/// as a new clip.
pub fn is_pipeline_artifact(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    stem.contains(COMPRESSED_SUFFIX)
        || stem.contains(AUDIO_SUFFIX)
        || TEMP_MARKERS.iter().any(|marker| stem.contains(marker))
}

/// Scans the given folders for clips.
///
/// This function:
/// - Walks each root, descending into subfolders only when `recursive`
/// - Stops descending once `max_dirs` subfolders of a root have been entered
/// - Skips hidden directories (names starting with `.`)
/// - Keeps video files that are not pipeline artifacts
/// - Captures file size and modified time for stability checking
pub fn scan_folders(roots: &[PathBuf], recursive: bool, max_dirs: usize) -> Vec<ScanCandidate> {
    let mut candidates = Vec::new();

    for root in roots {
        if !root.is_dir() {
            continue;
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut dirs_entered = 0usize;

        let walker = WalkDir::new(root)
            .max_depth(max_depth)
            .into_iter()
            .filter_entry(|entry| {
                if !entry.file_type().is_dir() || entry.depth() == 0 {
                    return true;
                }
                // Allow the root directory even if it starts with '.'
                if entry.file_name().to_str().is_some_and(|name| name.starts_with('.')) {
                    return false;
                }
                dirs_entered += 1;
                dirs_entered <= max_dirs
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !is_video_file(path) || is_pipeline_artifact(path) {
                continue;
            }

            if let Ok(metadata) = entry.metadata() {
                candidates.push(ScanCandidate {
                    path: path.to_path_buf(),
                    size_bytes: metadata.len(),
                    modified_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }
    }

    candidates
}

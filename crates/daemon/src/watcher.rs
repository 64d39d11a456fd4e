//! Polling folder watcher.
//!
//! Each poll rescans the watched folders. The first poll only records what
//! is already there; later polls report files that were not present before,
//! once each. New subfolders are covered automatically when recursive.

use crate::scan::{scan_folders, ScanCandidate};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

/// Tracks which clips have already been seen in a set of folders
#[derive(Debug)]
pub struct FolderWatcher {
    roots: Vec<PathBuf>,
    recursive: bool,
    max_dirs: usize,
    seen: HashSet<PathBuf>,
    primed: bool,
}

impl FolderWatcher {
    pub fn new(roots: Vec<PathBuf>, recursive: bool, max_dirs: usize) -> Self {
        Self {
            roots,
            recursive,
            max_dirs,
            seen: HashSet::new(),
            primed: false,
        }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Rescan and return clips that appeared since the previous poll.
    ///
    /// Files that disappear are forgotten, so a clip recreated under the
    /// same name is reported again.
    pub fn poll(&mut self) -> Vec<ScanCandidate> {
        let current = scan_folders(&self.roots, self.recursive, self.max_dirs);

        let fresh: Vec<ScanCandidate> = if self.primed {
            current
                .iter()
                .filter(|candidate| !self.seen.contains(&candidate.path))
                .cloned()
                .collect()
        } else {
            debug!(existing = current.len(), "Recorded baseline of existing clips");
            self.primed = true;
            Vec::new()
        };

        self.seen = current.into_iter().map(|candidate| candidate.path).collect();
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_existing_files_are_baseline() {
        let temp_dir = TempDir::new().unwrap();
        File::create(temp_dir.path().join("old.mp4")).unwrap();

        let mut watcher = FolderWatcher::new(vec![temp_dir.path().to_path_buf()], false, 10_000);

        assert!(watcher.poll().is_empty());
        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn test_new_file_reported_once() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::new(vec![temp_dir.path().to_path_buf()], false, 10_000);
        assert!(watcher.poll().is_empty());

        let clip = temp_dir.path().join("ace.mp4");
        File::create(&clip).unwrap();

        let fresh = watcher.poll();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].path, clip);
        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn test_new_subfolder_is_watched_when_recursive() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::new(vec![temp_dir.path().to_path_buf()], true, 10_000);
        watcher.poll();

        let session = temp_dir.path().join("2026-10-15");
        fs::create_dir(&session).unwrap();
        File::create(session.join("clutch.mkv")).unwrap();

        let fresh = watcher.poll();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].path, session.join("clutch.mkv"));
    }

    #[test]
    fn test_artifacts_are_never_reported() {
        let temp_dir = TempDir::new().unwrap();
        let mut watcher = FolderWatcher::new(vec![temp_dir.path().to_path_buf()], false, 10_000);
        watcher.poll();

        File::create(temp_dir.path().join("ace_compressed.mp4")).unwrap();
        File::create(temp_dir.path().join("ace_temp_1.mp4")).unwrap();

        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn test_recreated_file_is_reported_again() {
        let temp_dir = TempDir::new().unwrap();
        let clip = temp_dir.path().join("ace.mp4");
        let mut watcher = FolderWatcher::new(vec![temp_dir.path().to_path_buf()], false, 10_000);
        watcher.poll();

        File::create(&clip).unwrap();
        assert_eq!(watcher.poll().len(), 1);

        fs::remove_file(&clip).unwrap();
        assert!(watcher.poll().is_empty());

        File::create(&clip).unwrap();
        assert_eq!(watcher.poll().len(), 1);
    }
}

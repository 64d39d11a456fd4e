//! Persistent relay statistics.
//!
//! Counters survive restarts in `<state_dir>/stats.json`. Opening the store
//! for the daemon starts a new session: the session counter resets and the
//! start time moves to now. Lifetime counters keep accumulating.

use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// File name of the statistics document
pub const STATS_FILE: &str = "stats.json";

/// Scratch file a save writes before renaming over [`STATS_FILE`]
const STATS_TEMP_FILE: &str = "stats.json.tmp";

/// Errors reading or writing statistics
#[derive(Debug, Error)]
pub enum StatsError {
    /// IO error on the statistics file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The statistics file is not valid JSON
    #[error("Invalid statistics file: {0}")]
    Json(#[from] serde_json::Error),

    /// No state directory is configured and none could be derived
    #[error("Could not determine a data directory for statistics")]
    NoStateDir,
}

/// Clip counters, all times in Unix milliseconds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayStats {
    pub total_clips: u64,
    pub session_clips: u64,
    pub total_size_bytes: u64,
    pub last_clip_time_ms: Option<i64>,
    pub start_time_ms: i64,
    pub last_update_time_ms: i64,
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn fresh_stats() -> RelayStats {
    let now = current_timestamp_ms();
    RelayStats {
        start_time_ms: now,
        last_update_time_ms: now,
        ..RelayStats::default()
    }
}

/// `<data_dir>/cliprelay` for the current user
pub fn default_state_dir() -> Result<PathBuf, StatsError> {
    let base = BaseDirs::new().ok_or(StatsError::NoStateDir)?;
    Ok(base.data_dir().join("cliprelay"))
}

/// Thread-safe handle on the statistics file
#[derive(Debug)]
pub struct StatsStore {
    path: PathBuf,
    stats: Mutex<RelayStats>,
}

impl StatsStore {
    /// Load the statistics in `state_dir` without touching the session.
    ///
    /// A missing file yields fresh counters; nothing is written. A file that
    /// is not valid JSON is logged and replaced by fresh counters on the
    /// next save.
    pub fn load(state_dir: &Path) -> Result<Self, StatsError> {
        let path = state_dir.join(STATS_FILE);
        let stats = if path.exists() {
            match serde_json::from_str(&fs::read_to_string(&path)?) {
                Ok(stats) => stats,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Statistics file is corrupt, starting fresh");
                    fresh_stats()
                }
            }
        } else {
            fresh_stats()
        };
        Ok(Self {
            path,
            stats: Mutex::new(stats),
        })
    }

    /// Load the statistics and start a new session, creating the file if needed
    pub fn open(state_dir: &Path) -> Result<Self, StatsError> {
        let store = Self::load(state_dir)?;
        store.reset_session()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, RelayStats> {
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write `stats` to a scratch file and rename it into place
    fn save(&self, stats: &RelayStats) -> Result<(), StatsError> {
        let json = serde_json::to_string_pretty(stats)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = self.path.with_file_name(STATS_TEMP_FILE);
        fs::write(&temp, json)?;
        if let Err(e) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }
        debug!(path = %self.path.display(), "Saved statistics");
        Ok(())
    }

    /// Apply `change` to a copy, persist it, then publish it in memory.
    ///
    /// On a failed save the in-memory counters are left as they were.
    fn update(&self, change: impl FnOnce(&mut RelayStats)) -> Result<RelayStats, StatsError> {
        let mut stats = self.lock();
        let mut next = stats.clone();
        change(&mut next);
        self.save(&next)?;
        *stats = next.clone();
        Ok(next)
    }

    /// Count one relayed clip of `size_bytes`
    pub fn record_clip(&self, size_bytes: u64) -> Result<RelayStats, StatsError> {
        self.update(|stats| {
            let now = current_timestamp_ms();
            stats.total_clips += 1;
            stats.session_clips += 1;
            stats.total_size_bytes = stats.total_size_bytes.saturating_add(size_bytes);
            stats.last_clip_time_ms = Some(now);
            stats.last_update_time_ms = now;
        })
    }

    /// Zero the session counter and restart the session clock
    pub fn reset_session(&self) -> Result<(), StatsError> {
        self.update(|stats| {
            let now = current_timestamp_ms();
            stats.session_clips = 0;
            stats.start_time_ms = now;
            stats.last_update_time_ms = now;
        })?;
        Ok(())
    }

    pub fn snapshot(&self) -> RelayStats {
        self.lock().clone()
    }

    /// Time since the session started
    pub fn uptime(&self) -> Duration {
        let started = self.lock().start_time_ms;
        let elapsed = current_timestamp_ms().saturating_sub(started).max(0);
        Duration::from_millis(elapsed as u64)
    }

    /// Write the current statistics to `dest`
    pub fn export(&self, dest: &Path) -> Result<(), StatsError> {
        let stats = self.snapshot();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, serde_json::to_string_pretty(&stats)?)?;
        Ok(())
    }

    /// Take lifetime counters from an exported file; the session is kept
    pub fn import(&self, src: &Path) -> Result<RelayStats, StatsError> {
        let imported: RelayStats = serde_json::from_str(&fs::read_to_string(src)?)?;
        self.update(|stats| {
            stats.total_clips = imported.total_clips;
            stats.total_size_bytes = imported.total_size_bytes;
            stats.last_clip_time_ms = imported.last_clip_time_ms;
            stats.last_update_time_ms = current_timestamp_ms();
        })
    }
}

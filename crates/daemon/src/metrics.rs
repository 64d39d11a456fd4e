//! Metrics module for cliprelay
//!
//! Provides structs for job metrics, system metrics, and the snapshot the
//! dashboard polls, with JSON serialization support.

use crate::progress::ProgressEvent;
use crate::stats::{current_timestamp_ms, RelayStats};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Progress events kept for the dashboard
pub const RECENT_EVENTS_CAPACITY: usize = 100;

/// Finished jobs kept in the job table
pub const FINISHED_JOBS_CAPACITY: usize = 20;

/// Per-job metrics tracking relay progress
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetrics {
    pub id: String,
    pub file_name: String,
    pub stage: String,
    pub progress: f64,
    pub message: String,
    pub size_in_bytes_before: u64,
    pub size_in_bytes_after: u64,
    pub error: Option<String>,
}

impl JobMetrics {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>, size_in_bytes_before: u64) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            stage: "queued".to_string(),
            progress: 0.0,
            message: String::new(),
            size_in_bytes_before,
            size_in_bytes_after: 0,
            error: None,
        }
    }

    /// Whether the job reached a terminal stage
    pub fn is_finished(&self) -> bool {
        self.stage == "completed" || self.stage == "failed"
    }
}

/// A progress event attributed to a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressRecord {
    pub job_id: String,
    pub timestamp_unix_ms: i64,
    pub event: ProgressEvent,
}

/// System-level metrics for resource monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub mem_usage_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
}

/// Complete metrics snapshot including jobs, system, and aggregate stats
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelaySnapshot {
    pub timestamp_unix_ms: i64,
    pub jobs: Vec<JobMetrics>,
    pub recent_events: VecDeque<ProgressRecord>,
    pub system: SystemMetrics,
    pub queue_len: usize,
    pub running_jobs: usize,
    pub sent_clips: u64,
    pub failed_jobs: u64,
    pub total_bytes_sent: u64,
    pub stats: RelayStats,
}

impl RelaySnapshot {
    /// Find a job's metrics by id
    pub fn job_mut(&mut self, id: &str) -> Option<&mut JobMetrics> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    /// Fold a progress event into the job it belongs to and the event log.
    ///
    /// Events for unknown jobs are still logged. Completion events may arrive
    /// more than once; applying one twice changes nothing.
    pub fn apply_progress(&mut self, job_id: &str, event: ProgressEvent) {
        if let Some(job) = self.job_mut(job_id) {
            job.stage = event.stage.clone();
            job.progress = event.progress;
            job.message = event.message.clone();
            if event.error.is_some() {
                job.error = event.error.clone();
            }
        }

        if self.recent_events.len() == RECENT_EVENTS_CAPACITY {
            self.recent_events.pop_front();
        }
        self.recent_events.push_back(ProgressRecord {
            job_id: job_id.to_string(),
            timestamp_unix_ms: current_timestamp_ms(),
            event,
        });
    }

    /// Drop a job from the table
    pub fn remove_job(&mut self, id: &str) {
        self.jobs.retain(|job| job.id != id);
    }

    /// Keep at most `keep` finished jobs, dropping the oldest first
    pub fn prune_finished(&mut self, keep: usize) {
        let finished = self.jobs.iter().filter(|job| job.is_finished()).count();
        let mut excess = finished.saturating_sub(keep);
        self.jobs.retain(|job| {
            if excess > 0 && job.is_finished() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

/// Shared metrics state for concurrent access across daemon components
pub type SharedMetrics = Arc<RwLock<RelaySnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(RelaySnapshot::default()))
}

/// Collects current system metrics using sysinfo
pub fn collect_system_metrics() -> SystemMetrics {
    use sysinfo::System;

    let mut sys = System::new();
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpu_usage = sys.global_cpu_usage();
    let total_memory = sys.total_memory();
    let used_memory = sys.used_memory();
    let mem_usage = if total_memory > 0 {
        (used_memory as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load_avg = System::load_average();

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        mem_usage_percent: mem_usage,
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::STAGE_COMPRESSION;
    use proptest::prelude::*;

    #[test]
    fn test_apply_progress_updates_job() {
        let mut snapshot = RelaySnapshot::default();
        snapshot.jobs.push(JobMetrics::new("job-1", "ace.mp4", 60));

        snapshot.apply_progress(
            "job-1",
            ProgressEvent::stage(STAGE_COMPRESSION, 0.25, "Trying 720p, 30fps compression..."),
        );

        let job = &snapshot.jobs[0];
        assert_eq!(job.stage, "compression");
        assert_eq!(job.progress, 0.25);
        assert_eq!(job.message, "Trying 720p, 30fps compression...");
        assert_eq!(snapshot.recent_events.len(), 1);
    }

    #[test]
    fn test_duplicate_completion_is_harmless() {
        let mut snapshot = RelaySnapshot::default();
        snapshot.jobs.push(JobMetrics::new("job-1", "ace.mp4", 60));
        let done = ProgressEvent::completed(STAGE_COMPRESSION, "Compressed to 720p, 30fps (15.0% of original size)");

        snapshot.apply_progress("job-1", done.clone());
        let after_first = snapshot.jobs[0].clone();
        snapshot.apply_progress("job-1", done);

        assert_eq!(snapshot.jobs[0], after_first);
    }

    #[test]
    fn test_unknown_job_is_logged_only() {
        let mut snapshot = RelaySnapshot::default();
        snapshot.apply_progress("ghost", ProgressEvent::stage(STAGE_COMPRESSION, 0.5, "x"));
        assert!(snapshot.jobs.is_empty());
        assert_eq!(snapshot.recent_events[0].job_id, "ghost");
    }

    #[test]
    fn test_remove_job() {
        let mut snapshot = RelaySnapshot::default();
        snapshot.jobs.push(JobMetrics::new("a", "a.mp4", 1));
        snapshot.jobs.push(JobMetrics::new("b", "b.mp4", 1));
        snapshot.remove_job("a");
        assert_eq!(snapshot.jobs.len(), 1);
        assert_eq!(snapshot.jobs[0].id, "b");
    }

    #[test]
    fn test_prune_finished_keeps_live_jobs() {
        let mut snapshot = RelaySnapshot::default();
        for (id, stage) in [("a", "completed"), ("b", "uploading"), ("c", "failed"), ("d", "completed")] {
            let mut job = JobMetrics::new(id, format!("{}.mp4", id), 1);
            job.stage = stage.to_string();
            snapshot.jobs.push(job);
        }

        snapshot.prune_finished(1);

        let ids: Vec<&str> = snapshot.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_recent_events_bounded(count in 0usize..300) {
            let mut snapshot = RelaySnapshot::default();
            for i in 0..count {
                snapshot.apply_progress("job", ProgressEvent::stage(STAGE_COMPRESSION, 0.0, i.to_string()));
            }

            prop_assert_eq!(snapshot.recent_events.len(), count.min(RECENT_EVENTS_CAPACITY));
            if count > 0 {
                let newest = snapshot.recent_events.back().map(|r| r.event.message.clone());
                prop_assert_eq!(newest, Some((count - 1).to_string()));
            }
        }
    }
}

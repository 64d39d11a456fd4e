//! Relay job executor for cliprelay
//!
//! Takes one clip from discovery to Discord: wait until the recorder is done
//! writing, optionally extract the audio, compress when over the upload
//! limit, upload, and count it. A semaphore limits how many clips are in
//! flight at once.

use crate::compress::{CompressError, CompressionTarget, Compressor, MediaKind};
use crate::concurrency::ConcurrencyPlan;
use crate::config::{Config, BYTES_PER_MB};
use crate::discord::{UploadError, WebhookClient};
use crate::encode::{extract_audio, extracted_audio_path, EncodeError};
use crate::metrics::{JobMetrics, RelaySnapshot, SharedMetrics, FINISHED_JOBS_CAPACITY};
use crate::progress::{ChannelProgress, NullProgress, ProgressEvent, ProgressSink};
use crate::size_gate::{check_ceiling, CeilingResult};
use crate::stability::{wait_until_stable, StabilityResult, MAX_STABILITY_ROUNDS};
use crate::stats::StatsStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error type for relay jobs
#[derive(Debug, Error)]
pub enum RelayError {
    /// The clip could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Audio extraction failed
    #[error("Audio extraction failed: {0}")]
    Extract(#[from] EncodeError),

    /// Compression failed or could not get under the limit
    #[error("Compression failed: {0}")]
    Compress(#[from] CompressError),

    /// Discord rejected or never received the upload
    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    /// A blocking worker panicked or the job could not be scheduled
    #[error("Worker failed: {0}")]
    Worker(String),
}

/// Where a relay job is in the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// Waiting for a free slot
    Queued,
    /// Waiting for the recorder to finish writing
    Stabilizing,
    /// Pulling the audio track out of the video
    Extracting,
    /// Running the compression ladders
    Compressing,
    /// Posting to the webhook
    Uploading,
    /// Sent
    Completed,
    /// Gave up, with the reason
    Failed(String),
}

impl RelayState {
    /// Convert state to string for metrics
    pub fn as_str(&self) -> &str {
        match self {
            RelayState::Queued => "queued",
            RelayState::Stabilizing => "stabilizing",
            RelayState::Extracting => "extracting",
            RelayState::Compressing => "compressing",
            RelayState::Uploading => "uploading",
            RelayState::Completed => "completed",
            RelayState::Failed(_) => "failed",
        }
    }
}

/// One clip on its way to Discord
#[derive(Debug, Clone)]
pub struct RelayJob {
    /// Unique job identifier
    pub id: String,
    pub source_path: PathBuf,
    pub state: RelayState,
    /// Size of the clip when it was discovered
    pub size_before: u64,
    /// Size of the file actually uploaded
    pub size_sent: Option<u64>,
    pub error: Option<String>,
}

impl RelayJob {
    /// Create a queued job for a clip of known size
    pub fn new(source_path: impl Into<PathBuf>, size_before: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_path: source_path.into(),
            state: RelayState::Queued,
            size_before,
            size_sent: None,
            error: None,
        }
    }

    /// Create a queued job, reading the clip's current size
    pub fn from_path(source_path: impl Into<PathBuf>) -> Result<Self, RelayError> {
        let source_path = source_path.into();
        let size = std::fs::metadata(&source_path)
            .map_err(|source| RelayError::Io {
                path: source_path.clone(),
                source,
            })?
            .len();
        Ok(Self::new(source_path, size))
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.source_path.to_string_lossy().into_owned())
    }

    /// Create JobMetrics from current job state
    pub fn to_metrics(&self) -> JobMetrics {
        let mut metrics = JobMetrics::new(self.id.clone(), self.file_name(), self.size_before);
        metrics.stage = self.state.as_str().to_string();
        metrics.size_in_bytes_after = self.size_sent.unwrap_or(0);
        metrics.error = self.error.clone();
        metrics
    }
}

/// Per-job behavior taken from the config
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySettings {
    /// Upload limit in bytes
    pub ceiling_bytes: u64,
    /// Send only the audio track
    pub audio_only: bool,
    /// Message posted with each clip
    pub message: Option<String>,
    /// Wait between size checks while a clip is still being written
    pub stability_wait: Duration,
    pub stability_rounds: u32,
}

impl RelaySettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ceiling_bytes: cfg.max_file_size_bytes(),
            audio_only: cfg.compression.audio_only,
            message: cfg.discord.message.clone().filter(|m| !m.is_empty()),
            stability_wait: Duration::from_secs(cfg.watch.check_interval_secs),
            stability_rounds: MAX_STABILITY_ROUNDS,
        }
    }
}

/// Files a job created; removed when the job ends, however it ends
#[derive(Debug, Default)]
struct Intermediates(Vec<PathBuf>);

impl Intermediates {
    fn push(&mut self, path: PathBuf) {
        self.0.push(path);
    }
}

impl Drop for Intermediates {
    fn drop(&mut self) {
        for path in &self.0 {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed intermediate file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove intermediate file"),
            }
        }
    }
}

/// Relay executor that runs clips through the pipeline with concurrency limiting
///
/// Uses a tokio Semaphore sized by the concurrency plan. Compression and
/// audio extraction block, so they run on the blocking pool.
pub struct RelayExecutor {
    semaphore: Arc<Semaphore>,
    concurrency_plan: ConcurrencyPlan,
    compressor: Arc<Compressor>,
    uploader: WebhookClient,
    stats: Arc<StatsStore>,
    metrics: SharedMetrics,
    progress_tx: Option<UnboundedSender<(String, ProgressEvent)>>,
    settings: RelaySettings,
}

impl RelayExecutor {
    /// Create a new RelayExecutor
    ///
    /// # Arguments
    /// * `plan` - Concurrency plan determining max concurrent jobs
    /// * `compressor` - Compression pipeline used for oversize clips
    /// * `uploader` - Webhook the clips are posted to
    /// * `stats` - Persistent counters updated after each upload
    /// * `metrics` - Shared metrics state for the dashboard
    /// * `settings` - Per-job behavior
    pub fn new(
        plan: ConcurrencyPlan,
        compressor: Compressor,
        uploader: WebhookClient,
        stats: Arc<StatsStore>,
        metrics: SharedMetrics,
        settings: RelaySettings,
    ) -> Self {
        let permits = plan.max_concurrent_jobs.max(1) as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            concurrency_plan: plan,
            compressor: Arc::new(compressor),
            uploader,
            stats,
            metrics,
            progress_tx: None,
            settings,
        }
    }

    /// Send every progress event, tagged with its job id, to `tx`
    pub fn with_progress(mut self, tx: UnboundedSender<(String, ProgressEvent)>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn concurrency_plan(&self) -> &ConcurrencyPlan {
        &self.concurrency_plan
    }

    /// Get the number of available permits (slots for concurrent jobs)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire a permit for job execution, waiting for a free slot
    pub async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, RelayError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| RelayError::Worker(e.to_string()))
    }

    /// Try to acquire a permit without waiting
    ///
    /// Returns None if no permits are available.
    pub fn try_acquire_permit(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }

    fn sink(&self, job_id: &str) -> Arc<dyn ProgressSink> {
        match &self.progress_tx {
            Some(tx) => Arc::new(ChannelProgress::new(job_id, tx.clone())),
            None => Arc::new(NullProgress),
        }
    }

    /// Execute a job through the relay pipeline
    ///
    /// 1. Waits for a slot (respecting max_concurrent_jobs)
    /// 2. Waits until the clip stops growing
    /// 3. Extracts the audio track when relaying audio only
    /// 4. Compresses on a blocking worker if the file is over the limit
    /// 5. Uploads to the webhook and records the clip in the stats
    ///
    /// Files created along the way are removed on every exit path. The
    /// source clip is never modified.
    ///
    /// # Returns
    /// * `Ok(RelayJob)` - Job completed with `size_sent` set
    /// * `Err(RelayError)` - Job failed; metrics and progress already report it
    pub async fn execute(&self, mut job: RelayJob) -> Result<RelayJob, RelayError> {
        {
            let mut snapshot = self.metrics.write().await;
            snapshot.queue_len += 1;
            upsert_job(&mut snapshot, &job);
        }

        let permit = self.acquire_permit().await;
        {
            let mut snapshot = self.metrics.write().await;
            snapshot.queue_len = snapshot.queue_len.saturating_sub(1);
            if permit.is_ok() {
                snapshot.running_jobs += 1;
            }
        }
        let _permit = match permit {
            Ok(permit) => permit,
            Err(e) => return Err(self.fail(&mut job, e).await),
        };

        let result = {
            let mut intermediates = Intermediates::default();
            self.relay(&mut job, &mut intermediates).await
        };

        {
            let mut snapshot = self.metrics.write().await;
            snapshot.running_jobs = snapshot.running_jobs.saturating_sub(1);
        }

        match result {
            Ok(size_sent) => {
                self.complete(&mut job, size_sent).await;
                Ok(job)
            }
            Err(e) => Err(self.fail(&mut job, e).await),
        }
    }

    async fn relay(&self, job: &mut RelayJob, intermediates: &mut Intermediates) -> Result<u64, RelayError> {
        self.transition(job, RelayState::Stabilizing, "Waiting for the recording to finish")
            .await;
        let stability = wait_until_stable(
            &job.source_path,
            job.size_before,
            self.settings.stability_wait,
            self.settings.stability_rounds,
        )
        .await
        .map_err(|source| RelayError::Io {
            path: job.source_path.clone(),
            source,
        })?;
        if let StabilityResult::Unstable { current_size, .. } = stability {
            warn!(
                file = %job.source_path.display(),
                current_size,
                "Clip is still growing, relaying anyway"
            );
        }

        let mut upload_path = job.source_path.clone();
        let mut kind = MediaKind::Video;

        if self.settings.audio_only {
            self.transition(job, RelayState::Extracting, "Extracting audio").await;
            intermediates.push(extracted_audio_path(&upload_path));

            let encoder = self.compressor.encoder().clone();
            let video = upload_path.clone();
            upload_path = tokio::task::spawn_blocking(move || extract_audio(encoder.as_ref(), &video))
                .await
                .map_err(|e| RelayError::Worker(e.to_string()))??;
            kind = MediaKind::Audio;
        }

        let mut size = file_size(&upload_path).await?;

        if let CeilingResult::Exceeds { size_bytes, ceiling_bytes } = check_ceiling(size, self.settings.ceiling_bytes) {
            info!(
                file = %upload_path.display(),
                size_bytes,
                ceiling_bytes,
                "File exceeds upload limit, compressing"
            );
            self.transition(job, RelayState::Compressing, "Compressing to fit the upload limit")
                .await;

            let target = CompressionTarget::new(upload_path.clone(), ceiling_bytes, kind)?;
            let compressor = self.compressor.clone();
            let sink = self.sink(&job.id);
            let outcome = tokio::task::spawn_blocking(move || compressor.compress(&target, sink.as_ref()))
                .await
                .map_err(|e| RelayError::Worker(e.to_string()))??;

            intermediates.push(outcome.output_path.clone());
            upload_path = outcome.output_path;
            size = outcome.size_bytes;
        }

        self.transition(job, RelayState::Uploading, "Uploading to Discord").await;
        self.uploader
            .upload(&upload_path, self.settings.message.as_deref())
            .await?;

        Ok(size)
    }

    async fn transition(&self, job: &mut RelayJob, state: RelayState, message: &str) {
        debug!(job_id = %job.id, stage = state.as_str(), "Relay stage");
        job.state = state;

        let event = ProgressEvent::stage(job.state.as_str(), 0.0, message);
        {
            let mut snapshot = self.metrics.write().await;
            upsert_job(&mut snapshot, job);
            if let Some(metrics) = snapshot.job_mut(&job.id) {
                metrics.message = message.to_string();
            }
        }
        self.sink(&job.id).emit(event);
    }

    async fn complete(&self, job: &mut RelayJob, size_sent: u64) {
        job.state = RelayState::Completed;
        job.size_sent = Some(size_sent);

        if let Err(e) = self.stats.record_clip(size_sent) {
            warn!(error = %e, "Failed to record clip in statistics");
        }
        let stats = self.stats.snapshot();

        let message = format!(
            "Sent {} ({:.2} MB)",
            job.file_name(),
            size_sent as f64 / BYTES_PER_MB as f64
        );
        info!(
            job_id = %job.id,
            file = %job.source_path.display(),
            size_sent,
            total_clips = stats.total_clips,
            "Clip relayed"
        );

        {
            let mut snapshot = self.metrics.write().await;
            upsert_job(&mut snapshot, job);
            if let Some(metrics) = snapshot.job_mut(&job.id) {
                metrics.progress = 1.0;
                metrics.message = message.clone();
            }
            snapshot.sent_clips += 1;
            snapshot.total_bytes_sent = snapshot.total_bytes_sent.saturating_add(size_sent);
            snapshot.stats = stats;
            snapshot.prune_finished(FINISHED_JOBS_CAPACITY);
        }
        self.sink(&job.id)
            .emit(ProgressEvent::completed(job.state.as_str(), message));
    }

    async fn fail(&self, job: &mut RelayJob, err: RelayError) -> RelayError {
        let reason = err.to_string();
        error!(
            job_id = %job.id,
            file = %job.source_path.display(),
            stage = job.state.as_str(),
            error = %reason,
            "Relay failed"
        );

        // The compressor reports its own exhaustion
        let already_reported = matches!(err, RelayError::Compress(CompressError::CompressionExhausted { .. }));

        job.error = Some(reason.clone());
        job.state = RelayState::Failed(reason.clone());
        {
            let mut snapshot = self.metrics.write().await;
            upsert_job(&mut snapshot, job);
            snapshot.failed_jobs += 1;
            snapshot.prune_finished(FINISHED_JOBS_CAPACITY);
        }
        if !already_reported {
            self.sink(&job.id).emit(ProgressEvent::failed(
                job.state.as_str(),
                format!("Failed to send {}", job.file_name()),
                reason,
            ));
        }
        err
    }
}

/// Update the job's row in the table, adding it if missing
fn upsert_job(snapshot: &mut RelaySnapshot, job: &RelayJob) {
    let fresh = job.to_metrics();
    match snapshot.job_mut(&job.id) {
        Some(existing) => {
            existing.stage = fresh.stage;
            existing.size_in_bytes_after = fresh.size_in_bytes_after;
            existing.error = fresh.error;
            existing.progress = 0.0;
        }
        None => snapshot.jobs.push(fresh),
    }
}

async fn file_size(path: &Path) -> Result<u64, RelayError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|source| RelayError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::test_support::{dir_listing, sparse_file, FixedProber, SizedEncoder};
    use crate::metrics::new_shared_metrics;
    use axum::body::Bytes;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::Router;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Bodies = Arc<Mutex<Vec<String>>>;

    async fn spawn_webhook(status: StatusCode) -> (String, Bodies) {
        let bodies: Bodies = Arc::new(Mutex::new(Vec::new()));
        let captured = bodies.clone();

        let app = Router::new().route(
            "/hook",
            post(move |body: Bytes| {
                let captured = captured.clone();
                async move {
                    captured
                        .lock()
                        .unwrap()
                        .push(String::from_utf8_lossy(&body).into_owned());
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (format!("http://{}/hook", addr), bodies)
    }

    fn test_plan(max_concurrent_jobs: u32) -> ConcurrencyPlan {
        ConcurrencyPlan {
            total_cores: 8,
            max_concurrent_jobs,
        }
    }

    fn test_settings(ceiling_bytes: u64, audio_only: bool) -> RelaySettings {
        RelaySettings {
            ceiling_bytes,
            audio_only,
            message: Some("new clip".to_string()),
            stability_wait: Duration::from_millis(5),
            stability_rounds: 1,
        }
    }

    struct Harness {
        executor: RelayExecutor,
        metrics: SharedMetrics,
        stats: Arc<StatsStore>,
        _state: TempDir,
    }

    fn harness(encoder: Arc<SizedEncoder>, url: &str, settings: RelaySettings) -> Harness {
        let state = TempDir::new().unwrap();
        let stats = Arc::new(StatsStore::open(state.path()).unwrap());
        let metrics = new_shared_metrics();
        let compressor = Compressor::new(encoder, Arc::new(FixedProber(Some(10.0))));
        let uploader = WebhookClient::new(url, Duration::from_secs(5)).unwrap();
        let executor = RelayExecutor::new(
            test_plan(1),
            compressor,
            uploader,
            stats.clone(),
            metrics.clone(),
            settings,
        );
        Harness {
            executor,
            metrics,
            stats,
            _state: state,
        }
    }

    #[test]
    fn test_relay_state_as_str() {
        assert_eq!(RelayState::Queued.as_str(), "queued");
        assert_eq!(RelayState::Stabilizing.as_str(), "stabilizing");
        assert_eq!(RelayState::Extracting.as_str(), "extracting");
        assert_eq!(RelayState::Compressing.as_str(), "compressing");
        assert_eq!(RelayState::Uploading.as_str(), "uploading");
        assert_eq!(RelayState::Completed.as_str(), "completed");
        assert_eq!(RelayState::Failed("x".to_string()).as_str(), "failed");
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = RelayJob::new("/clips/a.mp4", 1);
        let b = RelayJob::new("/clips/a.mp4", 1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.state, RelayState::Queued);
        assert_eq!(a.file_name(), "a.mp4");
    }

    #[test]
    fn test_settings_from_config() {
        let mut cfg = Config::default();
        cfg.compression.max_file_size_mb = 25;
        cfg.discord.message = Some(String::new());
        let settings = RelaySettings::from_config(&cfg);
        assert_eq!(settings.ceiling_bytes, 25 * BYTES_PER_MB);
        assert_eq!(settings.message, None);
        assert_eq!(settings.stability_rounds, MAX_STABILITY_ROUNDS);
    }

    #[tokio::test]
    async fn test_small_clip_uploaded_as_is() {
        let (url, bodies) = spawn_webhook(StatusCode::NO_CONTENT).await;
        let clips = TempDir::new().unwrap();
        let source = clips.path().join("clip.mp4");
        sparse_file(&source, 500);

        let encoder = Arc::new(SizedEncoder::new(vec![], 1));
        let h = harness(encoder.clone(), &url, test_settings(1_000, false));

        let job = h.executor.execute(RelayJob::from_path(&source).unwrap()).await.unwrap();

        assert_eq!(job.state, RelayState::Completed);
        assert_eq!(job.size_sent, Some(500));
        assert!(encoder.calls().is_empty());

        let bodies = bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains(r#"filename="clip.mp4""#));
        assert!(bodies[0].contains(r#"{"content":"new clip"}"#));

        let stats = h.stats.snapshot();
        assert_eq!(stats.total_clips, 1);
        assert_eq!(stats.total_size_bytes, 500);

        let snapshot = h.metrics.read().await;
        assert_eq!(snapshot.sent_clips, 1);
        assert_eq!(snapshot.total_bytes_sent, 500);
        assert_eq!(snapshot.running_jobs, 0);
        assert_eq!(snapshot.queue_len, 0);
        assert_eq!(snapshot.jobs[0].stage, "completed");
        assert_eq!(snapshot.stats.total_clips, 1);
    }

    #[tokio::test]
    async fn test_oversize_clip_compressed_then_cleaned_up() {
        let (url, bodies) = spawn_webhook(StatusCode::OK).await;
        let clips = TempDir::new().unwrap();
        let source = clips.path().join("clip.mp4");
        sparse_file(&source, 5_000);

        let encoder = Arc::new(SizedEncoder::new(vec![800], 800));
        let h = harness(encoder.clone(), &url, test_settings(1_000, false));

        let job = h.executor.execute(RelayJob::from_path(&source).unwrap()).await.unwrap();

        assert_eq!(job.size_sent, Some(800));
        assert_eq!(encoder.calls().len(), 1);
        assert!(bodies.lock().unwrap()[0].contains(r#"filename="clip_mp4_compressed.mp4""#));

        // Only the untouched source remains
        assert_eq!(dir_listing(clips.path()), vec!["clip.mp4"]);
        assert_eq!(std::fs::metadata(&source).unwrap().len(), 5_000);
    }

    #[tokio::test]
    async fn test_exhausted_compression_fails_without_upload() {
        let (url, bodies) = spawn_webhook(StatusCode::OK).await;
        let clips = TempDir::new().unwrap();
        let source = clips.path().join("clip.mp4");
        sparse_file(&source, 5_000);

        let encoder = Arc::new(SizedEncoder::new(vec![], 4_000));
        let h = harness(encoder, &url, test_settings(1_000, false));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let executor = h.executor.with_progress(tx);

        let result = executor.execute(RelayJob::from_path(&source).unwrap()).await;

        assert!(matches!(
            result,
            Err(RelayError::Compress(CompressError::CompressionExhausted { .. }))
        ));
        assert!(bodies.lock().unwrap().is_empty());
        assert_eq!(dir_listing(clips.path()), vec!["clip.mp4"]);
        assert_eq!(h.stats.snapshot().total_clips, 0);

        let snapshot = h.metrics.read().await;
        assert_eq!(snapshot.failed_jobs, 1);
        assert_eq!(snapshot.sent_clips, 0);
        assert_eq!(snapshot.jobs[0].stage, "failed");
        drop(snapshot);

        let mut events = Vec::new();
        while let Ok((_, event)) = rx.try_recv() {
            events.push(event);
        }
        let last = events.last().unwrap();
        assert!(last.is_complete);
        assert!(last.error.is_some());
        assert_eq!(events.iter().filter(|e| e.error.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn test_audio_only_sends_extracted_track() {
        let (url, bodies) = spawn_webhook(StatusCode::NO_CONTENT).await;
        let clips = TempDir::new().unwrap();
        let source = clips.path().join("clip.mp4");
        sparse_file(&source, 5_000);

        let encoder = Arc::new(SizedEncoder::new(vec![600], 600));
        let h = harness(encoder.clone(), &url, test_settings(1_000, true));

        let job = h.executor.execute(RelayJob::from_path(&source).unwrap()).await.unwrap();

        assert_eq!(job.size_sent, Some(600));
        let calls = encoder.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&"-vn".to_string()));
        assert!(bodies.lock().unwrap()[0].contains(r#"filename="clip_mp4_audio.mp3""#));
        assert_eq!(dir_listing(clips.path()), vec!["clip.mp4"]);
    }

    #[tokio::test]
    async fn test_rejected_upload_cleans_up_compressed_output() {
        let (url, _bodies) = spawn_webhook(StatusCode::PAYLOAD_TOO_LARGE).await;
        let clips = TempDir::new().unwrap();
        let source = clips.path().join("clip.mp4");
        sparse_file(&source, 5_000);

        let encoder = Arc::new(SizedEncoder::new(vec![800], 800));
        let h = harness(encoder, &url, test_settings(1_000, false));

        let result = h.executor.execute(RelayJob::from_path(&source).unwrap()).await;

        assert!(matches!(
            result,
            Err(RelayError::Upload(UploadError::Status { status: 413, .. }))
        ));
        assert_eq!(dir_listing(clips.path()), vec!["clip.mp4"]);
        assert_eq!(h.metrics.read().await.failed_jobs, 1);
    }

    #[tokio::test]
    async fn test_vanished_clip_fails() {
        let (url, _bodies) = spawn_webhook(StatusCode::OK).await;
        let clips = TempDir::new().unwrap();
        let h = harness(Arc::new(SizedEncoder::new(vec![], 1)), &url, test_settings(1_000, false));

        let result = h
            .executor
            .execute(RelayJob::new(clips.path().join("gone.mp4"), 100))
            .await;

        assert!(matches!(result, Err(RelayError::Io { .. })));
    }

    #[tokio::test]
    async fn test_progress_events_follow_stages() {
        let (url, _bodies) = spawn_webhook(StatusCode::OK).await;
        let clips = TempDir::new().unwrap();
        let source = clips.path().join("clip.mp4");
        sparse_file(&source, 5_000);

        let h = harness(Arc::new(SizedEncoder::new(vec![800], 800)), &url, test_settings(1_000, false));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let executor = h.executor.with_progress(tx);

        let job = executor.execute(RelayJob::from_path(&source).unwrap()).await.unwrap();

        let mut stages = Vec::new();
        while let Ok((job_id, event)) = rx.try_recv() {
            assert_eq!(job_id, job.id);
            if stages.last() != Some(&event.stage) {
                stages.push(event.stage);
            }
        }
        assert_eq!(
            stages,
            vec!["stabilizing", "compressing", "compression", "uploading", "completed"]
        );
    }

    #[tokio::test]
    async fn test_semaphore_permit_limiting() {
        let h = harness(
            Arc::new(SizedEncoder::new(vec![], 1)),
            "http://127.0.0.1:9/hook",
            test_settings(1_000, false),
        );
        let executor = RelayExecutor::new(
            test_plan(2),
            Compressor::new(Arc::new(SizedEncoder::new(vec![], 1)), Arc::new(FixedProber(None))),
            WebhookClient::new("http://127.0.0.1:9/hook", Duration::from_secs(1)).unwrap(),
            h.stats.clone(),
            h.metrics.clone(),
            test_settings(1_000, false),
        );

        assert_eq!(executor.available_permits(), 2);
        let permit1 = executor.try_acquire_permit();
        let permit2 = executor.try_acquire_permit();
        assert!(permit1.is_some() && permit2.is_some());
        assert!(executor.try_acquire_permit().is_none());

        drop(permit1);
        assert_eq!(executor.available_permits(), 1);
    }
}

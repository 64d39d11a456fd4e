//! Progress reporting for the compression pipeline
//!
//! Compressors narrate each strategy attempt through a [`ProgressSink`].
//! Sinks must never block or fail: a lost progress event is harmless,
//! a stalled encoder worker is not.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// Stage name used by every compressor
pub const STAGE_COMPRESSION: &str = "compression";

/// A single progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: String,
    /// Fraction of the current stage, always within [0, 1]
    pub progress: f64,
    pub message: String,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    /// An in-flight event for `stage`
    pub fn stage(stage: impl Into<String>, progress: f64, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            progress: clamp_progress(progress),
            message: message.into(),
            is_complete: false,
            error: None,
        }
    }

    /// A terminal success event
    pub fn completed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            progress: 1.0,
            message: message.into(),
            is_complete: true,
            error: None,
        }
    }

    /// A terminal failure event
    pub fn failed(stage: impl Into<String>, message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            progress: 1.0,
            message: message.into(),
            is_complete: true,
            error: Some(error.into()),
        }
    }
}

/// NaN collapses to 0
fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Receiver side of compression progress
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Tags events with a job id and forwards them over an unbounded channel.
///
/// Used from blocking encoder workers, where taking an async lock is not
/// possible; a forwarder task on the runtime applies the events.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    job_id: String,
    tx: UnboundedSender<(String, ProgressEvent)>,
}

impl ChannelProgress {
    pub fn new(job_id: impl Into<String>, tx: UnboundedSender<(String, ProgressEvent)>) -> Self {
        Self {
            job_id: job_id.into(),
            tx,
        }
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means nobody is watching
        let _ = self.tx.send((self.job_id.clone(), event));
    }
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ProgressSink for RecordingProgress {
    fn emit(&self, event: ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_progress_is_clamped(raw in proptest::num::f64::ANY) {
            let event = ProgressEvent::stage(STAGE_COMPRESSION, raw, "x");
            prop_assert!(event.progress >= 0.0 && event.progress <= 1.0);
        }
    }

    #[test]
    fn test_event_serializes_camel_case_without_empty_error() {
        let event = ProgressEvent::completed(STAGE_COMPRESSION, "done");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["isComplete"], serde_json::json!(true));
        assert_eq!(json["progress"], serde_json::json!(1.0));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_event_carries_error() {
        let event = ProgressEvent::failed(STAGE_COMPRESSION, "gave up", "exhausted");
        assert!(event.is_complete);
        assert_eq!(event.error.as_deref(), Some("exhausted"));

        let json = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_channel_progress_tags_job_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelProgress::new("job-1", tx);

        sink.emit(ProgressEvent::stage(STAGE_COMPRESSION, 0.5, "halfway"));

        let (job_id, event) = rx.try_recv().unwrap();
        assert_eq!(job_id, "job-1");
        assert_eq!(event.message, "halfway");
    }

    #[test]
    fn test_channel_progress_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = ChannelProgress::new("job-1", tx);
        sink.emit(ProgressEvent::stage(STAGE_COMPRESSION, 0.1, "nobody listening"));
    }

    #[test]
    fn test_recording_progress_keeps_order() {
        let sink = RecordingProgress::new();
        sink.emit(ProgressEvent::stage(STAGE_COMPRESSION, 0.0, "first"));
        sink.emit(ProgressEvent::stage(STAGE_COMPRESSION, 0.5, "second"));

        let messages: Vec<_> = sink.events().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "second"]);
    }
}

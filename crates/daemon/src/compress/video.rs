//! Video ladders
//!
//! The source duration decides the route:
//! - unknown duration: one fixed fallback encode
//! - derived bitrate under the gate: bitrate ladder from the derived bitrate
//! - otherwise: resolution ladder, then the bitrate ladder at half the
//!   derived bitrate if nothing fit

use super::strategy::derive_target_bitrate;
use super::{CompressError, CompressionOutcome, Compressor, Ladder, Run};
use crate::progress::{ProgressEvent, STAGE_COMPRESSION};
use std::slice;
use tracing::{info, warn};

impl Compressor {
    pub(super) fn compress_video(&self, run: &mut Run<'_>) -> Result<Option<CompressionOutcome>, CompressError> {
        let target = run.target;
        let source = target.source();

        let duration_secs = match self.prober.probe_duration(source) {
            Ok(secs) => secs,
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Could not read duration, using fallback compression");
                run.progress.emit(ProgressEvent::stage(
                    STAGE_COMPRESSION,
                    0.0,
                    "Duration unknown, using fallback compression...",
                ));
                return self.run_ladder(run, slice::from_ref(&self.tables.fallback), Ladder::Fallback);
            }
        };

        let target_bps = derive_target_bitrate(target.ceiling_bytes(), duration_secs);
        info!(duration_secs, target_bps, "Derived target bitrate");

        if self.tables.needs_bitrate_ladder(target_bps) {
            info!(target_bps, "Target bitrate too low for CRF encoding, using bitrate ladder");
            return self.compress_by_bitrate(run, target_bps);
        }

        if let Some(outcome) = self.run_ladder(run, &self.tables.resolution, Ladder::Resolution)? {
            return Ok(Some(outcome));
        }

        warn!("All CRF strategies failed, trying bitrate ladder");
        self.compress_by_bitrate(run, target_bps / 2)
    }

    /// Last resort: explicit bitrate with peak caps, shrinking each tier
    fn compress_by_bitrate(&self, run: &mut Run<'_>, target_bps: u64) -> Result<Option<CompressionOutcome>, CompressError> {
        let ladder = self.tables.bitrate_ladder(target_bps);
        self.run_ladder(run, &ladder, Ladder::Bitrate)
    }
}

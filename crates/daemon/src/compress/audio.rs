//! Audio ladder

use super::{CompressError, CompressionOutcome, Compressor, Ladder, Run};

impl Compressor {
    /// Walk the MP3 ladder from 128 kbps stereo down to 16 kbps mono
    pub(super) fn compress_audio(&self, run: &mut Run<'_>) -> Result<Option<CompressionOutcome>, CompressError> {
        self.run_ladder(run, &self.tables.audio, Ladder::Audio)
    }
}

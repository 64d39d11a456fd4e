//! Stability checking module for verifying clips are no longer being written.
//!
//! Recorders create the clip file before they finish writing it. Before a
//! clip is relayed, its size must stay unchanged across a wait window.

use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;

/// Rounds of re-checking before a still-growing clip is relayed anyway
pub const MAX_STABILITY_ROUNDS: u32 = 5;

/// Result of a stability check on a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityResult {
    /// File size remained unchanged during the stability window.
    Stable,
    /// File size changed during the stability window.
    Unstable {
        /// Size when first checked.
        initial_size: u64,
        /// Size after waiting.
        current_size: u64,
    },
}

/// Check if a file is stable by comparing its size before and after a wait period.
///
/// # Arguments
/// * `path` - Path to the file to check
/// * `initial_size` - The file size when first discovered
/// * `wait` - How long to wait before re-checking
///
/// # Returns
/// * `Ok(StabilityResult::Stable)` if the file size is unchanged
/// * `Ok(StabilityResult::Unstable { .. })` if the file size changed
/// * `Err` if the file cannot be read
pub async fn check_stability(
    path: &Path,
    initial_size: u64,
    wait: Duration,
) -> Result<StabilityResult, std::io::Error> {
    sleep(wait).await;

    let metadata = tokio::fs::metadata(path).await?;
    Ok(compare_sizes(initial_size, metadata.len()))
}

/// Repeat [`check_stability`] until the size settles or `max_rounds` pass.
///
/// Returns the last result; `Unstable` means the rounds ran out.
pub async fn wait_until_stable(
    path: &Path,
    initial_size: u64,
    wait: Duration,
    max_rounds: u32,
) -> Result<StabilityResult, std::io::Error> {
    let mut size = initial_size;
    let mut result = StabilityResult::Stable;

    for _ in 0..max_rounds.max(1) {
        result = check_stability(path, size, wait).await?;
        match result {
            StabilityResult::Stable => return Ok(result),
            StabilityResult::Unstable { current_size, .. } => size = current_size,
        }
    }

    Ok(result)
}

/// Compare two file sizes and return the appropriate StabilityResult.
///
/// This is a pure function extracted for property testing.
#[inline]
pub fn compare_sizes(initial_size: u64, current_size: u64) -> StabilityResult {
    if initial_size == current_size {
        StabilityResult::Stable
    } else {
        StabilityResult::Unstable {
            initial_size,
            current_size,
        }
    }
}

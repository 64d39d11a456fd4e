//! Size Gate Module
//!
//! Checks encoded output against the upload ceiling.

use serde::{Deserialize, Serialize};

/// Result of the ceiling check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CeilingResult {
    /// Output is at or under the ceiling
    Fits,
    /// Output is larger than the ceiling
    Exceeds { size_bytes: u64, ceiling_bytes: u64 },
}

impl CeilingResult {
    pub fn fits(&self) -> bool {
        matches!(self, CeilingResult::Fits)
    }
}

/// Check whether a file of `size_bytes` may be uploaded.
///
/// A file exactly at the ceiling fits.
///
/// # Arguments
/// * `size_bytes` - Size of the candidate file in bytes
/// * `ceiling_bytes` - Maximum allowed size in bytes
pub fn check_ceiling(size_bytes: u64, ceiling_bytes: u64) -> CeilingResult {
    if size_bytes <= ceiling_bytes {
        CeilingResult::Fits
    } else {
        CeilingResult::Exceeds {
            size_bytes,
            ceiling_bytes,
        }
    }
}

/// Output size as a percentage of the original, `None` for an empty original
pub fn compression_ratio_percent(output_bytes: u64, original_bytes: u64) -> Option<f64> {
    if original_bytes == 0 {
        return None;
    }
    Some(output_bytes as f64 / original_bytes as f64 * 100.0)
}

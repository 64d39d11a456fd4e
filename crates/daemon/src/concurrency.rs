//! Concurrency planning module for cliprelay
//!
//! Derives how many clips may be relayed at once from CPU core count and
//! configuration. Each relay job runs at most one encoder at a time, and
//! ffmpeg already spreads one encode across cores.

use crate::config::Config;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of clips processed at once
    pub max_concurrent_jobs: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - Uses an explicit non-zero `max_concurrent_jobs` unchanged
    /// - Otherwise derives 1 job below 8 cores, 2 below 16, 3 from 16 up
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .relay
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32)
            .max(1);

        let max_concurrent_jobs = if cfg.relay.max_concurrent_jobs > 0 {
            cfg.relay.max_concurrent_jobs
        } else {
            derive_max_jobs(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_jobs,
        }
    }
}

/// Derive max concurrent jobs based on core count
fn derive_max_jobs(cores: u32) -> u32 {
    match cores {
        0..=7 => 1,
        8..=15 => 2,
        _ => 3,
    }
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

//! Resource watchdog.
//!
//! Runs as a background Tokio task, sampling resident memory at a fixed
//! interval. Crossing the limit ends the watch; the binary then exits with a
//! nonzero code so the process manager starts a fresh agent.

pub mod sampler;

use std::time::Duration;

use tracing::{debug, error, info, warn};

pub use sampler::{MemorySampler, ProcSampler};

/// Memory usage that crossed the limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhaustion {
    /// Sampled resident set size in bytes.
    pub resident_bytes: u64,
    /// Configured limit in bytes.
    pub limit_bytes: u64,
}

/// Periodic memory watchdog.
pub struct ResourceMonitor<S> {
    sampler: S,
    interval: Duration,
    limit_bytes: u64,
    warned_unavailable: bool,
}

impl<S: MemorySampler> ResourceMonitor<S> {
    /// Create a monitor sampling every `interval` against `limit_bytes`.
    pub fn new(sampler: S, interval: Duration, limit_bytes: u64) -> Self {
        Self {
            sampler,
            interval,
            limit_bytes,
            warned_unavailable: false,
        }
    }

    /// Take one sample. Returns `Some` when usage exceeds the limit.
    pub fn check(&mut self) -> Option<Exhaustion> {
        let Some(resident_bytes) = self.sampler.resident_bytes() else {
            if !self.warned_unavailable {
                warn!("memory usage unavailable on this platform, watchdog idle");
                self.warned_unavailable = true;
            }
            return None;
        };

        debug!(resident_bytes, limit_bytes = self.limit_bytes, "memory sampled");
        (resident_bytes > self.limit_bytes).then_some(Exhaustion {
            resident_bytes,
            limit_bytes: self.limit_bytes,
        })
    }

    /// Sample until the limit is crossed.
    pub async fn run(mut self) -> Exhaustion {
        info!(
            interval_secs = self.interval.as_secs(),
            limit_mb = self.limit_bytes / (1024 * 1024),
            "resource monitor started"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Skip the first immediate tick.
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Some(exhaustion) = self.check() {
                error!(
                    resident_mb = exhaustion.resident_bytes / (1024 * 1024),
                    limit_mb = exhaustion.limit_bytes / (1024 * 1024),
                    "memory limit exceeded, restarting"
                );
                return exhaustion;
            }
        }
    }
}

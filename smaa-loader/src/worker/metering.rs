//! Resource metering for worker programs

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Tracks resource usage of a program running inside a worker sandbox
#[derive(Debug, Clone, Default)]
pub struct Metering {
    inner: Arc<MeteringInner>,
}

#[derive(Debug, Default)]
struct MeteringInner {
    /// Lua instructions executed (sampled every hook interval)
    instructions: AtomicU64,
    /// Highest observed VM memory usage in bytes
    peak_memory: AtomicU64,
    /// Number of completed program invocations
    invocations: AtomicU64,
}

impl Metering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to instruction count
    pub fn add_instructions(&self, count: u64) {
        self.inner.instructions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn instructions(&self) -> u64 {
        self.inner.instructions.load(Ordering::Relaxed)
    }

    /// Record a memory sample, keeping the maximum
    pub fn sample_memory(&self, bytes: u64) {
        self.inner.peak_memory.fetch_max(bytes, Ordering::Relaxed);
    }

    pub fn peak_memory(&self) -> u64 {
        self.inner.peak_memory.load(Ordering::Relaxed)
    }

    /// Record a finished invocation
    pub fn record_invocation(&self) {
        self.inner.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invocations(&self) -> u64 {
        self.inner.invocations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_memory_keeps_maximum() {
        let metering = Metering::new();
        metering.sample_memory(4096);
        metering.sample_memory(1024);
        assert_eq!(metering.peak_memory(), 4096);
    }

    #[test]
    fn test_clones_share_counters() {
        let metering = Metering::new();
        let clone = metering.clone();
        clone.add_instructions(1000);
        clone.record_invocation();
        assert_eq!(metering.instructions(), 1000);
        assert_eq!(metering.invocations(), 1);
    }
}

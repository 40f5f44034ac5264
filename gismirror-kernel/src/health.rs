use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::now_ms;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub batches_processed: u64,
    pub entries_applied: u64,
    pub entries_unchanged: u64,
    pub entries_rejected: u64,
    pub entries_failed: u64,
    pub orphans_closed: u64,
    /// Epoch ms du dernier batch traité
    pub last_batch_at: Option<i64>,
    pub memory_usage_mb: f32,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    applied: AtomicU64,
    unchanged: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    orphans_closed: AtomicU64,
    last_batch_at: AtomicI64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    counters: Arc<Counters>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self { start_time: Instant::now(), counters: Arc::new(Counters::default()) }
    }

    pub fn record_batch(&self) {
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters.last_batch_at.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_applied(&self) {
        self.counters.applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unchanged(&self) {
        self.counters.unchanged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_orphans_closed(&self, count: u64) {
        self.counters.orphans_closed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn get_health(&self) -> KernelHealth {
        let c = &self.counters;
        let last = c.last_batch_at.load(Ordering::Relaxed);
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            batches_processed: c.batches.load(Ordering::Relaxed),
            entries_applied: c.applied.load(Ordering::Relaxed),
            entries_unchanged: c.unchanged.load(Ordering::Relaxed),
            entries_rejected: c.rejected.load(Ordering::Relaxed),
            entries_failed: c.failed.load(Ordering::Relaxed),
            orphans_closed: c.orphans_closed.load(Ordering::Relaxed),
            last_batch_at: (last > 0).then_some(last),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| l.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let tracker = HealthTracker::new();
        let clone = tracker.clone();
        clone.record_batch();
        clone.record_applied();
        clone.record_applied();
        clone.record_rejected();
        tracker.record_orphans_closed(3);

        let health = tracker.get_health();
        assert_eq!(health.batches_processed, 1);
        assert_eq!(health.entries_applied, 2);
        assert_eq!(health.entries_rejected, 1);
        assert_eq!(health.entries_failed, 0);
        assert_eq!(health.orphans_closed, 3);
        assert!(health.last_batch_at.is_some());
    }

    #[test]
    fn test_no_batch_yet() {
        assert_eq!(HealthTracker::new().get_health().last_batch_at, None);
    }
}

//! Live ingestion counters.
//!
//! Each counter is updated on its own with no cross-counter atomicity:
//! `received` and `topics` move at intake, before the event is queued, while
//! `unique_processed`, `duplicate_dropped` and `store_failures` move in the
//! consumer after the dedup decision. A snapshot is therefore live, not
//! consistent. `received` runs ahead of the processed counters by the current
//! backlog and the two meet once the queue is drained.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct IngestStats {
    received: AtomicU64,
    unique_processed: AtomicU64,
    duplicate_dropped: AtomicU64,
    store_failures: AtomicU64,
    topics: DashSet<String>,
    started_at: Instant,
}

/// Point-in-time view of [`IngestStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub store_failures: u64,
    pub topics_count: usize,
    pub topics: Vec<String>,
    pub queue_depth: usize,
    pub uptime_seconds: f64,
}

impl StatsSnapshot {
    /// Events that reached a terminal outcome
    pub fn processed(&self) -> u64 {
        self.unique_processed + self.duplicate_dropped + self.store_failures
    }

    /// Admitted events without an outcome yet, as seen by this snapshot
    pub fn backlog(&self) -> u64 {
        self.received.saturating_sub(self.processed())
    }
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            unique_processed: AtomicU64::new(0),
            duplicate_dropped: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            topics: DashSet::new(),
            started_at: Instant::now(),
        }
    }

    pub fn record_received(&self, topic: &str) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if !self.topics.contains(topic) {
            self.topics.insert(topic.to_string());
        }
    }

    pub fn record_unique(&self) {
        self.unique_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicate_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn unique_processed(&self) -> u64 {
        self.unique_processed.load(Ordering::Relaxed)
    }

    pub fn duplicate_dropped(&self) -> u64 {
        self.duplicate_dropped.load(Ordering::Relaxed)
    }

    pub fn store_failures(&self) -> u64 {
        self.store_failures.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self, queue_depth: usize) -> StatsSnapshot {
        let mut topics: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        topics.sort();

        StatsSnapshot {
            received: self.received(),
            unique_processed: self.unique_processed(),
            duplicate_dropped: self.duplicate_dropped(),
            store_failures: self.store_failures(),
            topics_count: topics.len(),
            topics,
            queue_depth,
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_independent() {
        let stats = IngestStats::new();
        stats.record_received("a");
        stats.record_received("b");
        stats.record_received("a");
        stats.record_unique();
        stats.record_duplicate();

        let snap = stats.snapshot(1);
        assert_eq!(snap.received, 3);
        assert_eq!(snap.unique_processed, 1);
        assert_eq!(snap.duplicate_dropped, 1);
        assert_eq!(snap.store_failures, 0);
        assert_eq!(snap.topics, vec!["a", "b"]);
        assert_eq!(snap.topics_count, 2);
        assert_eq!(snap.queue_depth, 1);
        assert_eq!(snap.backlog(), 1);
    }

    #[test]
    fn test_store_failure_counts_as_processed() {
        let stats = IngestStats::new();
        stats.record_received("t");
        stats.record_store_failure();

        let snap = stats.snapshot(0);
        assert_eq!(snap.processed(), 1);
        assert_eq!(snap.backlog(), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = std::sync::Arc::new(IngestStats::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_received(&format!("topic-{}", i % 2));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(stats.received(), 8000);
        assert_eq!(stats.snapshot(0).topics_count, 2);
    }
}

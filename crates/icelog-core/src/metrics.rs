//! Process-wide counters for the appender.
//!
//! Plain atomics behind an `Arc`; the admin server serves a snapshot of
//! these alongside the live buffer aggregates.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared across the coordinator and workers.
#[derive(Debug, Default)]
pub struct AppenderMetrics {
    messages_consumed: AtomicU64,
    records_transformed: AtomicU64,
    parse_failures: AtomicU64,
    flushes: AtomicU64,
    rows_flushed: AtomicU64,
    commit_conflicts: AtomicU64,
    commit_failures: AtomicU64,
    offset_commits: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub messages_consumed: u64,
    pub records_transformed: u64,
    pub parse_failures: u64,
    pub flushes: u64,
    pub rows_flushed: u64,
    pub commit_conflicts: u64,
    pub commit_failures: u64,
    pub offset_commits: u64,
}

impl AppenderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.messages_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_records(&self, count: usize) {
        self.records_transformed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self, rows: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.rows_flushed.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_commit_conflict(&self) {
        self.commit_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_offset_commit(&self, partitions: usize) {
        self.offset_commits
            .fetch_add(partitions as u64, Ordering::Relaxed);
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn rows_flushed(&self) -> u64 {
        self.rows_flushed.load(Ordering::Relaxed)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    pub fn commit_conflicts(&self) -> u64 {
        self.commit_conflicts.load(Ordering::Relaxed)
    }

    /// Snapshot for the /stats endpoint.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_consumed: self.messages_consumed.load(Ordering::Relaxed),
            records_transformed: self.records_transformed.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            rows_flushed: self.rows_flushed.load(Ordering::Relaxed),
            commit_conflicts: self.commit_conflicts.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            offset_commits: self.offset_commits.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = AppenderMetrics::new();
        metrics.record_message();
        metrics.record_message();
        metrics.record_records(5);
        metrics.record_flush(5);
        metrics.record_commit_conflict();
        metrics.record_offset_commit(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_consumed, 2);
        assert_eq!(snapshot.records_transformed, 5);
        assert_eq!(snapshot.flushes, 1);
        assert_eq!(snapshot.rows_flushed, 5);
        assert_eq!(snapshot.commit_conflicts, 1);
        assert_eq!(snapshot.offset_commits, 2);
        assert_eq!(snapshot.parse_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = AppenderMetrics::new();
        metrics.record_parse_failure();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["parse_failures"], 1);
    }
}

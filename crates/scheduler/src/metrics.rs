use chrono::{DateTime, Utc};
use lanes_core::Lane;
use serde::Serialize;

/// Point-in-time counters for one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub lane: Lane,
    /// Records waiting for their delay to elapse.
    pub delayed: usize,
    /// Records eligible for the next flush.
    pub pending: usize,
    /// Records left in the batch of the flush in progress.
    pub processing: usize,
    /// Deferred callbacks that have not settled.
    pub async_in_flight: usize,
    /// Recycled records ready for reuse.
    pub pooled: usize,
    /// Records allocated and not dropped, pooled ones included.
    pub live_records: usize,
    pub flush_requested: bool,
    pub suspended: bool,
    pub flushes: u64,
    pub tasks_run: u64,
    pub tasks_failed: u64,
    pub tasks_canceled: u64,
    /// Records created fresh rather than taken from the pool.
    pub allocations: u64,
    /// Records taken from the pool.
    pub reused: u64,
    pub last_flush_at: Option<DateTime<Utc>>,
}

impl QueueStats {
    /// Records linked into any list or running asynchronously.
    pub fn outstanding(&self) -> usize {
        self.delayed + self.pending + self.processing + self.async_in_flight
    }

    /// Share of record requests served from the pool (0.0 - 1.0).
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.allocations + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

/// Stats for every lane of a scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub disposed: bool,
    pub lanes: Vec<QueueStats>,
}

impl SchedulerStats {
    pub fn lane(&self, lane: Lane) -> Option<&QueueStats> {
        self.lanes.iter().find(|stats| stats.lane == lane)
    }

    pub fn outstanding(&self) -> usize {
        self.lanes.iter().map(QueueStats::outstanding).sum()
    }

    pub fn tasks_run(&self) -> u64 {
        self.lanes.iter().map(|stats| stats.tasks_run).sum()
    }
}

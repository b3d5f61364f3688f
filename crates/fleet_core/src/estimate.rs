use std::collections::VecDeque;
use std::time::Duration;

/// A downstream request takes roughly 105 s and a worker holds up to 10 of
/// them, so about 1050 s of 3 s samples are needed for a stable average.
pub const DEFAULT_HISTORY_CAPACITY: usize = 350;

/// Sliding window of per-interval completion deltas.
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputWindow {
    history: VecDeque<u64>,
    capacity: usize,
    interval: Duration,
    last_items: u64,
    last_pages: u64,
}

impl ThroughputWindow {
    pub fn new(capacity: usize, interval: Duration) -> Self {
        Self::resume(capacity, interval, 0, 0)
    }

    /// Start from persisted counter values so a restart does not count
    /// all previously completed work as one interval's throughput.
    pub fn resume(capacity: usize, interval: Duration, items_done: u64, pages_done: u64) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            interval,
            last_items: items_done,
            last_pages: pages_done,
        }
    }

    /// Record the current counter values and return the delta since the last tick.
    ///
    /// A counter that went backwards (reset by an operator) contributes zero.
    pub fn record_counters(&mut self, items_done: u64, pages_done: u64) -> u64 {
        let delta = items_done.saturating_sub(self.last_items)
            + pages_done.saturating_sub(self.last_pages);
        self.last_items = items_done;
        self.last_pages = pages_done;
        self.push_delta(delta);
        delta
    }

    pub fn push_delta(&mut self, delta: u64) {
        self.history.push_back(delta);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Mean units completed per second over the window.
    pub fn average_throughput(&self) -> Option<f64> {
        if self.history.is_empty() || self.interval.is_zero() {
            return None;
        }
        let sum: u64 = self.history.iter().sum();
        let mean = sum as f64 / self.history.len() as f64;
        Some(mean / self.interval.as_secs_f64())
    }

    /// `round(remaining / throughput)`, or `None` while the average is zero or unknown.
    pub fn eta_seconds(&self, remaining: u64) -> Option<u64> {
        let throughput = self.average_throughput()?;
        let eta = (remaining as f64 / throughput).round();
        if eta.is_finite() && eta >= 0.0 {
            Some(eta as u64)
        } else {
            None
        }
    }
}

/// One estimator tick, ready for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub remaining_pages: u64,
    pub remaining_items: u64,
    pub pages_done: u64,
    pub items_done: u64,
    pub delta: u64,
    pub average_throughput: Option<f64>,
    pub eta_seconds: Option<u64>,
}

impl ProgressSnapshot {
    pub fn remaining(&self) -> u64 {
        self.remaining_pages + self.remaining_items
    }

    pub fn total_pages(&self) -> u64 {
        self.remaining_pages + self.pages_done
    }

    pub fn total_items(&self) -> u64 {
        self.remaining_items + self.items_done
    }
}

/// Compact human form such as `1h 02m 03s`.
pub fn format_eta(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}h {minutes:02}m {secs:02}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs:02}s")
    } else {
        format!("{secs}s")
    }
}

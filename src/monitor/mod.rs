//! Performance monitor.
//!
//! Purely observational: the selector reports one [`PerformanceRecord`] per
//! call and nothing reads them back on the selection path.
//!
//! [`PerformanceMonitor::record`] never blocks. If the record buffer is busy
//! (a report is being computed, or another request is recording) the record
//! goes to an unbounded side channel instead, and is folded into the buffer by
//! the next writer or reader that gets the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Default number of retained records.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// One selection call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub user_id: String,
    /// `None` when the call failed before a layout was chosen.
    pub layout_key: Option<String>,
    pub area: String,
    pub elapsed_ms: f64,
    pub cache_hit: bool,
    pub rules_evaluated: usize,
    pub measured_at: DateTime<Utc>,
}

/// Inclusive time window; an open end is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// The window ending now and reaching back `window`.
    pub fn last(window: chrono::Duration) -> Self {
        let now = Utc::now();
        Self::between(now - window, now)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Aggregates over the records in a [`TimeRange`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub range: TimeRange,
    pub samples: usize,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub cache_hits: usize,
    /// Fraction of samples served from cache, in `[0, 1]`.
    pub cache_hit_rate: f64,
    /// Averaged over every sample; cache hits count as zero rules.
    pub rules_evaluated_avg: f64,
}

#[derive(Debug)]
pub struct PerformanceMonitor {
    records: Mutex<VecDeque<PerformanceRecord>>,
    capacity: usize,
    overflow_tx: mpsc::UnboundedSender<PerformanceRecord>,
    overflow_rx: Mutex<mpsc::UnboundedReceiver<PerformanceRecord>>,
    recorded: AtomicU64,
    discarded: AtomicU64,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PerformanceMonitor {
    pub fn new(capacity: usize) -> Self {
        let (overflow_tx, overflow_rx) = mpsc::unbounded_channel();
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            overflow_tx,
            overflow_rx: Mutex::new(overflow_rx),
            recorded: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Fire-and-forget.
    pub fn record(&self, record: PerformanceRecord) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
        match self.records.try_lock() {
            Some(mut records) => {
                self.drain_overflow(&mut records);
                self.push(&mut records, record);
            }
            None => {
                // The receiver lives as long as `self`, so this cannot fail.
                let _ = self.overflow_tx.send(record);
            }
        }
    }

    /// Aggregate the retained records whose `measured_at` falls in `range`.
    pub fn report(&self, range: TimeRange) -> PerformanceReport {
        let mut latencies = Vec::new();
        let mut cache_hits = 0usize;
        let mut rules_total = 0usize;
        {
            let mut records = self.records.lock();
            self.drain_overflow(&mut records);
            for record in records.iter().filter(|r| range.contains(r.measured_at)) {
                latencies.push(record.elapsed_ms);
                if record.cache_hit {
                    cache_hits += 1;
                }
                rules_total += record.rules_evaluated;
            }
        }

        let samples = latencies.len();
        if samples == 0 {
            return PerformanceReport {
                range,
                ..PerformanceReport::default()
            };
        }

        latencies.sort_by(|a, b| a.total_cmp(b));
        let n = samples as f64;
        // Nearest-rank percentile.
        let p95_index = ((0.95 * n).ceil() as usize).clamp(1, samples) - 1;

        PerformanceReport {
            range,
            samples,
            avg_latency_ms: latencies.iter().sum::<f64>() / n,
            p95_latency_ms: latencies[p95_index],
            cache_hits,
            cache_hit_rate: cache_hits as f64 / n,
            rules_evaluated_avg: rules_total as f64 / n,
        }
    }

    /// Records currently retained.
    pub fn len(&self) -> usize {
        let mut records = self.records.lock();
        self.drain_overflow(&mut records);
        records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total records ever submitted.
    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Records pushed out by the capacity bound.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn drain_overflow(&self, records: &mut VecDeque<PerformanceRecord>) {
        if let Some(mut rx) = self.overflow_rx.try_lock() {
            while let Ok(record) = rx.try_recv() {
                self.push(records, record);
            }
        }
    }

    fn push(&self, records: &mut VecDeque<PerformanceRecord>, record: PerformanceRecord) {
        while records.len() >= self.capacity {
            records.pop_front();
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
        records.push_back(record);
    }
}

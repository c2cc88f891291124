use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::LogLevel;

/// Process counters for the façade itself: how many records went through,
/// how many failed or were shed. Cheap to bump on the hot path, read on
/// demand as a snapshot.
#[derive(Default)]
pub struct FactoryMetrics {
    records_total: AtomicU64,
    records_per_level: [AtomicU64; 6],
    dispatch_errors: AtomicU64,
    records_dropped: AtomicU64,
    batches_dropped: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub records_total: u64,
    pub trace: u64,
    pub debug: u64,
    pub info: u64,
    pub warn: u64,
    pub error: u64,
    pub critical: u64,
    pub dispatch_errors: u64,
    pub records_dropped: u64,
    pub batches_dropped: u64,
    pub last_error: Option<String>,
}

impl FactoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn level_slot(level: LogLevel) -> usize {
        match level {
            LogLevel::Trace => 0,
            LogLevel::Debug => 1,
            LogLevel::Info => 2,
            LogLevel::Warn => 3,
            LogLevel::Error => 4,
            LogLevel::Critical => 5,
        }
    }

    pub fn record_emitted(&self, level: LogLevel) {
        self.records_total.fetch_add(1, Ordering::Relaxed);
        self.records_per_level[Self::level_slot(level)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_error(&self, detail: &str) {
        self.dispatch_errors.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(detail.to_string());
    }

    pub fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_dropped_count(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let per = |level| self.records_per_level[Self::level_slot(level)].load(Ordering::Relaxed);
        MetricsSnapshot {
            records_total: self.records_total.load(Ordering::Relaxed),
            trace: per(LogLevel::Trace),
            debug: per(LogLevel::Debug),
            info: per(LogLevel::Info),
            warn: per(LogLevel::Warn),
            error: per(LogLevel::Error),
            critical: per(LogLevel::Critical),
            dispatch_errors: self.dispatch_errors.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

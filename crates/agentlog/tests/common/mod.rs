#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agentlog::{LogRecord, RemoteTransport};

/// Transport that keeps every delivered record in memory so tests can
/// inspect exactly what the façade emitted. Flip `fail` to simulate an
/// unreachable backend.
#[derive(Default)]
pub struct RecordingTransport {
    records: Mutex<Vec<LogRecord>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn always_failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl RemoteTransport for RecordingTransport {
    fn send(&self, batch: &[LogRecord]) -> bool {
        if self.fail.load(Ordering::SeqCst) {
            return false;
        }
        self.records.lock().unwrap().extend_from_slice(batch);
        true
    }
}

/// Transport that sleeps on every batch, for tests that need a slow
/// consumer behind the async queue.
pub struct SlowTransport {
    pub delay: std::time::Duration,
}

impl RemoteTransport for SlowTransport {
    fn send(&self, _batch: &[LogRecord]) -> bool {
        std::thread::sleep(self.delay);
        true
    }
}

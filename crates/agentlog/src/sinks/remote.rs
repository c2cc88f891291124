use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::config::RemoteSinkConfig;
use crate::errors::SinkResult;
use crate::metrics::FactoryMetrics;
use crate::record::LogRecord;
use crate::sinks::LogSink;

/// External collaborator that ships batches of records somewhere else — an
/// Elasticsearch client, an HTTP collector. The façade owns only the
/// buffering and retry policy around it.
pub trait RemoteTransport: Send + Sync {
    /// Ships one batch. Returns true on success; the sink retries a failed
    /// batch exactly once before dropping it.
    fn send(&self, batch: &[LogRecord]) -> bool;
}

/// No-op transport: accepts and discards every batch. The default stand-in
/// when the host has not wired a real transport.
#[derive(Debug, Default)]
pub struct NullTransport;

impl RemoteTransport for NullTransport {
    fn send(&self, _batch: &[LogRecord]) -> bool {
        true
    }
}

/// Buffers records in memory and flushes them as one batch once
/// `batch_size` is reached. A batch that fails twice is dropped with a
/// single self-diagnostic; there is no unbounded retry loop and the buffer
/// never grows past one batch.
pub struct RemoteSink {
    endpoint: String,
    index: String,
    batch_size: usize,
    transport: Arc<dyn RemoteTransport>,
    metrics: Arc<FactoryMetrics>,
    buffer: Mutex<Vec<LogRecord>>,
    closed: AtomicBool,
}

impl RemoteSink {
    pub fn new(
        config: &RemoteSinkConfig,
        transport: Arc<dyn RemoteTransport>,
        metrics: Arc<FactoryMetrics>,
    ) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            index: config.index.clone(),
            batch_size: config.batch_size,
            transport,
            metrics,
            buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    fn flush_buffer(&self, buffer: &mut Vec<LogRecord>) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(buffer);
        if self.transport.send(&batch) {
            return;
        }
        // One immediate retry, then the batch is gone.
        if self.transport.send(&batch) {
            return;
        }
        self.metrics.batch_dropped();
        warn!(
            target: "agentlog",
            endpoint = %self.endpoint,
            index = %self.index,
            records = batch.len(),
            "remote transport failed twice, batch dropped"
        );
    }
}

impl LogSink for RemoteSink {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn emit(&self, record: &LogRecord) -> SinkResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut buffer = self.buffer.lock();
        buffer.push(record.clone());
        if buffer.len() >= self.batch_size {
            self.flush_buffer(&mut buffer);
        }
        Ok(())
    }

    fn flush(&self) -> SinkResult<()> {
        let mut buffer = self.buffer.lock();
        self.flush_buffer(&mut buffer);
        Ok(())
    }

    fn close(&self) -> SinkResult<()> {
        self.flush()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use parking_lot::Mutex as PlMutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    fn record(message: &str) -> LogRecord {
        LogRecord::new("svc", LogLevel::Info, message, &BTreeMap::new(), &[])
    }

    /// Records every batch it receives; optionally fails the first N sends.
    #[derive(Default)]
    struct RecordingTransport {
        batches: PlMutex<Vec<Vec<LogRecord>>>,
        fail_first: AtomicUsize,
    }

    impl RecordingTransport {
        fn failing(times: usize) -> Self {
            Self {
                batches: PlMutex::new(Vec::new()),
                fail_first: AtomicUsize::new(times),
            }
        }
    }

    impl RemoteTransport for RecordingTransport {
        fn send(&self, batch: &[LogRecord]) -> bool {
            if self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return false;
            }
            self.batches.lock().push(batch.to_vec());
            true
        }
    }

    fn sink_with(
        batch_size: usize,
        transport: Arc<RecordingTransport>,
    ) -> (RemoteSink, Arc<FactoryMetrics>) {
        let metrics = Arc::new(FactoryMetrics::new());
        let sink = RemoteSink::new(
            &RemoteSinkConfig {
                batch_size,
                ..RemoteSinkConfig::default()
            },
            transport,
            metrics.clone(),
        );
        (sink, metrics)
    }

    #[test]
    fn flushes_when_batch_fills() {
        let transport = Arc::new(RecordingTransport::default());
        let (sink, _) = sink_with(3, transport.clone());

        sink.emit(&record("a")).unwrap();
        sink.emit(&record("b")).unwrap();
        assert_eq!(transport.batches.lock().len(), 0);
        assert_eq!(sink.buffered(), 2);

        sink.emit(&record("c")).unwrap();
        let batches = transport.batches.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(sink.buffered(), 0);
    }

    #[test]
    fn retries_once_then_succeeds() {
        let transport = Arc::new(RecordingTransport::failing(1));
        let (sink, metrics) = sink_with(1, transport.clone());

        sink.emit(&record("a")).unwrap();
        assert_eq!(transport.batches.lock().len(), 1);
        assert_eq!(metrics.snapshot().batches_dropped, 0);
    }

    #[test]
    fn drops_batch_after_second_failure() {
        let transport = Arc::new(RecordingTransport::failing(2));
        let (sink, metrics) = sink_with(1, transport.clone());

        sink.emit(&record("a")).unwrap();
        assert_eq!(transport.batches.lock().len(), 0);
        assert_eq!(metrics.snapshot().batches_dropped, 1);
        assert_eq!(sink.buffered(), 0);

        // The sink keeps working for the next batch.
        sink.emit(&record("b")).unwrap();
        assert_eq!(transport.batches.lock().len(), 1);
    }

    #[test]
    fn close_flushes_partial_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let (sink, _) = sink_with(10, transport.clone());

        sink.emit(&record("tail")).unwrap();
        sink.close().unwrap();
        assert_eq!(transport.batches.lock().len(), 1);

        // Emits after close are silent no-ops.
        sink.emit(&record("late")).unwrap();
        assert_eq!(sink.buffered(), 0);
    }
}

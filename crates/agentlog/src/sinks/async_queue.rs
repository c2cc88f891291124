use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::diagnostics::DropReporter;
use crate::errors::{SinkError, SinkResult};
use crate::metrics::FactoryMetrics;
use crate::record::LogRecord;
use crate::sinks::LogSink;

/// How often the worker wakes to check for a shutdown request.
const WORKER_POLL: Duration = Duration::from_millis(50);
/// Window for the rate-limited "records dropped" diagnostic.
const DROP_REPORT_WINDOW: Duration = Duration::from_secs(5);

enum Job {
    Emit {
        sinks: Arc<Vec<Arc<dyn LogSink>>>,
        record: LogRecord,
    },
    Flush {
        ack: SyncSender<()>,
    },
}

/// One background thread draining a bounded queue of records for every
/// async-enabled chain in a factory. Producers never block: when the queue
/// is full the newest record is dropped and counted instead.
pub struct AsyncDispatcher {
    tx: SyncSender<Job>,
    shutdown_requested: Arc<AtomicBool>,
    done_rx: Mutex<Option<Receiver<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    drops: DropReporter,
    metrics: Arc<FactoryMetrics>,
    closed: AtomicBool,
}

impl AsyncDispatcher {
    pub fn new(queue_capacity: usize, metrics: Arc<FactoryMetrics>) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Job>(queue_capacity);
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        let shutdown_requested = Arc::new(AtomicBool::new(false));

        let worker_shutdown = shutdown_requested.clone();
        let worker_metrics = metrics.clone();
        let worker = std::thread::Builder::new()
            .name("agentlog-dispatch".to_string())
            .spawn(move || worker_loop(rx, done_tx, worker_shutdown, worker_metrics))
            .ok();
        if worker.is_none() {
            warn!(target: "agentlog", "async worker thread could not be spawned, records will be dropped");
        }

        Self {
            tx,
            shutdown_requested,
            done_rx: Mutex::new(Some(done_rx)),
            worker: Mutex::new(worker),
            drops: DropReporter::new(DROP_REPORT_WINDOW),
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// Queues a record for background dispatch. Never blocks: a full queue
    /// sheds the record and bumps the drop counter.
    pub fn enqueue(&self, sinks: Arc<Vec<Arc<dyn LogSink>>>, record: LogRecord) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.tx.try_send(Job::Emit { sinks, record }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.record_dropped();
                self.drops.drop_and_report();
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Waits until every record queued before this call has been handed to
    /// its sinks, or the timeout passes.
    pub fn drain(&self, timeout: Duration) -> SinkResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let deadline = std::time::Instant::now() + timeout;
        let timed_out = || SinkError::ShutdownTimeout {
            timeout_ms: timeout.as_millis() as u64,
        };

        let (ack_tx, ack_rx) = mpsc::sync_channel::<()>(1);
        let mut marker = Job::Flush { ack: ack_tx };
        loop {
            match self.tx.try_send(marker) {
                Ok(()) => break,
                Err(TrySendError::Full(job)) => {
                    if std::time::Instant::now() >= deadline {
                        return Err(timed_out());
                    }
                    marker = job;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(TrySendError::Disconnected(_)) => return Ok(()),
            }
        }
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        ack_rx.recv_timeout(remaining).map_err(|_| timed_out())
    }

    /// Stops the worker after it drains whatever is already queued. Records
    /// still unflushed when the timeout passes are discarded.
    pub fn shutdown(&self, timeout: Duration) -> SinkResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown_requested.store(true, Ordering::Release);

        let done_rx = self.done_rx.lock().take();
        let drained = match done_rx {
            Some(rx) => rx.recv_timeout(timeout).is_ok(),
            None => true,
        };
        if !drained {
            return Err(SinkError::ShutdownTimeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn worker_loop(
    rx: Receiver<Job>,
    done_tx: SyncSender<()>,
    shutdown_requested: Arc<AtomicBool>,
    metrics: Arc<FactoryMetrics>,
) {
    loop {
        if shutdown_requested.load(Ordering::Acquire) {
            break;
        }
        match rx.recv_timeout(WORKER_POLL) {
            Ok(job) => handle_job(job, &metrics),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    // Drain what is already queued before acknowledging shutdown.
    while let Ok(job) = rx.try_recv() {
        handle_job(job, &metrics);
    }
    let _ = done_tx.send(());
}

fn handle_job(job: Job, metrics: &FactoryMetrics) {
    match job {
        Job::Emit { sinks, record } => {
            for sink in sinks.iter() {
                if let Err(err) = sink.emit(&record) {
                    metrics.record_dispatch_error(&err.to_string());
                    warn!(
                        target: "agentlog",
                        sink = sink.name(),
                        error = %err,
                        "sink dispatch failed"
                    );
                }
            }
        }
        Job::Flush { ack } => {
            let _ = ack.send(());
        }
    }
}

/// Chain member that forwards records to the shared dispatcher instead of
/// writing on the caller's thread. The wrapped sinks are still the shared
/// physical instances, so flush/close stay idempotent.
pub struct AsyncSink {
    inner: Arc<Vec<Arc<dyn LogSink>>>,
    dispatcher: Arc<AsyncDispatcher>,
}

impl AsyncSink {
    pub fn new(inner: Vec<Arc<dyn LogSink>>, dispatcher: Arc<AsyncDispatcher>) -> Self {
        Self {
            inner: Arc::new(inner),
            dispatcher,
        }
    }
}

/// Bound on waiting for the queue to drain during flush/close.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

impl LogSink for AsyncSink {
    fn name(&self) -> &'static str {
        "async"
    }

    fn emit(&self, record: &LogRecord) -> SinkResult<()> {
        self.dispatcher.enqueue(self.inner.clone(), record.clone());
        Ok(())
    }

    fn flush(&self) -> SinkResult<()> {
        self.dispatcher.drain(FLUSH_TIMEOUT)?;
        for sink in self.inner.iter() {
            sink.flush()?;
        }
        Ok(())
    }

    fn close(&self) -> SinkResult<()> {
        let drained = self.dispatcher.drain(FLUSH_TIMEOUT);
        for sink in self.inner.iter() {
            let _ = sink.close();
        }
        drained
    }
}

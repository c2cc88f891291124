use std::sync::Arc;

use tracing::warn;

use crate::errors::SinkResult;
use crate::metrics::FactoryMetrics;
use crate::record::LogRecord;

mod async_queue;
mod console;
mod encrypted;
mod file;
mod remote;

pub use async_queue::{AsyncDispatcher, AsyncSink};
pub use console::ConsoleSink;
pub use encrypted::{decrypt_line, EncryptedFileSink, KeyError, KeyProvider, StaticKeyProvider};
pub use file::{FileSink, RotatingWriter};
pub use remote::{NullTransport, RemoteSink, RemoteTransport};

/// One output destination. Implementations use interior mutability so a
/// sink can be shared between chains; all of them must tolerate `close`
/// being called more than once.
pub trait LogSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Writes one record. Errors are caught by the chain, never by callers.
    fn emit(&self, record: &LogRecord) -> SinkResult<()>;

    fn flush(&self) -> SinkResult<()>;

    /// Flushes and releases resources. Emits after close are silent no-ops.
    fn close(&self) -> SinkResult<()>;
}

/// The ordered set of sinks attached to one logger handle. A failure in one
/// sink is reported as a self-diagnostic and never stops dispatch to the
/// remaining sinks.
#[derive(Clone)]
pub struct HandlerChain {
    sinks: Vec<Arc<dyn LogSink>>,
    metrics: Arc<FactoryMetrics>,
}

impl HandlerChain {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>, metrics: Arc<FactoryMetrics>) -> Self {
        Self { sinks, metrics }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn sinks(&self) -> &[Arc<dyn LogSink>] {
        &self.sinks
    }

    pub fn dispatch(&self, record: &LogRecord) {
        for sink in &self.sinks {
            if let Err(err) = sink.emit(record) {
                self.metrics.record_dispatch_error(&err.to_string());
                warn!(
                    target: "agentlog",
                    sink = sink.name(),
                    error = %err,
                    "sink dispatch failed"
                );
            }
        }
    }

    pub fn flush_all(&self) {
        for sink in &self.sinks {
            if let Err(err) = sink.flush() {
                warn!(target: "agentlog", sink = sink.name(), error = %err, "sink flush failed");
            }
        }
    }

    pub fn close_all(&self) {
        for sink in &self.sinks {
            if let Err(err) = sink.close() {
                warn!(target: "agentlog", sink = sink.name(), error = %err, "sink close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use crate::errors::SinkError;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink;

    impl LogSink for FailingSink {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn emit(&self, _record: &LogRecord) -> SinkResult<()> {
            Err(SinkError::dispatch(
                "failing",
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
            ))
        }
        fn flush(&self) -> SinkResult<()> {
            Ok(())
        }
        fn close(&self) -> SinkResult<()> {
            Ok(())
        }
    }

    struct CountingSink(AtomicUsize);

    impl LogSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }
        fn emit(&self, _record: &LogRecord) -> SinkResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn flush(&self) -> SinkResult<()> {
            Ok(())
        }
        fn close(&self) -> SinkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn failing_sink_does_not_stop_the_chain() {
        let metrics = Arc::new(FactoryMetrics::new());
        let counting = Arc::new(CountingSink(AtomicUsize::new(0)));
        let chain = HandlerChain::new(
            vec![Arc::new(FailingSink), counting.clone()],
            metrics.clone(),
        );

        let record = LogRecord::new("t", LogLevel::Info, "msg", &BTreeMap::new(), &[]);
        chain.dispatch(&record);
        chain.dispatch(&record);

        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().dispatch_errors, 2);
    }
}

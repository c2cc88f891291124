use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::config::{LoggingConfig, SinkConfig};
use crate::diagnostics::OnceWarnings;
use crate::errors::SinkResult;
use crate::metrics::FactoryMetrics;
use crate::sinks::{
    AsyncDispatcher, AsyncSink, ConsoleSink, EncryptedFileSink, FileSink, HandlerChain,
    KeyProvider, LogSink, RemoteSink, RemoteTransport,
};

/// Turns resolved configurations into handler chains. Physical sinks are
/// cached by `(logger, sink options)`: building the same effective
/// configuration twice reuses the same file handle or remote buffer instead
/// of opening a competing one, which would double-rotate files and
/// double-flush batches.
pub struct HandlerFactory {
    physical: DashMap<String, Arc<dyn LogSink>>,
    transport: Arc<dyn RemoteTransport>,
    key_provider: Arc<dyn KeyProvider>,
    metrics: Arc<FactoryMetrics>,
    construction_warnings: OnceWarnings,
}

impl HandlerFactory {
    pub fn new(
        transport: Arc<dyn RemoteTransport>,
        key_provider: Arc<dyn KeyProvider>,
        metrics: Arc<FactoryMetrics>,
    ) -> Self {
        Self {
            physical: DashMap::new(),
            transport,
            key_provider,
            metrics,
            construction_warnings: OnceWarnings::new(),
        }
    }

    /// Builds the chain for one logger. Sinks that fail to construct are
    /// skipped with a one-time warning; if nothing survives, a console sink
    /// is inserted so the chain is never empty.
    pub fn build(
        &self,
        config: &LoggingConfig,
        dispatcher: Option<&Arc<AsyncDispatcher>>,
    ) -> HandlerChain {
        let mut sync_sinks: Vec<Arc<dyn LogSink>> = Vec::new();
        let mut deferred: Vec<Arc<dyn LogSink>> = Vec::new();

        for sink_config in &config.sinks {
            match self.physical_sink(&config.name, sink_config) {
                Ok(sink) => {
                    // Console output stays on the caller's thread even in
                    // async mode; only I/O-bound sinks go behind the queue.
                    let defer = config.async_enabled
                        && !matches!(sink_config, SinkConfig::Console)
                        && dispatcher.is_some();
                    if defer {
                        deferred.push(sink);
                    } else {
                        sync_sinks.push(sink);
                    }
                }
                Err(err) => {
                    let key = format!("{}|{}", config.name, sink_config.kind());
                    if self.construction_warnings.first_time(&key) {
                        warn!(
                            target: "agentlog",
                            logger = %config.name,
                            sink = sink_config.kind(),
                            error = %err,
                            "sink skipped, continuing with remaining sinks"
                        );
                    }
                }
            }
        }

        if let (true, Some(dispatcher)) = (!deferred.is_empty(), dispatcher) {
            sync_sinks.push(Arc::new(AsyncSink::new(deferred, dispatcher.clone())));
        }

        if sync_sinks.is_empty() {
            let key = format!("{}|fallback", config.name);
            if self.construction_warnings.first_time(&key) {
                warn!(
                    target: "agentlog",
                    logger = %config.name,
                    "no usable sinks, falling back to console-only"
                );
            }
            sync_sinks.push(Arc::new(ConsoleSink::new()));
        }

        HandlerChain::new(sync_sinks, self.metrics.clone())
    }

    /// Returns the cached physical sink for this `(logger, options)` pair,
    /// constructing it under the cache entry's lock so concurrent builders
    /// cannot race into opening the same file twice.
    fn physical_sink(
        &self,
        logger_name: &str,
        sink_config: &SinkConfig,
    ) -> SinkResult<Arc<dyn LogSink>> {
        let key = format!(
            "{logger_name}|{}",
            serde_json::to_string(sink_config).unwrap_or_default()
        );
        match self.physical.entry(key) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let sink = self.construct(logger_name, sink_config)?;
                entry.insert(sink.clone());
                Ok(sink)
            }
        }
    }

    fn construct(
        &self,
        logger_name: &str,
        sink_config: &SinkConfig,
    ) -> SinkResult<Arc<dyn LogSink>> {
        match sink_config {
            SinkConfig::Console => Ok(Arc::new(ConsoleSink::new())),
            SinkConfig::File(file_config) => {
                Ok(Arc::new(FileSink::new(logger_name, file_config)?))
            }
            SinkConfig::Remote(remote_config) => Ok(Arc::new(RemoteSink::new(
                remote_config,
                self.transport.clone(),
                self.metrics.clone(),
            ))),
            SinkConfig::EncryptedFile(enc_config) => Ok(Arc::new(EncryptedFileSink::new(
                logger_name,
                enc_config,
                self.key_provider.as_ref(),
            )?)),
        }
    }

    /// Number of distinct physical sinks constructed so far.
    pub fn physical_sink_count(&self) -> usize {
        self.physical.len()
    }
}

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{
    ConfigOverrides, ConfigRegistry, FileSinkConfig, LoggingConfig, SinkConfig,
    DEFAULT_ASYNC_QUEUE_SIZE,
};
use crate::errors::ConfigResult;
use crate::factory::HandlerFactory;
use crate::handle::LoggerHandle;
use crate::metrics::{FactoryMetrics, MetricsSnapshot};
use crate::record::ExecutionContext;
use crate::sinks::{
    AsyncDispatcher, KeyProvider, NullTransport, RemoteTransport, StaticKeyProvider,
};

/// Bound on flushing the async queue and remote buffers at shutdown;
/// records still unflushed afterwards are discarded.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// The façade's public entry point: resolves configurations, builds handler
/// chains, and caches one `LoggerHandle` per `(name, overrides)` pair for
/// the life of the process.
///
/// There is no hidden global instance. The host constructs one factory at
/// startup, passes it (or an `Arc` of it) to whatever needs logging, and
/// calls `shutdown()` on the way out.
// @component: {"k":"C","id":"logger_factory","t":"Cached structured logger factory","f":["logging","factory","concurrency"]}
pub struct LoggerFactory {
    registry: ConfigRegistry,
    handlers: HandlerFactory,
    cache: DashMap<(String, String), LoggerHandle>,
    metrics: Arc<FactoryMetrics>,
    exec: ExecutionContext,
    dispatcher: Mutex<Option<Arc<AsyncDispatcher>>>,
    queue_capacity: usize,
}

pub struct LoggerFactoryBuilder {
    transport: Arc<dyn RemoteTransport>,
    key_provider: Arc<dyn KeyProvider>,
    queue_capacity: usize,
}

impl Default for LoggerFactoryBuilder {
    fn default() -> Self {
        Self {
            transport: Arc::new(NullTransport),
            key_provider: Arc::new(StaticKeyProvider::new()),
            queue_capacity: DEFAULT_ASYNC_QUEUE_SIZE,
        }
    }
}

impl LoggerFactoryBuilder {
    pub fn with_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_key_provider(mut self, provider: Arc<dyn KeyProvider>) -> Self {
        self.key_provider = provider;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn build(self) -> LoggerFactory {
        let metrics = Arc::new(FactoryMetrics::new());
        LoggerFactory {
            registry: ConfigRegistry::new(),
            handlers: HandlerFactory::new(self.transport, self.key_provider, metrics.clone()),
            cache: DashMap::new(),
            metrics,
            exec: ExecutionContext::capture(),
            dispatcher: Mutex::new(None),
            queue_capacity: self.queue_capacity,
        }
    }
}

impl Default for LoggerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl LoggerFactory {
    pub fn new() -> Self {
        LoggerFactoryBuilder::default().build()
    }

    pub fn builder() -> LoggerFactoryBuilder {
        LoggerFactoryBuilder::default()
    }

    /// Registers a named configuration. Later `get_logger` calls for new
    /// `(name, overrides)` pairs see it; handles already built keep their
    /// original chains.
    pub fn register_config(&self, config: LoggingConfig) -> ConfigResult<()> {
        self.registry.register(config)
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// Returns the cached handle for `(name, overrides)` or builds it.
    /// Construction is single-flight: under concurrent first requests for
    /// the same key exactly one handler chain is built and everyone gets
    /// the same handle.
    pub fn get_logger(&self, name: &str, overrides: Option<&ConfigOverrides>) -> LoggerHandle {
        self.get_logger_inner(name, overrides, false)
    }

    fn get_logger_inner(
        &self,
        name: &str,
        overrides: Option<&ConfigOverrides>,
        audit: bool,
    ) -> LoggerHandle {
        let fingerprint = overrides.map(ConfigOverrides::fingerprint).unwrap_or_default();
        let fingerprint = if audit {
            format!("audit|{fingerprint}")
        } else {
            fingerprint
        };
        let key = (name.to_string(), fingerprint);

        if let Some(handle) = self.cache.get(&key) {
            return handle.clone();
        }
        // The vacant entry holds its shard lock while the chain is built,
        // so a racing request for the same key waits and reuses the result
        // instead of opening a second set of file handles.
        match self.cache.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let handle = self.build_handle(name, overrides, audit);
                entry.insert(handle.clone());
                handle
            }
        }
    }

    fn build_handle(
        &self,
        name: &str,
        overrides: Option<&ConfigOverrides>,
        audit: bool,
    ) -> LoggerHandle {
        let mut config = self.registry.resolve(name, overrides);
        if audit {
            // Every audit handle gets its own trail id so records from
            // different reviews never blur together.
            config.context_defaults.insert(
                "audit_trail_id".to_string(),
                json!(uuid::Uuid::new_v4().to_string()),
            );
        }
        let dispatcher = if config.async_enabled {
            Some(self.dispatcher_handle())
        } else {
            None
        };
        let chain = self.handlers.build(&config, dispatcher.as_ref());
        let exec = config
            .include_host_context
            .then(|| self.exec.clone());
        debug!(
            target: "agentlog",
            logger = %config.name,
            sinks = chain.len(),
            "logger created"
        );
        LoggerHandle::new(&config, chain, self.metrics.clone(), exec, audit)
    }

    fn dispatcher_handle(&self) -> Arc<AsyncDispatcher> {
        let mut guard = self.dispatcher.lock();
        match guard.as_ref() {
            Some(dispatcher) if !dispatcher.is_closed() => dispatcher.clone(),
            _ => {
                let dispatcher = Arc::new(AsyncDispatcher::new(
                    self.queue_capacity,
                    self.metrics.clone(),
                ));
                *guard = Some(dispatcher.clone());
                dispatcher
            }
        }
    }

    /// Logger for one agent, with its identity bound into every record.
    pub fn get_agent_logger(
        &self,
        agent_name: &str,
        role: &str,
        domain: &str,
        agent_id: Option<&str>,
        async_enabled: bool,
    ) -> LoggerHandle {
        let name = match agent_id {
            Some(id) => format!("agent.{agent_name}.{id}"),
            None => format!("agent.{agent_name}"),
        };
        self.registry.register_default(LoggingConfig::agent(&name));

        let mut context = std::collections::BTreeMap::new();
        context.insert("agent_name".to_string(), json!(agent_name));
        context.insert("role".to_string(), json!(role));
        context.insert("domain".to_string(), json!(domain));
        if let Some(id) = agent_id {
            context.insert("agent_id".to_string(), json!(id));
        }
        let overrides = ConfigOverrides {
            async_enabled: Some(async_enabled),
            context_defaults: Some(context),
            ..ConfigOverrides::default()
        };
        self.get_logger(&name, Some(&overrides))
    }

    /// The well-known `"performance"` logger shared by all timers.
    pub fn get_performance_logger(&self) -> LoggerHandle {
        self.registry.register_default(LoggingConfig::performance());
        self.get_logger("performance", None)
    }

    /// Logger for compliance trails. Always carries the actor and action in
    /// its context, always writes to a file sink, and bypasses level
    /// filtering so audit records are never dropped.
    pub fn create_audit_logger(&self, actor_id: &str, action_type: &str) -> LoggerHandle {
        let mut base = self.registry.resolve("audit", None);
        let has_file = base
            .sinks
            .iter()
            .any(|s| matches!(s, SinkConfig::File(_) | SinkConfig::EncryptedFile(_)));
        if !has_file {
            base.sinks.push(SinkConfig::File(FileSinkConfig::default()));
        }

        let mut context = base.context_defaults.clone();
        context.insert("actor_id".to_string(), json!(actor_id));
        context.insert("action_type".to_string(), json!(action_type));
        context.insert("audit".to_string(), Value::Bool(true));

        let overrides = ConfigOverrides {
            sinks: Some(base.sinks),
            context_defaults: Some(context),
            ..ConfigOverrides::default()
        };
        self.get_logger_inner("audit", Some(&overrides), true)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cached_handles(&self) -> usize {
        self.cache.len()
    }

    /// Flushes and closes everything: the async queue is drained with a
    /// bounded timeout, every sink of every cached handle is flushed and
    /// closed, and the cache is cleared. Safe to call more than once.
    pub fn shutdown(&self) {
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(err) = dispatcher.shutdown(SHUTDOWN_FLUSH_TIMEOUT) {
                // The subscriber may already be gone this late; stderr is
                // the only sink guaranteed to still exist.
                eprintln!("agentlog: async flush incomplete at shutdown: {err}");
            }
        }

        let handles: Vec<LoggerHandle> = self
            .cache
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &handles {
            handle.chain().flush_all();
            handle.chain().close_all();
        }
        self.cache.clear();
        if !handles.is_empty() {
            info!(target: "agentlog", handles = handles.len(), "logging facade shut down");
        }
    }
}

impl Drop for LoggerFactory {
    fn drop(&mut self) {
        self.shutdown();
    }
}

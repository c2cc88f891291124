use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{LogLevel, LoggingConfig};
use crate::mask::mask_record;
use crate::metrics::FactoryMetrics;
use crate::record::{ErrorInfo, ExecutionContext, LogRecord};
use crate::sinks::HandlerChain;

/// The object handed to callers. Cheap to clone; clones share the same
/// handler chain. The bound context is fixed at construction and merged
/// into every record, with call-site extras winning on key conflicts.
///
/// Handles live for the process: they are cached by the factory and torn
/// down together through `LoggerFactory::shutdown`.
#[derive(Clone)]
pub struct LoggerHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    name: String,
    level: LogLevel,
    audit: bool,
    mask_sensitive: bool,
    bound_context: BTreeMap<String, Value>,
    exec: Option<ExecutionContext>,
    chain: HandlerChain,
    metrics: Arc<FactoryMetrics>,
}

impl LoggerHandle {
    pub(crate) fn new(
        config: &LoggingConfig,
        chain: HandlerChain,
        metrics: Arc<FactoryMetrics>,
        exec: Option<ExecutionContext>,
        audit: bool,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                name: config.name.clone(),
                level: config.level,
                audit,
                mask_sensitive: config.mask_sensitive,
                bound_context: config.context_defaults.clone(),
                exec,
                chain,
                metrics,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn level(&self) -> LogLevel {
        self.inner.level
    }

    pub fn is_audit(&self) -> bool {
        self.inner.audit
    }

    pub fn bound_context(&self) -> &BTreeMap<String, Value> {
        &self.inner.bound_context
    }

    pub(crate) fn chain(&self) -> &HandlerChain {
        &self.inner.chain
    }

    /// True when two handles share the same underlying logger instance.
    pub fn same_instance(&self, other: &LoggerHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Emits one record. Filtering happens here, before context merging and
    /// dispatch; audit handles skip the level check entirely so compliance
    /// records are never lost to filtering.
    pub fn log(&self, level: LogLevel, message: &str, extra: &[(&str, Value)]) {
        if !self.inner.audit && level < self.inner.level {
            return;
        }
        let mut record = LogRecord::new(
            &self.inner.name,
            level,
            message,
            &self.inner.bound_context,
            extra,
        );
        if let Some(exec) = &self.inner.exec {
            record.context = Some(exec.for_current_thread());
        }
        if self.inner.mask_sensitive {
            mask_record(&mut record);
        }
        self.inner.metrics.record_emitted(level);
        self.inner.chain.dispatch(&record);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message, &[]);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message, &[]);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message, &[]);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message, &[]);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message, &[]);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogLevel::Critical, message, &[]);
    }

    /// Error record carrying structured exception details.
    pub fn error_with_source(&self, message: &str, source: &dyn std::error::Error) {
        if !self.inner.audit && LogLevel::Error < self.inner.level {
            return;
        }
        let mut record = LogRecord::new(
            &self.inner.name,
            LogLevel::Error,
            message,
            &self.inner.bound_context,
            &[],
        );
        record.error = Some(ErrorInfo {
            error_type: std::any::type_name_of_val(source).to_string(),
            error_message: source.to_string(),
        });
        if let Some(exec) = &self.inner.exec {
            record.context = Some(exec.for_current_thread());
        }
        if self.inner.mask_sensitive {
            mask_record(&mut record);
        }
        self.inner.metrics.record_emitted(LogLevel::Error);
        self.inner.chain.dispatch(&record);
    }
}

impl std::fmt::Debug for LoggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerHandle")
            .field("name", &self.inner.name)
            .field("level", &self.inner.level)
            .field("audit", &self.inner.audit)
            .field("sinks", &self.inner.chain.len())
            .finish()
    }
}

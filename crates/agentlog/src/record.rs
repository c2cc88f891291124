use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LogLevel;

/// Process-level context attached to records when a configuration enables
/// `include_host_context`. Captured once per factory; only the thread id
/// varies per record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub app_version: String,
    pub hostname: String,
    pub pid: u32,
    pub thread_id: String,
}

impl ExecutionContext {
    pub fn capture() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            thread_id: format!("{:?}", std::thread::current().id()),
        }
    }

    pub fn for_current_thread(&self) -> Self {
        Self {
            thread_id: format!("{:?}", std::thread::current().id()),
            ..self.clone()
        }
    }
}

/// Exception details carried by a record, when the call site supplied them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error_type: String,
    pub error_message: String,
}

/// One structured event: what happened, how severe, and under which merged
/// context. Serializes to a single JSON object with the fields flattened at
/// the top level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: LogLevel,
    pub logger: String,
    pub message: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ExecutionContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl LogRecord {
    /// Builds a record with `bound` and `extra` merged; on key conflicts the
    /// call-site `extra` wins because it is the more specific information.
    pub fn new(
        logger: &str,
        level: LogLevel,
        message: &str,
        bound: &BTreeMap<String, Value>,
        extra: &[(&str, Value)],
    ) -> Self {
        let mut fields = bound.clone();
        for (key, value) in extra {
            fields.insert((*key).to_string(), value.clone());
        }
        Self {
            timestamp: Utc::now().to_rfc3339(),
            level,
            logger: logger.to_string(),
            message: message.to_string(),
            fields,
            context: None,
            error: None,
        }
    }

    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Human-readable one-liner for the console sink:
    /// `<ts> - <logger> - <LEVEL> - <message> key=value ...`
    pub fn to_console_line(&self) -> String {
        let mut line = format!(
            "{} - {} - {} - {}",
            self.timestamp, self.logger, self.level, self.message
        );
        for (key, value) in &self.fields {
            let _ = write!(line, " {key}={value}");
        }
        if let Some(error) = &self.error {
            let _ = write!(
                line,
                " error_type={} error_message={}",
                error.error_type, error.error_message
            );
        }
        line
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::{ConfigError, ConfigResult};

/// Default directory for file sinks, relative to the working directory.
pub const DEFAULT_LOG_DIR: &str = "logs";
/// Size threshold for rotation when no explicit policy is given.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100MB
/// Rotated files older than this many days are deleted on rotation.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;
/// Records buffered by the remote sink before a batch is shipped.
pub const DEFAULT_REMOTE_BATCH_SIZE: usize = 50;
/// Bound of the async dispatch queue; records past it are dropped.
pub const DEFAULT_ASYNC_QUEUE_SIZE: usize = 10_000;

/// Severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "critical" | "fatal" => Ok(LogLevel::Critical),
            other => Err(ConfigError::invalid(
                "level",
                format!("unknown level '{other}'"),
            )),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a file sink starts a new file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationPolicy {
    /// Rotate once the current file reaches this many bytes.
    MaxSize(u64),
    /// Rotate on the first record of a new calendar day.
    Daily,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        RotationPolicy::MaxSize(DEFAULT_MAX_FILE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSinkConfig {
    pub dir: PathBuf,
    pub rotation: RotationPolicy,
    pub retention_days: u32,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LOG_DIR),
            rotation: RotationPolicy::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }
}

impl FileSinkConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if let RotationPolicy::MaxSize(0) = self.rotation {
            return Err(ConfigError::invalid(
                "rotation",
                "max size must be greater than zero",
            ));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::invalid(
                "retention_days",
                "must be at least one day",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSinkConfig {
    pub endpoint: String,
    pub index: String,
    pub batch_size: usize,
}

impl Default for RemoteSinkConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:9200".to_string(),
            index: "agent-logs".to_string(),
            batch_size: DEFAULT_REMOTE_BATCH_SIZE,
        }
    }
}

impl RemoteSinkConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid(
                "batch_size",
                "must be greater than zero",
            ));
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::invalid("endpoint", "must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedFileSinkConfig {
    pub file: FileSinkConfig,
    /// Opaque reference resolved through the injected `KeyProvider`.
    pub key_reference: String,
}

impl EncryptedFileSinkConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.file.validate()?;
        if self.key_reference.is_empty() {
            return Err(ConfigError::invalid("key_reference", "must not be empty"));
        }
        Ok(())
    }
}

/// One enabled output destination with its own options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SinkConfig {
    Console,
    File(FileSinkConfig),
    Remote(RemoteSinkConfig),
    EncryptedFile(EncryptedFileSinkConfig),
}

impl SinkConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        match self {
            SinkConfig::Console => Ok(()),
            SinkConfig::File(c) => c.validate(),
            SinkConfig::Remote(c) => c.validate(),
            SinkConfig::EncryptedFile(c) => c.validate(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SinkConfig::Console => "console",
            SinkConfig::File(_) => "file",
            SinkConfig::Remote(_) => "remote",
            SinkConfig::EncryptedFile(_) => "encrypted_file",
        }
    }
}

/// How one named logger behaves. Configuration is a value: once a handle is
/// built from it, later changes to the registry never touch that handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub name: String,
    pub level: LogLevel,
    pub sinks: Vec<SinkConfig>,
    pub async_enabled: bool,
    pub include_host_context: bool,
    pub mask_sensitive: bool,
    pub context_defaults: BTreeMap<String, Value>,
}

impl LoggingConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: LogLevel::Info,
            sinks: vec![SinkConfig::Console],
            async_enabled: false,
            include_host_context: false,
            mask_sensitive: false,
            context_defaults: BTreeMap::new(),
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_sinks(mut self, sinks: Vec<SinkConfig>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_async_enabled(mut self, enabled: bool) -> Self {
        self.async_enabled = enabled;
        self
    }

    pub fn with_host_context(mut self, enabled: bool) -> Self {
        self.include_host_context = enabled;
        self
    }

    pub fn with_mask_sensitive(mut self, enabled: bool) -> Self {
        self.mask_sensitive = enabled;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_defaults.insert(key.into(), value);
        self
    }

    /// Preset for agent loggers: console + rotating file, async dispatch.
    pub fn agent(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_sinks(vec![
                SinkConfig::Console,
                SinkConfig::File(FileSinkConfig::default()),
            ])
            .with_async_enabled(true)
            .with_host_context(true)
            .with_mask_sensitive(true)
    }

    /// Preset for internal subsystem loggers: verbose, console + file.
    pub fn system(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_level(LogLevel::Debug)
            .with_sinks(vec![
                SinkConfig::Console,
                SinkConfig::File(FileSinkConfig::default()),
            ])
            .with_async_enabled(true)
            .with_host_context(true)
    }

    /// Preset for the well-known `"performance"` logger.
    pub fn performance() -> Self {
        Self::new("performance")
            .with_sinks(vec![
                SinkConfig::Console,
                SinkConfig::File(FileSinkConfig {
                    retention_days: 7,
                    ..FileSinkConfig::default()
                }),
            ])
            .with_context("category", Value::String("performance".to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        for sink in &self.sinks {
            sink.validate()?;
        }
        Ok(())
    }
}

/// Partial configuration applied on top of a resolved base. Every field is
/// optional; a set field replaces the base field wholly (shallow merge).
///
/// Overrides are typed on purpose: there is no way to smuggle an unknown
/// option through a string-keyed map here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<LogLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sinks: Option<Vec<SinkConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_host_context: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_sensitive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_defaults: Option<BTreeMap<String, Value>>,
}

impl ConfigOverrides {
    pub fn level(level: LogLevel) -> Self {
        Self {
            level: Some(level),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Canonical form used in cache keys. serde_json sorts map keys, so two
    /// equal override sets always produce the same string.
    pub fn fingerprint(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn apply(&self, mut base: LoggingConfig) -> LoggingConfig {
        if let Some(level) = self.level {
            base.level = level;
        }
        if let Some(sinks) = &self.sinks {
            base.sinks = sinks.clone();
        }
        if let Some(async_enabled) = self.async_enabled {
            base.async_enabled = async_enabled;
        }
        if let Some(include) = self.include_host_context {
            base.include_host_context = include;
        }
        if let Some(mask) = self.mask_sensitive {
            base.mask_sensitive = mask;
        }
        if let Some(context) = &self.context_defaults {
            base.context_defaults = context.clone();
        }
        base
    }
}

/// Named configuration store. Resolution never fails: unknown names fall
/// back to a built-in default because agents routinely invent ad-hoc logger
/// names at call sites.
#[derive(Default)]
pub struct ConfigRegistry {
    configs: DashMap<String, LoggingConfig>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a configuration by name, last write wins. Replacing an
    /// existing name is reported but not an error; handles already built
    /// from the old definition keep their original chains.
    pub fn register(&self, config: LoggingConfig) -> ConfigResult<()> {
        config.validate()?;
        let name = config.name.clone();
        if self.configs.insert(name.clone(), config).is_some() {
            warn!(target: "agentlog", config = %name, "configuration replaced");
        }
        Ok(())
    }

    /// Registers a configuration only if the name is still free. Used for
    /// the well-known presets so they never clobber a caller's definition.
    pub fn register_default(&self, config: LoggingConfig) {
        self.configs.entry(config.name.clone()).or_insert(config);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    /// Resolves the effective configuration for `name`, starting from the
    /// stored definition or the built-in default, then shallow-merging the
    /// overrides on top.
    pub fn resolve(&self, name: &str, overrides: Option<&ConfigOverrides>) -> LoggingConfig {
        let base = self
            .configs
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| LoggingConfig::new(name));
        match overrides {
            Some(overrides) => overrides.apply(base),
            None => base,
        }
    }
}

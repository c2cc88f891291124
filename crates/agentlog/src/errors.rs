use thiserror::Error;

/// Errors raised while registering or validating a logging configuration.
///
/// These are the only errors the façade ever returns to callers directly:
/// they come out of `ConfigRegistry::register` and the config validators,
/// never out of `get_logger` or the log methods themselves.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration name must not be empty")]
    EmptyName,

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Internal sink failures. Callers of the log methods never see these;
/// they are caught per sink, counted, and reported as self-diagnostics.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to construct {sink} sink: {reason}")]
    Construction { sink: &'static str, reason: String },

    #[error("dispatch to {sink} sink failed: {source}")]
    Dispatch {
        sink: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("flush did not complete within {timeout_ms}ms")]
    ShutdownTimeout { timeout_ms: u64 },
}

impl SinkError {
    pub fn construction(sink: &'static str, reason: impl Into<String>) -> Self {
        Self::Construction {
            sink,
            reason: reason.into(),
        }
    }

    pub fn dispatch(sink: &'static str, source: std::io::Error) -> Self {
        Self::Dispatch { sink, source }
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type SinkResult<T> = Result<T, SinkError>;

use std::time::Instant;

use serde_json::json;

use crate::config::LogLevel;
use crate::handle::LoggerHandle;

/// Measures wall-clock time around a block of work and reports it through
/// a logger. The timer never swallows the caller's own failure: `observe`
/// returns the closure's result unchanged, and a timer dropped during a
/// panic lets the panic keep unwinding.
pub struct PerformanceTimer;

impl PerformanceTimer {
    pub fn start(operation: impl Into<String>, logger: &LoggerHandle) -> ScopedTimer {
        ScopedTimer {
            operation: operation.into(),
            logger: logger.clone(),
            start: Instant::now(),
            done: false,
        }
    }

    /// Runs `f` under a timer. Emits one success record on `Ok` and one
    /// failure record on `Err`, then hands the result straight back.
    pub fn observe<T, E>(
        operation: impl Into<String>,
        logger: &LoggerHandle,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: std::fmt::Display,
    {
        let timer = Self::start(operation, logger);
        match f() {
            Ok(value) => {
                timer.finish();
                Ok(value)
            }
            Err(err) => {
                timer.fail_with(std::any::type_name::<E>(), &err.to_string());
                Err(err)
            }
        }
    }
}

/// Scope handle returned by [`PerformanceTimer::start`]. Reports success
/// when finished (or dropped normally) and failure when `fail` is called or
/// the scope unwinds from a panic.
pub struct ScopedTimer {
    operation: String,
    logger: LoggerHandle,
    start: Instant,
    done: bool,
}

impl ScopedTimer {
    /// Milliseconds elapsed so far, with sub-millisecond resolution.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn finish(mut self) {
        self.done = true;
        let duration_ms = display_ms(self.elapsed_ms());
        self.logger.log(
            LogLevel::Info,
            "operation completed",
            &[
                ("operation", json!(self.operation)),
                ("duration_ms", json!(duration_ms)),
                ("outcome", json!("success")),
            ],
        );
    }

    pub fn fail<E: std::fmt::Display>(self, error: &E) {
        let error_type = std::any::type_name::<E>();
        let message = error.to_string();
        self.fail_with(error_type, &message);
    }

    fn fail_with(mut self, error_type: &str, error_message: &str) {
        self.done = true;
        let duration_ms = display_ms(self.elapsed_ms());
        self.logger.log(
            LogLevel::Error,
            "operation failed",
            &[
                ("operation", json!(self.operation)),
                ("duration_ms", json!(duration_ms)),
                ("outcome", json!("failure")),
                ("error_type", json!(error_type)),
                ("error_message", json!(error_message)),
            ],
        );
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let duration_ms = display_ms(self.start.elapsed().as_secs_f64() * 1000.0);
        if std::thread::panicking() {
            self.logger.log(
                LogLevel::Error,
                "operation failed",
                &[
                    ("operation", json!(self.operation)),
                    ("duration_ms", json!(duration_ms)),
                    ("outcome", json!("failure")),
                    ("error_type", json!("panic")),
                ],
            );
        } else {
            self.logger.log(
                LogLevel::Info,
                "operation completed",
                &[
                    ("operation", json!(self.operation)),
                    ("duration_ms", json!(duration_ms)),
                    ("outcome", json!("success")),
                ],
            );
        }
    }
}

/// Rounds to microsecond precision for the emitted value; the internal
/// measurement keeps full resolution.
fn display_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

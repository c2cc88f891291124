//! Self-diagnostics: the façade reporting on its own failures, kept apart
//! from the application records it carries. Internally these go through
//! `tracing` so a host that already has a subscriber sees them in its own
//! pipeline; `init`/`init_json` install one for hosts that do not.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Installs a human-readable `tracing` subscriber for the process. Level
/// filtering follows `RUST_LOG` when set.
pub fn init() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);
    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// JSON variant of [`init`] for machine-read pipelines.
pub fn init_json() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = fmt::layer().json().with_target(true).with_thread_ids(true);
    let subscriber = Registry::default().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Rate-limited reporting of shed records. Producers bump the counter on
/// every drop; one summary line ("N records dropped in last T seconds") is
/// emitted per window instead of one line per drop.
pub struct DropReporter {
    window: Duration,
    state: Mutex<DropWindow>,
}

struct DropWindow {
    window_start: Instant,
    dropped: u64,
    reported: bool,
}

impl DropReporter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(DropWindow {
                window_start: Instant::now(),
                dropped: 0,
                reported: false,
            }),
        }
    }

    /// Records one dropped record. Returns the count to report if this drop
    /// crossed the reporting boundary, `None` while rate-limited.
    pub fn note_drop(&self) -> Option<u64> {
        let mut state = self.state.lock();
        let now = Instant::now();
        if now.duration_since(state.window_start) > self.window {
            state.window_start = now;
            state.dropped = 0;
            state.reported = false;
        }
        state.dropped += 1;
        if state.reported {
            return None;
        }
        state.reported = true;
        Some(state.dropped)
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    /// Count and report in one step, through `tracing`.
    pub fn drop_and_report(&self) {
        if let Some(count) = self.note_drop() {
            warn!(
                target: "agentlog",
                dropped = count,
                window_secs = self.window_secs(),
                "async queue full, records dropped"
            );
        }
    }
}

/// One-time warnings keyed by string, so a persistent failure (an
/// unwritable log directory, say) is reported once instead of on every
/// subsequent log call.
#[derive(Default)]
pub struct OnceWarnings {
    seen: Mutex<HashSet<String>>,
}

impl OnceWarnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `key` is seen.
    pub fn first_time(&self, key: &str) -> bool {
        self.seen.lock().insert(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reporter_reports_once_per_window() {
        let reporter = DropReporter::new(Duration::from_secs(60));
        assert_eq!(reporter.note_drop(), Some(1));
        for _ in 0..100 {
            assert_eq!(reporter.note_drop(), None);
        }
    }

    #[test]
    fn drop_reporter_resets_after_window() {
        let reporter = DropReporter::new(Duration::from_millis(10));
        assert_eq!(reporter.note_drop(), Some(1));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(reporter.note_drop(), Some(1));
    }

    #[test]
    fn once_warnings_fire_once_per_key() {
        let warnings = OnceWarnings::new();
        assert!(warnings.first_time("logs-dir"));
        assert!(!warnings.first_time("logs-dir"));
        assert!(warnings.first_time("other-dir"));
    }
}

use std::io::{self, Write};

use crate::errors::SinkResult;
use crate::record::LogRecord;
use crate::sinks::LogSink;

/// Best-effort sink writing formatted lines to stdout. Never reports a
/// failure: the console is the fallback of last resort, and a broken stdout
/// leaves nothing useful to report to.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl LogSink for ConsoleSink {
    fn name(&self) -> &'static str {
        "console"
    }

    fn emit(&self, record: &LogRecord) -> SinkResult<()> {
        let _ = writeln!(io::stdout(), "{}", record.to_console_line());
        Ok(())
    }

    fn flush(&self) -> SinkResult<()> {
        let _ = io::stdout().flush();
        Ok(())
    }

    fn close(&self) -> SinkResult<()> {
        self.flush()
    }
}

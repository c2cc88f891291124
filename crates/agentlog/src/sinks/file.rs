use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{FileSinkConfig, RotationPolicy};
use crate::errors::{SinkError, SinkResult};
use crate::record::LogRecord;
use crate::sinks::LogSink;

/// Timestamp section of log file names: `{stem}_{YYYYMMDD_HHMMSS}.log`.
const FILE_TS_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Line-oriented writer with rotation and eager retention pruning, shared
/// by the plain and encrypted file sinks. One writer owns one physical file
/// at a time; sharing a writer between chains is what prevents two handles
/// from rotating the same file against each other.
pub struct RotatingWriter {
    stem: String,
    dir: PathBuf,
    rotation: RotationPolicy,
    retention_days: u32,
    state: Mutex<WriterState>,
}

struct WriterState {
    file: Option<File>,
    path: PathBuf,
    written: u64,
    opened_day: NaiveDate,
    closed: bool,
}

impl RotatingWriter {
    pub fn new(logger_name: &str, config: &FileSinkConfig) -> SinkResult<Self> {
        let stem = sanitize_stem(logger_name);
        fs::create_dir_all(&config.dir).map_err(|err| {
            SinkError::construction(
                "file",
                format!("cannot create {}: {err}", config.dir.display()),
            )
        })?;
        let path = next_file_path(&config.dir, &stem);
        let file = open_append(&path)
            .map_err(|err| SinkError::construction("file", format!("cannot open log file: {err}")))?;
        debug!(target: "agentlog", path = %path.display(), "log file opened");
        Ok(Self {
            stem,
            dir: config.dir.clone(),
            rotation: config.rotation.clone(),
            retention_days: config.retention_days,
            state: Mutex::new(WriterState {
                file: Some(file),
                path,
                written: 0,
                opened_day: Local::now().date_naive(),
                closed: false,
            }),
        })
    }

    pub fn current_path(&self) -> PathBuf {
        self.state.lock().path.clone()
    }

    /// Appends one line, rotating first if the policy says so. Writes after
    /// `close` are silently discarded.
    pub fn write_line(&self, line: &str) -> SinkResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }

        let needs_rotation = match self.rotation {
            RotationPolicy::MaxSize(max) => {
                state.written > 0 && state.written + line.len() as u64 + 1 > max
            }
            RotationPolicy::Daily => state.opened_day != Local::now().date_naive(),
        };
        if needs_rotation {
            self.rotate(&mut state)?;
        }

        let file = state
            .file
            .as_mut()
            .ok_or_else(|| SinkError::construction("file", "file handle missing"))?;
        writeln!(file, "{line}").map_err(|err| SinkError::dispatch("file", err))?;
        state.written += line.len() as u64 + 1;
        Ok(())
    }

    fn rotate(&self, state: &mut WriterState) -> SinkResult<()> {
        if let Some(file) = state.file.as_mut() {
            let _ = file.flush();
        }
        state.file = None;

        // Retention runs eagerly on rotation, never lazily on emit.
        self.prune_old_files(&state.path);

        let path = next_file_path(&self.dir, &self.stem);
        let file =
            open_append(&path).map_err(|err| SinkError::dispatch("file", err))?;
        debug!(target: "agentlog", path = %path.display(), "log file rotated");
        state.file = Some(file);
        state.path = path;
        state.written = 0;
        state.opened_day = Local::now().date_naive();
        Ok(())
    }

    fn prune_old_files(&self, active: &Path) {
        let cutoff = Local::now().naive_local() - chrono::Duration::days(self.retention_days as i64);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target: "agentlog", error = %err, "retention scan failed");
                return;
            }
        };
        let prefix = format!("{}_", self.stem);
        for entry in entries.flatten() {
            let path = entry.path();
            if path == active {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !file_name.starts_with(&prefix) || !file_name.ends_with(".log") {
                continue;
            }
            if let Some(opened) = parse_file_timestamp(file_name, &prefix) {
                if opened < cutoff {
                    if let Err(err) = fs::remove_file(&path) {
                        warn!(target: "agentlog", path = %path.display(), error = %err, "retention delete failed");
                    }
                }
            }
        }
    }

    pub fn flush(&self) -> SinkResult<()> {
        let mut state = self.state.lock();
        if let Some(file) = state.file.as_mut() {
            file.flush().map_err(|err| SinkError::dispatch("file", err))?;
        }
        Ok(())
    }

    pub fn close(&self) -> SinkResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if let Some(mut file) = state.file.take() {
            let _ = file.flush();
        }
        state.closed = true;
        Ok(())
    }
}

fn sanitize_stem(logger_name: &str) -> String {
    logger_name.replace(['.', '/', '\\'], "_")
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `{stem}_{YYYYMMDD_HHMMSS}.log`, with a numeric suffix when rotation
/// lands twice inside the same second.
fn next_file_path(dir: &Path, stem: &str) -> PathBuf {
    let ts = Local::now().format(FILE_TS_FORMAT);
    let base = dir.join(format!("{stem}_{ts}.log"));
    if !base.exists() {
        return base;
    }
    for seq in 1.. {
        let candidate = dir.join(format!("{stem}_{ts}-{seq}.log"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// Extracts the timestamp a rotated file was opened at from its name.
fn parse_file_timestamp(file_name: &str, prefix: &str) -> Option<NaiveDateTime> {
    let rest = file_name.strip_prefix(prefix)?.strip_suffix(".log")?;
    let ts = rest.split('-').next()?;
    NaiveDateTime::parse_from_str(ts, FILE_TS_FORMAT).ok()
}

/// Rotating JSON-lines file sink.
pub struct FileSink {
    writer: RotatingWriter,
}

impl FileSink {
    pub fn new(logger_name: &str, config: &FileSinkConfig) -> SinkResult<Self> {
        Ok(Self {
            writer: RotatingWriter::new(logger_name, config)?,
        })
    }

    pub fn current_path(&self) -> PathBuf {
        self.writer.current_path()
    }
}

impl LogSink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    fn emit(&self, record: &LogRecord) -> SinkResult<()> {
        let line = record.to_json_line()?;
        self.writer.write_line(&line)
    }

    fn flush(&self) -> SinkResult<()> {
        self.writer.flush()
    }

    fn close(&self) -> SinkResult<()> {
        self.writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::collections::BTreeMap;

    fn record(message: &str) -> LogRecord {
        LogRecord::new("svc", LogLevel::Info, message, &BTreeMap::new(), &[])
    }

    #[test]
    fn writes_json_lines_to_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(
            "agent.svc",
            &FileSinkConfig {
                dir: dir.path().to_path_buf(),
                ..FileSinkConfig::default()
            },
        )
        .unwrap();

        sink.emit(&record("one")).unwrap();
        sink.emit(&record("two")).unwrap();
        sink.close().unwrap();

        let path = sink.current_path();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("agent_svc_"), "got {name}");
        assert!(name.ends_with(".log"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"message\":\"one\""));
    }

    #[test]
    fn size_rotation_starts_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(
            "svc",
            &FileSinkConfig {
                dir: dir.path().to_path_buf(),
                rotation: RotationPolicy::MaxSize(256),
                retention_days: 30,
            },
        )
        .unwrap();

        let first = sink.current_path();
        for i in 0..10 {
            sink.emit(&record(&format!("padding message number {i}")))
                .unwrap();
        }
        sink.close().unwrap();

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert!(files.len() >= 2, "expected rotation, got {}", files.len());
        // The original file was left in place, not truncated.
        assert!(first.exists());
    }

    #[test]
    fn emits_after_close_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(
            "svc",
            &FileSinkConfig {
                dir: dir.path().to_path_buf(),
                ..FileSinkConfig::default()
            },
        )
        .unwrap();
        let path = sink.current_path();

        sink.emit(&record("kept")).unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        sink.emit(&record("lost")).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains("kept"));
        assert!(!content.contains("lost"));
    }

    #[test]
    fn unwritable_directory_is_a_construction_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocked = dir.path().join("blocked");
        fs::write(&blocked, b"not a directory").unwrap();

        let result = FileSink::new(
            "svc",
            &FileSinkConfig {
                dir: blocked.join("logs"),
                ..FileSinkConfig::default()
            },
        );
        assert!(matches!(
            result,
            Err(SinkError::Construction { sink: "file", .. })
        ));
    }

    #[test]
    fn timestamp_parsing_matches_generated_names() {
        let parsed = parse_file_timestamp("svc_20250101_120000.log", "svc_");
        assert!(parsed.is_some());
        let parsed_seq = parse_file_timestamp("svc_20250101_120000-2.log", "svc_");
        assert_eq!(parsed, parsed_seq);
        assert!(parse_file_timestamp("svc_garbage.log", "svc_").is_none());
    }
}

//! Structured JSONL logging for challenge runs and trace replays.
//!
//! [`LogEmitter`] writes one [`LogEntry`] per line; heap lifecycle records are
//! lifted into the same stream. [`check_line`] and [`check_log_file`] hold a
//! log to the schema the emitter writes.

use std::io::Write;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use segheap_core::{HeapLogLevel, HeapLogRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<HeapLogLevel> for LogLevel {
    fn from(level: HeapLogLevel) -> Self {
        match level {
            HeapLogLevel::Trace => Self::Trace,
            HeapLogLevel::Debug => Self::Debug,
            HeapLogLevel::Info => Self::Info,
            HeapLogLevel::Warn => Self::Warn,
            HeapLogLevel::Error => Self::Error,
        }
    }
}

/// Run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    /// Challenge or trace name the entry belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    /// Coalescing policy of the heap under test.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp_now(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            challenge: None,
            policy: None,
            outcome: None,
            latency_ns: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_latency_ns(mut self, ns: u64) -> Self {
        self.latency_ns = Some(ns);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<&HeapLogRecord> for LogEntry {
    /// Lifts a heap lifecycle record into the JSONL stream, keeping its trace id.
    fn from(record: &HeapLogRecord) -> Self {
        let details = serde_json::json!({
            "decision_id": record.decision_id,
            "symbol": record.symbol,
            "outcome": record.outcome,
            "ptr": record.ptr,
            "size": record.size,
            "bin": record.bin,
            "details": record.details,
            "counters": record.counters,
        });
        LogEntry::new(record.trace_id.clone(), record.level.into(), record.event)
            .with_details(details)
    }
}

/// Writes structured JSONL log entries to a file, stdout or memory.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(std::io::BufWriter::new(file), run_id))
    }

    /// Create an emitter that writes to stdout.
    #[must_use]
    pub fn to_stdout(run_id: &str) -> Self {
        Self::to_writer(std::io::stdout(), run_id)
    }

    /// Create an emitter over any writer.
    pub fn to_writer(writer: impl Write + 'static, run_id: &str) -> Self {
        Self {
            writer: Box::new(writer),
            seq: 0,
            run_id: run_id.to_string(),
        }
    }

    /// Generate the next trace ID.
    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("segheap-harness::{}::{:03}", self.run_id, self.seq)
    }

    /// Entries written so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.seq
    }

    /// Emit a log entry with an auto-generated trace_id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(trace_id, level, event);
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a fully-populated log entry. An empty trace id is filled in.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        } else {
            self.seq += 1;
        }
        self.write_line(&entry)
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Why a JSONL line failed the schema check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogLineError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("line {line}: missing `{field}`")]
    Missing { line: usize, field: &'static str },

    #[error("line {line}: `{field}` has unexpected value {value:?}")]
    BadValue {
        line: usize,
        field: &'static str,
        value: String,
    },
}

impl LogLineError {
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            Self::Malformed { line, .. } | Self::Missing { line, .. } | Self::BadValue { line, .. } => {
                *line
            }
        }
    }

    /// Offending field, if the failure is tied to one.
    #[must_use]
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Malformed { .. } => None,
            Self::Missing { field, .. } | Self::BadValue { field, .. } => Some(*field),
        }
    }
}

const REQUIRED: [&str; 4] = ["timestamp", "trace_id", "level", "event"];

/// String fields with a closed set of values.
const VOCABULARY: [(&str, &[&str]); 3] = [
    ("level", &["trace", "debug", "info", "warn", "error"]),
    ("outcome", &["pass", "fail", "error"]),
    ("policy", &["immediate", "never"]),
];

/// Checks one JSONL line and parses it into a [`LogEntry`].
///
/// Every schema problem on the line is reported, not just the first.
pub fn check_line(text: &str, line: usize) -> Result<LogEntry, Vec<LogLineError>> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| {
        vec![LogLineError::Malformed {
            line,
            reason: format!("invalid JSON: {e}"),
        }]
    })?;
    let Some(fields) = value.as_object() else {
        return Err(vec![LogLineError::Malformed {
            line,
            reason: "top level is not an object".to_string(),
        }]);
    };

    let mut errors: Vec<LogLineError> = REQUIRED
        .into_iter()
        .filter(|field| !fields.contains_key(*field))
        .map(|field| LogLineError::Missing { line, field })
        .collect();
    for (field, allowed) in VOCABULARY {
        if let Some(found) = fields.get(field).and_then(serde_json::Value::as_str)
            && !allowed.contains(&found)
        {
            errors.push(LogLineError::BadValue {
                line,
                field,
                value: found.to_string(),
            });
        }
    }
    // Trace ids are `::`-scoped: `segheap::...` from the heap, `segheap-harness::...` from runs.
    if let Some(trace_id) = fields.get("trace_id").and_then(serde_json::Value::as_str)
        && !trace_id.contains("::")
    {
        errors.push(LogLineError::BadValue {
            line,
            field: "trace_id",
            value: trace_id.to_string(),
        });
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value(value).map_err(|e| {
        vec![LogLineError::Malformed {
            line,
            reason: e.to_string(),
        }]
    })
}

/// Result of checking a whole log file.
#[derive(Debug, Default)]
pub struct LogCheck {
    /// Non-blank lines seen.
    pub lines: usize,
    pub errors: Vec<LogLineError>,
}

impl LogCheck {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks every non-blank line of a JSONL file.
pub fn check_log_file(path: &Path) -> std::io::Result<LogCheck> {
    let text = std::fs::read_to_string(path)?;
    let mut check = LogCheck::default();
    for (i, raw) in text.lines().enumerate() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        check.lines += 1;
        if let Err(errors) = check_line(raw, i + 1) {
            check.errors.extend(errors);
        }
    }
    Ok(check)
}

fn timestamp_now() -> String {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    rfc3339(since_epoch)
}

/// UTC RFC 3339 timestamp with millisecond precision.
fn rfc3339(since_epoch: Duration) -> String {
    let secs = since_epoch.as_secs();
    let (year, month, day) = civil_from_days(secs / 86_400);
    let time = secs % 86_400;
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        time / 3600,
        time % 3600 / 60,
        time % 60,
        since_epoch.subsec_millis()
    )
}

/// Gregorian `(year, month, day)` of a day count since 1970-01-01.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    // Count from 0000-03-01 so the leap day ends each 400-year era.
    let shifted = days + 719_468;
    let era = shifted / 146_097;
    let day_of_era = shifted % 146_097;
    let year_of_era =
        (day_of_era - day_of_era / 1460 + day_of_era / 36_524 - day_of_era / 146_096) / 365;
    let day_of_year = day_of_era - (365 * year_of_era + year_of_era / 4 - year_of_era / 100);
    let month_index = (5 * day_of_year + 2) / 153;
    let day = day_of_year - (153 * month_index + 2) / 5 + 1;
    let month = if month_index < 10 {
        month_index + 3
    } else {
        month_index - 9
    };
    (era * 400 + year_of_era + u64::from(month <= 2), month, day)
}

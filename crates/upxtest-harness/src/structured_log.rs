//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required + optional fields.
//! - [`ArtifactIndex`]: links a run to emitted files with SHA-256 integrity.
//! - [`LogEmitter`]: writes JSONL lines to a file, a caller-supplied writer,
//!   or nowhere.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Error,
}

/// Verification outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

/// One structured log record.
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
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
    /// Run path label (`upx_test_01_exe`, `upx_test_01_dll`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Resolved entry symbol for the alternate path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Worker schedule (`free` | `lockstep`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<i32>,
    /// `0x` followed by eight lowercase hex digits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_label: None,
            path: None,
            symbol: None,
            schedule: None,
            input: None,
            fingerprint: None,
            outcome: None,
            exit_code: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_run_label(mut self, label: impl Into<String>) -> Self {
        self.run_label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    #[must_use]
    pub fn with_input(mut self, input: i32) -> Self {
        self.input = Some(input);
        self
    }

    /// Set the fingerprint, rendered as `0x%08x`.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: u32) -> Self {
        self.fingerprint = Some(format!("0x{fingerprint:08x}"));
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
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

// ---------------------------------------------------------------------------
// Artifact index
// ---------------------------------------------------------------------------

/// A single artifact entry in the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Index of the files produced by one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub run_label: String,
    pub generated_utc: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>, run_label: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            run_label: run_label.into(),
            generated_utc: now_utc(),
            artifacts: Vec::new(),
        }
    }

    /// Add an artifact entry with no size or description.
    pub fn add(
        &mut self,
        path: impl Into<String>,
        kind: impl Into<String>,
        sha256: impl Into<String>,
    ) -> &mut Self {
        self.push(ArtifactEntry {
            path: path.into(),
            kind: kind.into(),
            sha256: sha256.into(),
            size_bytes: None,
            description: None,
        })
    }

    pub fn push(&mut self, entry: ArtifactEntry) -> &mut Self {
        self.artifacts.push(entry);
        self
    }

    #[must_use]
    pub fn find(&self, path: &str) -> Option<&ArtifactEntry> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries.
pub struct LogEmitter {
    writer: Option<Box<dyn Write>>,
    seq: u64,
    run_label: String,
    run_id: String,
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("enabled", &self.writer.is_some())
            .field("seq", &self.seq)
            .field("run_label", &self.run_label)
            .field("run_id", &self.run_id)
            .finish()
    }
}

impl LogEmitter {
    /// Create an emitter that writes to a file (truncating it).
    pub fn to_file(path: &Path, run_label: &str, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(
            std::io::BufWriter::new(file),
            run_label,
            run_id,
        ))
    }

    #[must_use]
    pub fn to_writer(writer: impl Write + 'static, run_label: &str, run_id: &str) -> Self {
        Self {
            writer: Some(Box::new(writer)),
            seq: 0,
            run_label: run_label.to_string(),
            run_id: run_id.to_string(),
        }
    }

    /// An emitter that drops everything. Trace ids still advance.
    #[must_use]
    pub fn disabled(run_label: &str, run_id: &str) -> Self {
        Self {
            writer: None,
            seq: 0,
            run_label: run_label.to_string(),
            run_id: run_id.to_string(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.run_label, self.run_id, self.seq)
    }

    /// A fresh entry carrying the next trace id and this emitter's run label.
    pub fn entry(&mut self, level: LogLevel, event: &str) -> LogEntry {
        let trace_id = self.next_trace_id();
        LogEntry::new(trace_id, level, event).with_run_label(&self.run_label)
    }

    /// Emit a bare entry with auto-generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let entry = self.entry(level, event);
        self.write_line(&entry)?;
        Ok(entry)
    }

    /// Emit a fully populated entry. Fills in trace id and run label when
    /// missing.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_label.is_none() {
            entry.run_label = Some(self.run_label.clone());
        }
        self.write_line(&entry)
    }

    fn write_line(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(writer, "{line}")
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}: {}", self.line_number, self.field, self.message)
    }
}

const REQUIRED_FIELDS: [&str; 4] = ["timestamp", "trace_id", "level", "event"];

fn is_fingerprint_hex(s: &str) -> bool {
    s.strip_prefix("0x").is_some_and(|digits| {
        digits.len() == 8
            && digits
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    })
}

/// Validate a single JSONL line against the log schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let error = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Err(vec![error("<json>", format!("invalid JSON: {e}"))]);
        }
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![error("<root>", "expected JSON object".to_string())]);
    };

    for field in REQUIRED_FIELDS {
        match obj.get(field) {
            None => errors.push(error(field, "required field missing".to_string())),
            Some(v) if !v.is_string() => {
                errors.push(error(field, "expected string".to_string()));
            }
            Some(_) => {}
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["info", "error"].contains(&level)
    {
        errors.push(error("level", format!("invalid level: '{level}'")));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail"].contains(&outcome)
    {
        errors.push(error("outcome", format!("invalid outcome: '{outcome}'")));
    }

    if let Some(schedule) = obj.get("schedule").and_then(|v| v.as_str())
        && !["free", "lockstep"].contains(&schedule)
    {
        errors.push(error("schedule", format!("invalid schedule: '{schedule}'")));
    }

    if let Some(fingerprint) = obj.get("fingerprint").and_then(|v| v.as_str())
        && !is_fingerprint_hex(fingerprint)
    {
        errors.push(error(
            "fingerprint",
            format!("expected 0x followed by 8 lowercase hex digits, got: '{fingerprint}'"),
        ));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").count() != 3
    {
        errors.push(error(
            "trace_id",
            format!("trace_id should follow <run_label>::<run_id>::<seq> format, got: '{trace_id}'"),
        ));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value)
        .map_err(|e| vec![error("<deserialization>", format!("failed to deserialize: {e}"))])
}

/// Validate an entire JSONL file. Returns the non-empty line count and every
/// validation error found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current UTC time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
pub(crate) fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(duration.as_secs(), duration.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = secs / 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
    )
}

/// Proleptic Gregorian date for a count of days since 1970-01-01.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("upx-test01::run-1::001", LogLevel::Info, "run_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "upx-test01::run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "run_start");
        assert!(parsed.get("run_label").is_none());
        assert!(parsed.get("fingerprint").is_none());
    }

    #[test]
    fn log_entry_with_optional_fields() {
        let entry = LogEntry::new("upx-test01::run-1::002", LogLevel::Error, "fingerprint")
            .with_run_label("upx-test01")
            .with_path("upx_test_01_dlopen")
            .with_symbol("_Z10test01_dlli")
            .with_schedule("lockstep")
            .with_input(1_000_000)
            .with_fingerprint(0x95b7_c9b7)
            .with_outcome(Outcome::Fail)
            .with_exit_code(1)
            .with_duration_ms(3)
            .with_artifacts(vec!["data01.h".to_string()])
            .with_details(serde_json::json!({"alternate": "0x00000001"}));

        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["path"], "upx_test_01_dlopen");
        assert_eq!(parsed["symbol"], "_Z10test01_dlli");
        assert_eq!(parsed["schedule"], "lockstep");
        assert_eq!(parsed["input"], 1_000_000);
        assert_eq!(parsed["fingerprint"], "0x95b7c9b7");
        assert_eq!(parsed["outcome"], "fail");
        assert_eq!(parsed["exit_code"], 1);
        assert_eq!(parsed["artifact_refs"][0], "data01.h");
        assert_eq!(parsed["details"]["alternate"], "0x00000001");
        assert!(validate_log_line(&json, 1).is_ok());
    }

    #[test]
    fn fingerprint_is_zero_padded() {
        let entry = LogEntry::new("a::b::001", LogLevel::Info, "fingerprint").with_fingerprint(1);
        assert_eq!(entry.fingerprint.as_deref(), Some("0x00000001"));
    }

    #[test]
    fn validation_rejects_missing_required_fields() {
        let errs = validate_log_line(r#"{"timestamp":"t","level":"info"}"#, 7).unwrap_err();
        let fields: Vec<_> = errs.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"trace_id"));
        assert!(fields.contains(&"event"));
        assert!(errs.iter().all(|e| e.line_number == 7));
    }

    #[test]
    fn validation_rejects_bad_enums_and_formats() {
        let line = r#"{"timestamp":"t","trace_id":"nocolons","level":"loud","event":"e","schedule":"chaos","fingerprint":"0xABCDEF01"}"#;
        let errs = validate_log_line(line, 1).unwrap_err();
        let fields: Vec<_> = errs.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"trace_id"));
        assert!(fields.contains(&"level"));
        assert!(fields.contains(&"schedule"));
        assert!(fields.contains(&"fingerprint"));
    }

    #[test]
    fn validation_accepts_only_emitted_levels_and_outcomes() {
        let line = |level: &str, outcome: &str| {
            format!(
                r#"{{"timestamp":"t","trace_id":"a::b::001","level":"{level}","event":"e","outcome":"{outcome}"}}"#
            )
        };
        assert!(validate_log_line(&line("info", "pass"), 1).is_ok());
        assert!(validate_log_line(&line("error", "fail"), 1).is_ok());
        let errs = validate_log_line(&line("warn", "skip"), 1).unwrap_err();
        let fields: Vec<_> = errs.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, ["level", "outcome"]);
        assert!(serde_json::from_str::<LogLevel>(r#""debug""#).is_err());
    }

    #[test]
    fn validation_rejects_non_objects() {
        assert_eq!(validate_log_line("[1,2]", 1).unwrap_err()[0].field, "<root>");
        assert_eq!(validate_log_line("{", 1).unwrap_err()[0].field, "<json>");
    }

    #[test]
    fn disabled_emitter_still_sequences() {
        let mut emitter = LogEmitter::disabled("upx-test01", "r");
        assert!(!emitter.is_enabled());
        let first = emitter.emit(LogLevel::Info, "a").unwrap();
        let second = emitter.emit(LogLevel::Info, "b").unwrap();
        assert_eq!(first.trace_id, "upx-test01::r::001");
        assert_eq!(second.trace_id, "upx-test01::r::002");
        assert_eq!(second.run_label.as_deref(), Some("upx-test01"));
        emitter.flush().unwrap();
    }

    #[test]
    fn emit_entry_fills_missing_trace_id() {
        let mut emitter = LogEmitter::disabled("lbl", "run");
        emitter
            .emit_entry(LogEntry::new("", LogLevel::Info, "x"))
            .unwrap();
        assert_eq!(emitter.next_trace_id(), "lbl::run::002");
    }

    #[test]
    fn artifact_index_finds_entries() {
        let mut index = ArtifactIndex::new("run-1", "upx-test01");
        index.add("data01.h", "seed_table", "ab").add("data02.h", "seed_table", "cd");
        assert_eq!(index.index_version, 1);
        assert_eq!(index.find("data02.h").map(|a| a.sha256.as_str()), Some("cd"));
        assert!(index.find("data04.h").is_none());
        let json = index.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["artifacts"].as_array().map(Vec::len), Some(2));
        assert!(parsed["artifacts"][0].get("size_bytes").is_none());
    }

    #[test]
    fn utc_formatting_is_calendar_exact() {
        assert_eq!(format_utc(0, 0), "1970-01-01T00:00:00.000Z");
        // 2000-02-29T12:34:56
        assert_eq!(format_utc(951_827_696, 7), "2000-02-29T12:34:56.007Z");
        // 2024-12-31T23:59:59
        assert_eq!(format_utc(1_735_689_599, 999), "2024-12-31T23:59:59.999Z");
    }
}

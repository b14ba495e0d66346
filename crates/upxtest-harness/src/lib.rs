//! Command-line harness for the storage-class checksum.
//!
//! This crate provides:
//! - Run paths: the direct image, the statically linked alternate, and an
//!   alternate loaded from a shared object ([`runner`]).
//! - Seed table export as C headers with an integrity index ([`emit`]).
//! - Structured JSONL logging for every run ([`structured_log`]).
//!
//! `unsafe_code` is forbidden for every target of this crate through
//! `[lints.rust]` in its manifest; the loader's unsafe calls live in
//! `upxtest-abi`.

pub mod emit;
pub mod runner;
pub mod structured_log;

pub use runner::{RunError, RunOutcome, RunPath, Runner, Test01Entry};
pub use structured_log::{LogEmitter, LogEntry, LogLevel};

/// Run label used in trace ids and artifact indexes.
pub const RUN_LABEL: &str = "upx-test01";

/// Environment variable naming the default JSONL log path.
pub const LOG_ENV: &str = "UPXTEST_LOG";

/// Run id when none is given: `<pid>-<unix seconds>`.
#[must_use]
pub fn default_run_id() -> String {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("{}-{secs}", std::process::id())
}

//! Integration tests: structured log emission through the runner.
//!
//! Run: cargo test -p upxtest-harness --test structured_log_test

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use upxtest_core::{HarnessConfig, Schedule, process};
use upxtest_harness::runner::{DirectEntry, Runner, StaticEntry, Test01Entry};
use upxtest_harness::structured_log::{LogEmitter, LogLevel, validate_log_file, validate_log_line};

fn unique_tmp_file(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}-{}-{nanos}.jsonl", std::process::id()))
}

#[test]
fn emitter_writes_sequenced_jsonl_to_file() {
    let path = unique_tmp_file("upxtest-log-emitter");
    {
        let mut emitter = LogEmitter::to_file(&path, "upx-test01", "file").expect("create log");
        emitter.emit(LogLevel::Info, "run_start").expect("emit");
        let entry = emitter
            .entry(LogLevel::Error, "fingerprint")
            .with_path("upx_test_01_exe")
            .with_fingerprint(0xf02b_e51f);
        emitter.emit_entry(entry).expect("emit entry");
        emitter.flush().expect("flush");
    }

    let content = std::fs::read_to_string(&path).expect("read log");
    let entries: Vec<_> = content
        .lines()
        .enumerate()
        .map(|(i, line)| validate_log_line(line, i + 1).expect("valid line"))
        .collect();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].trace_id, "upx-test01::file::001");
    assert_eq!(entries[1].trace_id, "upx-test01::file::002");
    assert_eq!(entries[1].fingerprint.as_deref(), Some("0xf02be51f"));
    assert_eq!(entries[1].level, LogLevel::Error);
}

#[test]
fn runner_log_records_every_path() {
    process::initialize();
    let path = unique_tmp_file("upxtest-log-runner");
    let config = HarnessConfig::default().with_schedule(Schedule::Lockstep);
    {
        let mut log = LogEmitter::to_file(&path, "upx-test01", "runner").expect("create log");
        let mut out = Vec::new();
        let alternate = StaticEntry::new(config);
        let outcome = Runner::new(0, config, &mut log)
            .run(
                &DirectEntry::new(config),
                Some(&alternate as &dyn Test01Entry),
                &mut out,
            )
            .expect("run");
        assert_eq!(outcome.fingerprint, 0x95b7_c9b7);
    }

    let (count, errors) = validate_log_file(&path).expect("read log");
    assert!(errors.is_empty(), "schema errors: {errors:?}");
    assert_eq!(count, 4);

    let content = std::fs::read_to_string(&path).expect("read log");
    let events: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).expect("json"))
        .collect();
    assert_eq!(events[0]["event"], "run_start");
    assert_eq!(events[0]["schedule"], "lockstep");
    assert_eq!(events[1]["path"], "upx_test_01_exe");
    assert_eq!(events[2]["path"], "upx_test_01_dll");
    assert_eq!(events[3]["outcome"], "pass");
    assert!(events.iter().all(|e| e["input"] == 0));
}

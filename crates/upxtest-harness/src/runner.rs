//! Run-path execution engine.
//!
//! A run always computes the direct fingerprint first, then at most one
//! alternate (statically linked or loaded from a shared object), printing one
//! `label = 0x%08x` line per path as it goes. The run fails if the direct
//! fingerprint is zero or the alternate disagrees with it.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use thiserror::Error;
use upxtest_abi::{AlternateImplementation, LoadError};
use upxtest_core::{
    ConcurrencyHarness, HarnessConfig, HarnessError, Schedule, SeedTables, process,
};

use crate::emit::EmitError;
use crate::structured_log::{LogEmitter, LogLevel, Outcome};

/// Worker that receives divergent seeds when a mismatch is injected.
pub const DIVERGENT_WORKER: usize = 1;

/// Which implementation produced a fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPath {
    /// The harness image linked into this executable.
    Direct,
    /// The alternate implementation linked in statically.
    Static,
    /// The alternate implementation resolved through the dynamic loader.
    Dlopen,
}

impl RunPath {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Direct => "upx_test_01_exe",
            Self::Static => "upx_test_01_dll",
            Self::Dlopen => "upx_test_01_dlopen",
        }
    }

    /// The line printed for this path, e.g. `upx_test_01_exe    = 0x95b7c9b7`.
    #[must_use]
    pub fn fingerprint_line(self, fingerprint: u32) -> String {
        format!("{:<18} = 0x{fingerprint:08x}", self.label())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Harness(#[from] HarnessError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("{} returned a zero fingerprint", .path.label())]
    ZeroFingerprint { path: RunPath },
    #[error(
        "fingerprint mismatch: upx_test_01_exe = 0x{direct:08x}, {} = 0x{alternate:08x}",
        .alternate_path.label()
    )]
    Mismatch {
        alternate_path: RunPath,
        direct: u32,
        alternate: u32,
    },
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// Process exit status for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        1
    }
}

/// Something that can produce a `test01` fingerprint.
pub trait Test01Entry {
    fn path(&self) -> RunPath;

    /// Symbol the entry resolved, for loaded implementations.
    fn symbol(&self) -> Option<&str> {
        None
    }

    fn invoke(&self, input: i32) -> Result<u32, RunError>;
}

/// The process image of this executable.
#[derive(Debug, Clone)]
pub struct DirectEntry {
    config: HarnessConfig,
    divergent_seeds: Option<SeedTables>,
}

impl DirectEntry {
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            divergent_seeds: None,
        }
    }

    /// Seed [`DIVERGENT_WORKER`]'s thread-duration buffers from `seeds`.
    #[must_use]
    pub fn with_divergent_worker(mut self, seeds: SeedTables) -> Self {
        self.divergent_seeds = Some(seeds);
        self
    }
}

impl Test01Entry for DirectEntry {
    fn path(&self) -> RunPath {
        RunPath::Direct
    }

    fn invoke(&self, input: i32) -> Result<u32, RunError> {
        let verification = match &self.divergent_seeds {
            Some(seeds) => ConcurrencyHarness::new(process::image()?)
                .with_config(self.config)
                .with_worker_seeds(DIVERGENT_WORKER, seeds.clone())
                .verify(input)?,
            None => process::verify_with(self.config, input)?,
        };
        Ok(verification.fingerprint)
    }
}

/// The alternate implementation linked into this executable.
#[derive(Debug, Clone, Copy)]
pub struct StaticEntry {
    config: HarnessConfig,
}

impl StaticEntry {
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        Self { config }
    }
}

impl Test01Entry for StaticEntry {
    fn path(&self) -> RunPath {
        RunPath::Static
    }

    fn invoke(&self, input: i32) -> Result<u32, RunError> {
        Ok(upxtest_abi::test01_with(self.config, input)?)
    }
}

/// An alternate implementation resolved from a shared object. It carries its
/// own harness: an explicit `schedule` is pushed through the library's
/// schedule hook, otherwise the library reads `UPXTEST_SCHEDULE` itself.
#[derive(Debug)]
pub struct DynamicEntry {
    implementation: AlternateImplementation,
}

impl DynamicEntry {
    pub fn load(path: &Path, symbol: &str, schedule: Option<Schedule>) -> Result<Self, RunError> {
        let implementation = AlternateImplementation::load(path, symbol)?;
        if let Some(schedule) = schedule {
            implementation.set_schedule(schedule)?;
        }
        Ok(Self { implementation })
    }
}

impl Test01Entry for DynamicEntry {
    fn path(&self) -> RunPath {
        RunPath::Dlopen
    }

    fn symbol(&self) -> Option<&str> {
        Some(self.implementation.symbol())
    }

    fn invoke(&self, input: i32) -> Result<u32, RunError> {
        Ok(self.implementation.call(input))
    }
}

/// One path's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathResult {
    pub path: RunPath,
    pub fingerprint: u32,
}

/// A verified run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub input: i32,
    pub fingerprint: u32,
    pub results: Vec<PathResult>,
}

/// Check the collected fingerprints: direct first, then any alternate.
pub fn check_fingerprints(direct: u32, alternate: Option<PathResult>) -> Result<u32, RunError> {
    if direct == 0 {
        return Err(RunError::ZeroFingerprint {
            path: RunPath::Direct,
        });
    }
    match alternate {
        Some(alt) if alt.fingerprint != direct => Err(RunError::Mismatch {
            alternate_path: alt.path,
            direct,
            alternate: alt.fingerprint,
        }),
        _ => Ok(direct),
    }
}

/// Runs the direct path and an optional alternate, logging each step.
#[derive(Debug)]
pub struct Runner<'a> {
    input: i32,
    config: HarnessConfig,
    log: &'a mut LogEmitter,
}

impl<'a> Runner<'a> {
    #[must_use]
    pub fn new(input: i32, config: HarnessConfig, log: &'a mut LogEmitter) -> Self {
        Self { input, config, log }
    }

    /// Run `direct`, then `alternate`, writing one fingerprint line per path
    /// to `out`.
    pub fn run(
        &mut self,
        direct: &dyn Test01Entry,
        alternate: Option<&dyn Test01Entry>,
        out: &mut dyn Write,
    ) -> Result<RunOutcome, RunError> {
        let start = Instant::now();
        let entry = self
            .log
            .entry(LogLevel::Info, "run_start")
            .with_input(self.input)
            .with_schedule(self.config.schedule.as_str());
        self.log.emit_entry(entry)?;

        let result = self.run_paths(direct, alternate, out);
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let entry = match &result {
            Ok(outcome) => self
                .log
                .entry(LogLevel::Info, "verification_result")
                .with_fingerprint(outcome.fingerprint)
                .with_outcome(Outcome::Pass)
                .with_exit_code(0),
            Err(err) => self
                .log
                .entry(LogLevel::Error, "verification_result")
                .with_outcome(Outcome::Fail)
                .with_exit_code(i32::from(err.exit_code()))
                .with_details(serde_json::json!({ "error": err.to_string() })),
        };
        self.log
            .emit_entry(entry.with_input(self.input).with_duration_ms(duration_ms))?;
        self.log.flush()?;
        result
    }

    fn run_paths(
        &mut self,
        direct: &dyn Test01Entry,
        alternate: Option<&dyn Test01Entry>,
        out: &mut dyn Write,
    ) -> Result<RunOutcome, RunError> {
        let mut results = Vec::with_capacity(2);
        let direct_fp = self.run_one(direct, out)?;
        results.push(PathResult {
            path: direct.path(),
            fingerprint: direct_fp,
        });

        let mut alternate_result = None;
        if let Some(entry) = alternate {
            let fingerprint = self.run_one(entry, out)?;
            let result = PathResult {
                path: entry.path(),
                fingerprint,
            };
            results.push(result);
            alternate_result = Some(result);
        }

        let fingerprint = check_fingerprints(direct_fp, alternate_result)?;
        Ok(RunOutcome {
            input: self.input,
            fingerprint,
            results,
        })
    }

    fn run_one(&mut self, entry: &dyn Test01Entry, out: &mut dyn Write) -> Result<u32, RunError> {
        let path = entry.path();
        let start = Instant::now();
        let fingerprint = entry.invoke(self.input)?;
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        writeln!(out, "{}", path.fingerprint_line(fingerprint))?;

        let mut log_entry = self
            .log
            .entry(LogLevel::Info, "fingerprint")
            .with_path(path.label())
            .with_input(self.input)
            .with_fingerprint(fingerprint)
            .with_duration_ms(duration_ms);
        if let Some(symbol) = entry.symbol() {
            log_entry = log_entry.with_symbol(symbol);
        }
        self.log.emit_entry(log_entry)?;
        Ok(fingerprint)
    }
}

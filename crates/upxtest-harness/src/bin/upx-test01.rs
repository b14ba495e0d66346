//! CLI entrypoint for the storage-class checksum harness.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use upxtest_abi::{DLL_SYMBOL, MANGLED_SYMBOL};
use upxtest_core::{HarnessConfig, Schedule, SeedGenerator, SeedTables, process};
use upxtest_harness::runner::{DirectEntry, DynamicEntry, RunError, Runner, StaticEntry, Test01Entry};
use upxtest_harness::structured_log::LogLevel;
use upxtest_harness::{LOG_ENV, LogEmitter, RUN_LABEL, default_run_id, emit};

/// Storage-class checksum for packed and relinked binaries.
#[derive(Debug, Parser)]
#[command(name = "upx-test01")]
#[command(about = "Storage-class checksum harness for packed binaries")]
struct Cli {
    /// Input scalar. Defaults to the process argument count.
    #[arg(long, allow_negative_numbers = true)]
    input: Option<i32>,
    /// Compare against the statically linked alternate implementation.
    #[arg(long, conflicts_with = "alternate")]
    static_alternate: bool,
    /// Shared object exporting the alternate implementation.
    #[arg(long)]
    alternate: Option<PathBuf>,
    /// Symbol to resolve in the alternate shared object.
    #[arg(long, default_value = DLL_SYMBOL)]
    symbol: String,
    /// Resolve the C++ mangled entry point instead of `--symbol`.
    #[arg(long, requires = "alternate")]
    mangled: bool,
    /// Worker schedule for every path, including a dlopen'd alternate.
    /// Defaults to `UPXTEST_SCHEDULE`, then `lockstep`.
    #[arg(long, value_enum)]
    schedule: Option<ScheduleArg>,
    /// JSONL structured log path. Defaults to `UPXTEST_LOG`.
    #[arg(long)]
    log: Option<PathBuf>,
    /// Run id recorded in trace ids.
    #[arg(long)]
    run_id: Option<String>,
    /// Seed worker 1's thread-duration buffers from divergent tables.
    #[arg(long, hide = true)]
    inject_divergence: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write data01.h..data03.h and an artifact index.
    EmitData {
        /// Output directory (created if missing).
        #[arg(long)]
        output: PathBuf,
    },
    /// Re-hash the headers listed in an artifact index.
    VerifyData {
        /// Directory containing artifact_index.json.
        #[arg(long)]
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScheduleArg {
    Free,
    Lockstep,
}

impl From<ScheduleArg> for Schedule {
    fn from(arg: ScheduleArg) -> Self {
        match arg {
            ScheduleArg::Free => Self::Free,
            ScheduleArg::Lockstep => Self::Lockstep,
        }
    }
}

fn main() -> ExitCode {
    // Counted before clap consumes anything, like a C `argc`.
    let argc = i32::try_from(std::env::args_os().count()).unwrap_or(i32::MAX);
    let cli = Cli::parse();
    match run(cli, argc) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("upx-test01: {err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn run(cli: Cli, argc: i32) -> Result<(), RunError> {
    let run_id = cli.run_id.clone().unwrap_or_else(default_run_id);
    let log_path = cli
        .log
        .clone()
        .or_else(|| std::env::var_os(LOG_ENV).map(PathBuf::from));
    let mut log = match &log_path {
        Some(path) => LogEmitter::to_file(path, RUN_LABEL, &run_id)?,
        None => LogEmitter::disabled(RUN_LABEL, &run_id),
    };

    match &cli.command {
        Some(Command::EmitData { output }) => emit_data(output, &run_id, &mut log),
        Some(Command::VerifyData { dir }) => verify_data(dir, &mut log),
        None => run_paths(&cli, argc, &mut log),
    }
}

fn run_paths(cli: &Cli, argc: i32, log: &mut LogEmitter) -> Result<(), RunError> {
    process::initialize();

    let input = cli.input.unwrap_or(argc);
    let config = match cli.schedule {
        Some(arg) => HarnessConfig::from_env().with_schedule(arg.into()),
        None => HarnessConfig::from_env(),
    };

    let mut direct = DirectEntry::new(config);
    if cli.inject_divergence {
        direct = direct
            .with_divergent_worker(SeedTables::from_generators([SeedGenerator::XorShift; 3]));
    }

    let static_entry;
    let dynamic_entry;
    let alternate: Option<&dyn Test01Entry> = if cli.static_alternate {
        static_entry = StaticEntry::new(config);
        Some(&static_entry)
    } else if let Some(path) = &cli.alternate {
        let symbol = if cli.mangled {
            MANGLED_SYMBOL
        } else {
            cli.symbol.as_str()
        };
        let schedule = cli.schedule.map(Schedule::from);
        dynamic_entry = match DynamicEntry::load(path, symbol, schedule) {
            Ok(entry) => entry,
            Err(err) => {
                let entry = log
                    .entry(LogLevel::Error, "alternate_load_failed")
                    .with_symbol(symbol)
                    .with_exit_code(i32::from(err.exit_code()))
                    .with_details(serde_json::json!({ "error": err.to_string() }));
                log.emit_entry(entry)?;
                log.flush()?;
                return Err(err);
            }
        };
        Some(&dynamic_entry)
    } else {
        None
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    Runner::new(input, config, log).run(&direct, alternate, &mut out)?;
    out.flush()?;
    Ok(())
}

fn emit_data(output: &std::path::Path, run_id: &str, log: &mut LogEmitter) -> Result<(), RunError> {
    let index = emit::emit_seed_headers(&SeedTables::standard(), output, run_id)?;
    for artifact in &index.artifacts {
        println!("{}  {}", artifact.sha256, output.join(&artifact.path).display());
    }
    let entry = log
        .entry(LogLevel::Info, "emit_data")
        .with_artifacts(index.artifacts.iter().map(|a| a.path.clone()).collect())
        .with_exit_code(0);
    log.emit_entry(entry)?;
    log.flush()?;
    Ok(())
}

fn verify_data(dir: &std::path::Path, log: &mut LogEmitter) -> Result<(), RunError> {
    let mismatches = emit::verify_artifact_index(dir)?;
    for m in &mismatches {
        eprintln!(
            "sha256 mismatch for '{}': expected={}, actual={}",
            m.path, m.expected, m.actual
        );
    }
    let (level, exit_code) = if mismatches.is_empty() {
        (LogLevel::Info, 0)
    } else {
        (LogLevel::Error, 1)
    };
    let entry = log
        .entry(level, "verify_data")
        .with_artifacts(mismatches.iter().map(|m| m.path.clone()).collect())
        .with_exit_code(exit_code);
    log.emit_entry(entry)?;
    log.flush()?;
    if mismatches.is_empty() {
        println!("artifact index ok");
        Ok(())
    } else {
        Err(RunError::Emit(emit::EmitError::Mismatch {
            count: mismatches.len(),
        }))
    }
}

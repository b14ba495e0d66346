//! Harness configuration.
//!
//! The worker schedule can be set via the `UPXTEST_SCHEDULE` environment
//! variable:
//! - `lockstep` (default): both workers finish their mutation pass before
//!   either starts walking. Shared accesses stay unsynchronized; only the
//!   phase boundary is aligned, so both walks observe the same aggregate
//!   shared state.
//! - `free`: workers run mutation and walk back to back with no coordination.
//!   With the gate active one worker may walk before the other has toggled,
//!   so the two fingerprints are not guaranteed to agree. Stress use only.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

/// Environment variable selecting the default [`Schedule`].
pub const SCHEDULE_ENV: &str = "UPXTEST_SCHEDULE";

/// Delay each worker takes after its walk, widening the window in which the
/// other worker may still be touching shared storage.
pub const SETTLE_DELAY: Duration = Duration::from_millis(1);

/// How the two workers' phases relate in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schedule {
    /// No coordination between workers.
    Free,
    /// Barrier between the mutation pass and the walk.
    #[default]
    Lockstep,
}

impl Schedule {
    /// Parse from string (case-insensitive). Unknown values fall back to
    /// [`Schedule::Lockstep`].
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" | "race" => Self::Free,
            _ => Self::Lockstep,
        }
    }

    /// Single-byte encoding used across the C ABI. `0` means "unset".
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Free => SCHEDULE_FREE,
            Self::Lockstep => SCHEDULE_LOCKSTEP,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            SCHEDULE_FREE => Some(Self::Free),
            SCHEDULE_LOCKSTEP => Some(Self::Lockstep),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Lockstep => "lockstep",
        }
    }
}

// Atomic cache: 0=unresolved, 1=Free, 2=Lockstep.
static CACHED_SCHEDULE: AtomicU8 = AtomicU8::new(0);

pub const SCHEDULE_UNSET: u8 = 0;
const SCHEDULE_FREE: u8 = 1;
const SCHEDULE_LOCKSTEP: u8 = 2;

/// Schedule configured through the environment (read once, cached for the
/// life of the process).
#[must_use]
pub fn env_schedule() -> Schedule {
    if let Some(cached) = Schedule::from_code(CACHED_SCHEDULE.load(Ordering::Relaxed)) {
        return cached;
    }
    let resolved = std::env::var(SCHEDULE_ENV)
        .map(|raw| Schedule::from_str_loose(&raw))
        .unwrap_or_default();
    // Losing the race is fine: both writers parsed the same environment.
    let _ = CACHED_SCHEDULE.compare_exchange(
        SCHEDULE_UNSET,
        resolved.code(),
        Ordering::Relaxed,
        Ordering::Relaxed,
    );
    resolved
}

/// Knobs for one [`ConcurrencyHarness`](crate::ConcurrencyHarness).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarnessConfig {
    pub schedule: Schedule,
    /// Post-walk delay per worker.
    pub settle: Duration,
}

impl HarnessConfig {
    /// Defaults with the schedule taken from `UPXTEST_SCHEDULE`.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            schedule: env_schedule(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = schedule;
        self
    }

    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            schedule: Schedule::Lockstep,
            settle: SETTLE_DELAY,
        }
    }
}

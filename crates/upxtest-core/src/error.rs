//! Harness error taxonomy.

use thiserror::Error;

use crate::storage::GenerationSet;

/// Failures surfaced by the harness.
///
/// Every variant is fatal to the verification run that produced it; callers
/// never retry. The ABI boundary turns these into a process abort, the CLI
/// into exit code 1.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    /// A worker returned a fingerprint with its low bit clear.
    #[error("worker {worker} returned fingerprint 0x{value:08x} with low bit clear")]
    ParityViolation { worker: usize, value: u32 },
    /// The two workers disagree.
    #[error("worker fingerprints disagree: 0x{first:08x} != 0x{second:08x}")]
    WorkerMismatch { first: u32, second: u32 },
    /// A worker thread panicked before producing a fingerprint.
    #[error("worker {worker} panicked before producing a fingerprint")]
    WorkerPanicked { worker: usize },
    /// The process image was used before `process::initialize` ran.
    #[error("process image used before initialization")]
    NotInitialized,
    /// A caller-supplied seed table has the wrong length.
    #[error("seed table for {set} has {len} words, expected {expected}")]
    SeedLength {
        set: GenerationSet,
        len: usize,
        expected: usize,
    },
}

impl HarnessError {
    /// Returns true for the parity/equality checks (the "invariant violation"
    /// class), as opposed to setup errors.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::ParityViolation { .. } | Self::WorkerMismatch { .. }
        )
    }
}

//! Dual-worker concurrency harness.
//!
//! ## Protocol
//!
//! 1. Two workers are built with the same input.
//! 2. Two threads are spawned; each opens its own [`BankView`] (shared
//!    process-duration buffers, private thread-duration buffers), runs the
//!    mutation pass, walks, sleeps the settle delay and seals the parity bit.
//! 3. Both threads are joined before `verify` returns. No pool, no retry.
//! 4. Each result must be odd and the two results must be equal.
//!
//! ```text
//! Idle -> Running -> Joined -> Verified
//!                          \-> Failed
//! ```
//!
//! Under [`Schedule::Free`] nothing orders one worker's shared-buffer toggles
//! against the other worker's walk. With the mutation gate active the two
//! fingerprints can legitimately diverge; that window is the point of the
//! stress and is not closed here.

use std::sync::Barrier;

use crate::config::{HarnessConfig, Schedule};
use crate::error::HarnessError;
use crate::mutator::mutate;
use crate::seed::SeedTables;
use crate::storage::{BankView, StorageBank};
use crate::walk::{seal, walk};

/// Number of concurrent workers per verification.
pub const WORKER_COUNT: usize = 2;

/// Lifecycle of one harness instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarnessState {
    Idle,
    Running,
    Joined,
    Verified,
    Failed,
}

/// What one worker produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub input: i32,
    pub fingerprint: u32,
    /// Words toggled by this worker's mutation pass.
    pub toggled: usize,
    /// Digest of the worker's thread-duration buffers after its run.
    pub local_digest: blake3::Hash,
}

/// Successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub input: i32,
    pub schedule: Schedule,
    /// The common, odd fingerprint.
    pub fingerprint: u32,
    pub workers: [WorkerReport; WORKER_COUNT],
}

/// Ephemeral per-run worker context.
struct Worker<'s> {
    id: usize,
    input: i32,
    local_seeds: Option<&'s SeedTables>,
}

impl Worker<'_> {
    fn run(&self, bank: &StorageBank, config: HarnessConfig, phase: Option<&Barrier>) -> WorkerReport {
        let mut view: BankView<'_> = match self.local_seeds {
            Some(seeds) => bank.enter_with(seeds),
            None => bank.enter(),
        };
        let toggled = mutate(&mut view, self.input);
        if let Some(barrier) = phase {
            barrier.wait();
        }
        let raw = walk(&view, self.input);
        if !config.settle.is_zero() {
            std::thread::sleep(config.settle);
        }
        WorkerReport {
            worker: self.id,
            input: self.input,
            fingerprint: seal(raw),
            toggled,
            local_digest: view.local().digest(),
        }
    }
}

/// Runs two symmetric workers over one [`StorageBank`] and checks they agree.
#[derive(Debug)]
pub struct ConcurrencyHarness<'a> {
    bank: &'a StorageBank,
    config: HarnessConfig,
    worker_seeds: [Option<SeedTables>; WORKER_COUNT],
    state: HarnessState,
}

impl<'a> ConcurrencyHarness<'a> {
    #[must_use]
    pub fn new(bank: &'a StorageBank) -> Self {
        Self {
            bank,
            config: HarnessConfig::default(),
            worker_seeds: [None, None],
            state: HarnessState::Idle,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HarnessConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed `worker`'s thread-duration buffers from `seeds` instead of the
    /// bank's tables. Used to inject a known divergence. Worker ids outside
    /// `0..WORKER_COUNT` are ignored.
    #[must_use]
    pub fn with_worker_seeds(mut self, worker: usize, seeds: SeedTables) -> Self {
        if let Some(slot) = self.worker_seeds.get_mut(worker) {
            *slot = Some(seeds);
        }
        self
    }

    #[must_use]
    pub fn config(&self) -> HarnessConfig {
        self.config
    }

    #[must_use]
    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// Run both workers on `input` and return the common fingerprint.
    pub fn verify(&mut self, input: i32) -> Result<Verification, HarnessError> {
        self.state = HarnessState::Running;

        let bank = self.bank;
        let config = self.config;
        let seeds = &self.worker_seeds;
        let barrier = match config.schedule {
            Schedule::Lockstep => Some(Barrier::new(WORKER_COUNT)),
            Schedule::Free => None,
        };

        let joined = std::thread::scope(|scope| {
            let handles = [0usize, 1].map(|id| {
                let worker = Worker {
                    id,
                    input,
                    local_seeds: seeds[id].as_ref(),
                };
                let phase = barrier.as_ref();
                scope.spawn(move || worker.run(bank, config, phase))
            });
            handles.map(|handle| handle.join())
        });
        self.state = HarnessState::Joined;

        let workers = match joined {
            [Ok(first), Ok(second)] => [first, second],
            [Err(_), _] => return Err(self.fail(HarnessError::WorkerPanicked { worker: 0 })),
            [_, Err(_)] => return Err(self.fail(HarnessError::WorkerPanicked { worker: 1 })),
        };

        match check_agreement(&workers) {
            Ok(fingerprint) => {
                self.state = HarnessState::Verified;
                Ok(Verification {
                    input,
                    schedule: config.schedule,
                    fingerprint,
                    workers,
                })
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn fail(&mut self, err: HarnessError) -> HarnessError {
        self.state = HarnessState::Failed;
        err
    }
}

/// Parity first (per worker, in order), then equality.
fn check_agreement(workers: &[WorkerReport; WORKER_COUNT]) -> Result<u32, HarnessError> {
    for report in workers {
        if report.fingerprint & 1 == 0 {
            return Err(HarnessError::ParityViolation {
                worker: report.worker,
                value: report.fingerprint,
            });
        }
    }
    let [first, second] = workers;
    if first.fingerprint != second.fingerprint {
        return Err(HarnessError::WorkerMismatch {
            first: first.fingerprint,
            second: second.fingerprint,
        });
    }
    Ok(first.fingerprint)
}

/// One-shot verification with the default configuration.
pub fn verify(bank: &StorageBank, input: i32) -> Result<Verification, HarnessError> {
    ConcurrencyHarness::new(bank).verify(input)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::seed::SeedGenerator;

    fn report(worker: usize, fingerprint: u32) -> WorkerReport {
        WorkerReport {
            worker,
            input: 0,
            fingerprint,
            toggled: 0,
            local_digest: blake3::hash(b""),
        }
    }

    #[test]
    fn agreement_checks_parity_before_equality() {
        assert_eq!(check_agreement(&[report(0, 7), report(1, 7)]), Ok(7));
        assert_eq!(
            check_agreement(&[report(0, 7), report(1, 8)]),
            Err(HarnessError::ParityViolation {
                worker: 1,
                value: 8
            })
        );
        assert_eq!(
            check_agreement(&[report(0, 7), report(1, 9)]),
            Err(HarnessError::WorkerMismatch {
                first: 7,
                second: 9
            })
        );
    }

    #[test]
    fn gate_inactive_run_verifies() {
        let bank = StorageBank::new(SeedTables::standard());
        let mut harness = ConcurrencyHarness::new(&bank);
        assert_eq!(harness.state(), HarnessState::Idle);
        let verification = harness.verify(0).expect("verification");
        assert_eq!(harness.state(), HarnessState::Verified);
        assert_eq!(verification.fingerprint, 0x95b7_c9b7);
        assert_eq!(verification.workers[0].worker, 0);
        assert_eq!(verification.workers[1].worker, 1);
        assert!(bank.deviations().is_empty());
    }

    #[test]
    fn injected_seed_divergence_fails() {
        let bank = StorageBank::new(SeedTables::standard());
        let mut harness = ConcurrencyHarness::new(&bank)
            .with_config(HarnessConfig::default().with_settle(Duration::ZERO))
            .with_worker_seeds(1, SeedTables::from_generators([SeedGenerator::XorShift; 3]));
        let err = harness.verify(0).unwrap_err();
        assert_eq!(
            err,
            HarnessError::WorkerMismatch {
                first: 0x95b7_c9b7,
                second: 0x68c7_0173
            }
        );
        assert_eq!(harness.state(), HarnessState::Failed);
    }

    #[test]
    fn out_of_range_worker_seed_is_ignored() {
        let bank = StorageBank::new(SeedTables::standard());
        let mut harness = ConcurrencyHarness::new(&bank)
            .with_worker_seeds(2, SeedTables::from_generators([SeedGenerator::Ramp; 3]));
        assert_eq!(harness.verify(1).map(|v| v.fingerprint), Ok(0xf02b_e51f));
    }
}

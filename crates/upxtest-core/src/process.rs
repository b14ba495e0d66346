//! Process-wide storage images.
//!
//! Lifecycle: an image starts uninitialized; [`ProcessImage::initialize`]
//! lays out the standard bank exactly once; from then on it is ready for the
//! life of the process and is never reset. Entry points that run against an
//! image go through [`ProcessImage::bank`], which refuses to hand out an
//! uninitialized bank.
//!
//! The crate-level image behind [`initialize`] / [`test01`] is the "direct"
//! one. An alternate implementation linked into the same process declares its
//! own `static` [`ProcessImage`] so its data stays distinct, the way a second
//! object file carries its own data sections.

use std::sync::OnceLock;

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::harness::{ConcurrencyHarness, Verification};
use crate::seed::SeedTables;
use crate::storage::StorageBank;

/// A lazily laid out, never reset [`StorageBank`] with `'static` lifetime.
#[derive(Debug)]
pub struct ProcessImage {
    bank: OnceLock<StorageBank>,
}

impl ProcessImage {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bank: OnceLock::new(),
        }
    }

    /// Lay out the bank if needed and return it. Idempotent.
    pub fn initialize(&self) -> &StorageBank {
        self.bank
            .get_or_init(|| StorageBank::new(SeedTables::standard()))
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.bank.get().is_some()
    }

    /// The bank, or [`HarnessError::NotInitialized`].
    pub fn bank(&self) -> Result<&StorageBank, HarnessError> {
        self.bank.get().ok_or(HarnessError::NotInitialized)
    }

    /// Verify `input` against this image with the environment configuration.
    pub fn verify(&self, input: i32) -> Result<Verification, HarnessError> {
        self.verify_with(HarnessConfig::from_env(), input)
    }

    pub fn verify_with(
        &self,
        config: HarnessConfig,
        input: i32,
    ) -> Result<Verification, HarnessError> {
        ConcurrencyHarness::new(self.bank()?)
            .with_config(config)
            .verify(input)
    }

    /// The `test01(argc)` contract: fingerprint of this image for `input`.
    pub fn test01(&self, input: i32) -> Result<u32, HarnessError> {
        self.verify(input).map(|v| v.fingerprint)
    }
}

impl Default for ProcessImage {
    fn default() -> Self {
        Self::new()
    }
}

static IMAGE: ProcessImage = ProcessImage::new();

/// Build the crate-level image if needed and return it.
pub fn initialize() -> &'static StorageBank {
    IMAGE.initialize()
}

#[must_use]
pub fn is_initialized() -> bool {
    IMAGE.is_initialized()
}

/// The crate-level image, or [`HarnessError::NotInitialized`].
pub fn image() -> Result<&'static StorageBank, HarnessError> {
    IMAGE.bank()
}

pub fn verify(input: i32) -> Result<Verification, HarnessError> {
    IMAGE.verify(input)
}

pub fn verify_with(config: HarnessConfig, input: i32) -> Result<Verification, HarnessError> {
    IMAGE.verify_with(config, input)
}

pub fn test01(input: i32) -> Result<u32, HarnessError> {
    IMAGE.test01(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_image_lifecycle() {
        let image = ProcessImage::new();
        assert!(!image.is_initialized());
        assert_eq!(image.test01(0), Err(HarnessError::NotInitialized));
        let first: *const StorageBank = image.initialize();
        let second: *const StorageBank = image.initialize();
        assert_eq!(first, second);
        assert_eq!(image.test01(0), Ok(0x95b7_c9b7));
        let lockstep = HarnessConfig::default().with_schedule(crate::config::Schedule::Lockstep);
        let verification = image.verify_with(lockstep, 1).expect("gate inactive");
        assert_eq!(verification.fingerprint, 0xf02b_e51f);
        assert_eq!(verification.schedule, crate::config::Schedule::Lockstep);
    }

    #[test]
    fn images_do_not_share_storage() {
        let a = ProcessImage::new();
        let b = ProcessImage::new();
        let bank_a = a.initialize();
        let bank_b = b.initialize();
        assert!(!std::ptr::eq(bank_a, bank_b));
        let mut view = bank_a.enter();
        crate::mutator::mutate(&mut view, 1_000_000);
        assert!(!bank_a.deviations().is_empty());
        assert!(bank_b.deviations().is_empty());
    }
}

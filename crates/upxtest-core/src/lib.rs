//! # upxtest-core
//!
//! Deterministic dual-worker checksum harness for storage-class verification.
//!
//! A packed, relinked or dynamically loaded binary must keep the semantics of
//! its data sections: process-wide mutable data, read-only data, externally
//! linked data and thread-local data. This crate lays out 18 buffers across
//! those classes, perturbs the mutable ones through a sparse mutation pass,
//! folds everything into one 32-bit fingerprint, and runs the whole thing in
//! two concurrent workers that must agree.
//!
//! # Architecture
//!
//! ```text
//! ConcurrencyHarness::verify(input)
//!   ├─ worker 0: bank.enter() -> mutate -> walk -> settle -> v | 1
//!   ├─ worker 1: bank.enter() -> mutate -> walk -> settle -> v | 1
//!   └─ join -> parity check -> equality check -> Verification
//! ```
//!
//! Shared mutable buffers are accessed without synchronization on purpose;
//! see [`storage::SharedBuffer`] and [`config::Schedule`].

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod harness;
pub mod mutator;
pub mod process;
pub mod seed;
pub mod storage;
pub mod walk;

pub use config::{HarnessConfig, Schedule};
pub use error::HarnessError;
pub use harness::{ConcurrencyHarness, HarnessState, Verification, WORKER_COUNT, WorkerReport};
pub use process::ProcessImage;
pub use seed::{BUFFER_WORDS, INDEX_MASK, SeedGenerator, SeedTables};
pub use storage::{BankView, GenerationSet, LocalBuffers, MutableSlot, Slot, StorageBank};

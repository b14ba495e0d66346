//! # upxtest-abi
//!
//! extern "C" boundary for the storage-class harness.
//!
//! This crate produces a `cdylib` (`libupxtest_abi.so`) exporting the
//! alternate implementation of `test01`, and an `rlib` the CLI links
//! statically. It also carries the loader that resolves an alternate
//! implementation from a shared object at runtime.
//!
//! ```text
//! caller -> test01_dll (this crate) -> own ProcessImage -> ConcurrencyHarness
//! caller -> AlternateImplementation::load -> dlopen/dlsym -> test01_dll
//! caller -> AlternateImplementation::set_schedule -> upxtest_set_schedule
//! ```
//!
//! Invariant violations inside an exported entry point abort the process:
//! there is no error channel across the C boundary.

pub mod loader;
pub mod test01_abi;

pub use loader::{AlternateImplementation, LoadError, ScheduleFn, Test01Fn};
pub use test01_abi::{
    ABI_VERSION, DLL_SYMBOL, MANGLED_SYMBOL, SCHEDULE_SYMBOL, test01_dll, test01_with,
    upxtest_set_schedule,
};

//! Exported `test01` entry points.
//!
//! The alternate implementation runs against its own [`ProcessImage`], so
//! a binary that links this crate statically and also calls the direct path
//! exercises two independent sets of buffers.
//!
//! A host that dlopens this library cannot pass a [`HarnessConfig`] through
//! `test01_dll(int)`. It sets the schedule through [`upxtest_set_schedule`]
//! instead; without that call the schedule comes from `UPXTEST_SCHEDULE`.

use std::ffi::c_int;
use std::sync::atomic::{AtomicU8, Ordering};

use upxtest_core::config::SCHEDULE_UNSET;
use upxtest_core::{HarnessConfig, HarnessError, ProcessImage, Schedule};

/// Plain C symbol of the alternate entry point.
pub const DLL_SYMBOL: &str = "test01_dll";

/// Itanium C++ mangling of `uint32_t test01_dll(int)`.
pub const MANGLED_SYMBOL: &str = "_Z10test01_dlli";

/// Exported schedule hook, see [`upxtest_set_schedule`].
pub const SCHEDULE_SYMBOL: &str = "upxtest_set_schedule";

/// Bumped when the exported signatures change.
pub const ABI_VERSION: u32 = 2;

static DLL_IMAGE: ProcessImage = ProcessImage::new();

// Schedule::code() of the host-selected schedule, or SCHEDULE_UNSET.
static SCHEDULE_OVERRIDE: AtomicU8 = AtomicU8::new(SCHEDULE_UNSET);

fn exported_config() -> HarnessConfig {
    let config = HarnessConfig::from_env();
    match Schedule::from_code(SCHEDULE_OVERRIDE.load(Ordering::Acquire)) {
        Some(schedule) => config.with_schedule(schedule),
        None => config,
    }
}

fn run_or_abort(argc: c_int) -> u32 {
    DLL_IMAGE.initialize();
    match DLL_IMAGE.verify_with(exported_config(), argc).map(|v| v.fingerprint) {
        Ok(fingerprint) => fingerprint,
        Err(err) => {
            eprintln!("upxtest-abi: test01_dll({argc}) failed: {err}");
            std::process::abort();
        }
    }
}

/// Statically linked alternate path for Rust callers: runs against this
/// crate's image with an explicit configuration and reports failures instead
/// of aborting.
pub fn test01_with(config: HarnessConfig, argc: i32) -> Result<u32, HarnessError> {
    DLL_IMAGE.initialize();
    DLL_IMAGE.verify_with(config, argc).map(|v| v.fingerprint)
}

/// Alternate implementation of `test01`. Aborts on invariant violation.
#[unsafe(no_mangle)]
pub extern "C" fn test01_dll(argc: c_int) -> u32 {
    run_or_abort(argc)
}

/// Same entry point under its C++ symbol name.
#[unsafe(export_name = "_Z10test01_dlli")]
pub extern "C" fn test01_dll_mangled(argc: c_int) -> u32 {
    run_or_abort(argc)
}

/// Select the worker schedule for later `test01_dll` calls: `1` = free,
/// `2` = lockstep, `0` = back to `UPXTEST_SCHEDULE`. Returns 0 on success and
/// -1 for an unknown code, which leaves the current setting in place.
#[unsafe(no_mangle)]
pub extern "C" fn upxtest_set_schedule(code: u8) -> c_int {
    if code != SCHEDULE_UNSET && Schedule::from_code(code).is_none() {
        return -1;
    }
    SCHEDULE_OVERRIDE.store(code, Ordering::Release);
    0
}

#[unsafe(no_mangle)]
pub extern "C" fn upxtest_abi_version() -> u32 {
    ABI_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exported_entry_points_agree() {
        assert_eq!(test01_dll(0), 0x95b7_c9b7);
        assert_eq!(test01_dll_mangled(1), 0xf02b_e51f);
        assert_eq!(upxtest_abi_version(), ABI_VERSION);
    }

    #[test]
    fn rust_entry_reports_instead_of_aborting() {
        let config = HarnessConfig::default().with_settle(std::time::Duration::ZERO);
        assert_eq!(test01_with(config, 3), Ok(0xe2ca_c87d));
    }

    #[test]
    fn schedule_hook_overrides_the_environment() {
        assert_eq!(upxtest_set_schedule(Schedule::Free.code()), 0);
        assert_eq!(exported_config().schedule, Schedule::Free);
        assert_eq!(upxtest_set_schedule(Schedule::Lockstep.code()), 0);
        assert_eq!(exported_config().schedule, Schedule::Lockstep);

        assert_eq!(upxtest_set_schedule(7), -1);
        assert_eq!(exported_config().schedule, Schedule::Lockstep);

        assert_eq!(upxtest_set_schedule(SCHEDULE_UNSET), 0);
        assert_eq!(
            exported_config().schedule,
            upxtest_core::config::env_schedule()
        );
    }

    #[test]
    fn dll_image_is_not_the_direct_image() {
        test01_dll(0);
        assert!(DLL_IMAGE.is_initialized());
        let direct = upxtest_core::process::initialize();
        let dll = DLL_IMAGE.bank().expect("initialized above");
        assert!(!std::ptr::eq(direct, dll));
    }
}

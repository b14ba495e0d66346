//! Runtime loading of an alternate `test01` implementation.
//!
//! Wraps `dlopen`/`dlsym`/`dlclose` from the host loader. `dlerror` state is
//! process-global on some libcs, so every loader call that may set it runs
//! under [`DL_LOCK`] and reads the message before releasing the lock.

use std::ffi::{CStr, CString, c_int, c_void};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

use parking_lot::Mutex;
use thiserror::Error;
use upxtest_core::Schedule;

use crate::test01_abi::SCHEDULE_SYMBOL;

/// Signature of an exported `test01`-style entry point.
pub type Test01Fn = unsafe extern "C" fn(c_int) -> u32;

/// Signature of the exported schedule hook.
pub type ScheduleFn = unsafe extern "C" fn(u8) -> c_int;

static DL_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Failure to locate, open or resolve an alternate implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("library path {} contains a NUL byte", .0.display())]
    InvalidPath(PathBuf),
    #[error("symbol name {0:?} contains a NUL byte")]
    InvalidSymbol(String),
    #[error("dlopen({}) failed: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },
    #[error("dlsym({symbol}) failed: {reason}")]
    Symbol { symbol: String, reason: String },
    #[error("{symbol}({code}) rejected the schedule")]
    Rejected { symbol: String, code: u8 },
}

/// An opened shared object plus one resolved entry point. The object is
/// closed on drop.
///
/// Loading runs the object's initializers in this process, and the resolved
/// symbol is trusted to have the [`Test01Fn`] signature.
#[derive(Debug)]
pub struct AlternateImplementation {
    handle: NonNull<c_void>,
    entry: Test01Fn,
    path: PathBuf,
    symbol: String,
}

impl AlternateImplementation {
    /// Open `path` with `RTLD_NOW` and resolve `symbol`.
    pub fn load(path: &Path, symbol: &str) -> Result<Self, LoadError> {
        Self::load_first(path, &[symbol])
    }

    /// Open `path` and resolve the first of `symbols` that exists (e.g. the
    /// C name, then the C++ mangled name). Reports the last lookup failure
    /// when none resolves.
    pub fn load_first(path: &Path, symbols: &[&str]) -> Result<Self, LoadError> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| LoadError::InvalidPath(path.to_path_buf()))?;
        let c_symbols = symbols
            .iter()
            .map(|s| CString::new(*s).map_err(|_| LoadError::InvalidSymbol((*s).to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = DL_LOCK.lock();
        // SAFETY: `c_path` is NUL-terminated and outlives the call.
        let raw = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        let Some(handle) = NonNull::new(raw) else {
            return Err(LoadError::Open {
                path: path.to_path_buf(),
                reason: take_dlerror(),
            });
        };

        let mut last = LoadError::Symbol {
            symbol: String::new(),
            reason: "no symbol requested".to_string(),
        };
        for (name, c_name) in symbols.iter().zip(&c_symbols) {
            // Clear stale state so a null result can be told apart from a
            // symbol whose value is null.
            take_dlerror();
            // SAFETY: `handle` came from a successful dlopen; `c_name` is
            // NUL-terminated.
            let sym = unsafe { libc::dlsym(handle.as_ptr(), c_name.as_ptr()) };
            if sym.is_null() {
                last = LoadError::Symbol {
                    symbol: (*name).to_string(),
                    reason: take_dlerror(),
                };
                continue;
            }
            // SAFETY: exported entry points have the `Test01Fn` signature.
            let entry = unsafe { std::mem::transmute::<*mut c_void, Test01Fn>(sym) };
            return Ok(Self {
                handle,
                entry,
                path: path.to_path_buf(),
                symbol: (*name).to_string(),
            });
        }

        // SAFETY: `handle` is open and not shared with anyone else.
        unsafe { libc::dlclose(handle.as_ptr()) };
        Err(last)
    }

    /// Hand `schedule` to the library's own harness through its exported
    /// `upxtest_set_schedule`. Libraries without the hook cannot honor an
    /// explicit schedule and report [`LoadError::Symbol`].
    pub fn set_schedule(&self, schedule: Schedule) -> Result<(), LoadError> {
        let c_name = CString::new(SCHEDULE_SYMBOL)
            .map_err(|_| LoadError::InvalidSymbol(SCHEDULE_SYMBOL.to_string()))?;
        let hook = {
            let _guard = DL_LOCK.lock();
            take_dlerror();
            // SAFETY: `handle` stays open for the lifetime of `self`; `c_name`
            // is NUL-terminated.
            let sym = unsafe { libc::dlsym(self.handle.as_ptr(), c_name.as_ptr()) };
            if sym.is_null() {
                return Err(LoadError::Symbol {
                    symbol: SCHEDULE_SYMBOL.to_string(),
                    reason: take_dlerror(),
                });
            }
            // SAFETY: the exported hook has the `ScheduleFn` signature.
            unsafe { std::mem::transmute::<*mut c_void, ScheduleFn>(sym) }
        };
        let code = schedule.code();
        // SAFETY: resolved from `handle`, which outlives this call.
        match unsafe { hook(code) } {
            0 => Ok(()),
            _ => Err(LoadError::Rejected {
                symbol: SCHEDULE_SYMBOL.to_string(),
                code,
            }),
        }
    }

    /// Invoke the resolved entry point.
    pub fn call(&self, argc: c_int) -> u32 {
        // SAFETY: `entry` was resolved from `handle`, which stays open for
        // the lifetime of `self`.
        unsafe { (self.entry)(argc) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The symbol that actually resolved.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Drop for AlternateImplementation {
    fn drop(&mut self) {
        let _guard = DL_LOCK.lock();
        // SAFETY: `handle` is open and owned by `self`.
        unsafe { libc::dlclose(self.handle.as_ptr()) };
    }
}

/// Read and clear the loader's error message. Call with [`DL_LOCK`] held.
fn take_dlerror() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated string that stays
    // valid until the next loader call, which DL_LOCK prevents.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        return "unknown dynamic loader error".to_string();
    }
    // SAFETY: non-null result of dlerror, see above.
    unsafe { CStr::from_ptr(msg) }
        .to_string_lossy()
        .into_owned()
}

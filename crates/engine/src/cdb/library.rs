//! Access to the engine's native result-database library.
//!
//! The library exposes a C ABI; the calls used here are:
//!
//! ```text
//! int sof_cdb_init(const char *name, int init_type)   -> index (> 0) or error
//! int sof_cdb_status(int index)
//! int sof_cdb_get(int index, int kwh, int kwl, void *data, int *rec_len, int pos)
//! int sof_cdb_close(int index)
//! ```
//!
//! `sof_cdb_get` is a cursor read: every call writes the next record of
//! key `kwh`/`kwl` into `data` and returns a status (see [`super::STATUS_END`]).

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::Path;
use std::sync::Mutex;

use libloading::Library;

use super::CdbError;

/// `init_type` for opening an existing database without modifying it.
const INIT_READ_ONLY: c_int = 99;

/// `pos` argument of `sof_cdb_get` that advances to the next record.
const POS_NEXT: c_int = 1;

/// The native protocol behind a result database.
///
/// Implementations must be safe to share between extraction tasks; the
/// calls for one index are always made from one task at a time.
pub trait CdbLibrary: Send + Sync {
    /// Open the database at `path` and return its index.
    fn open(&self, path: &Path) -> Result<i32, CdbError>;

    /// Read the next record of `key`/`load_case` into `buf` and return the
    /// native status code. `buf` is reused by the caller between calls.
    fn get(&self, index: i32, key: i32, load_case: i32, buf: &mut [u8]) -> i32;

    /// Release the index obtained from [`open`](Self::open).
    fn close(&self, index: i32);
}

type InitFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
type StatusFn = unsafe extern "C" fn(c_int) -> c_int;
type GetFn = unsafe extern "C" fn(c_int, c_int, c_int, *mut c_void, *mut c_int, c_int) -> c_int;
type CloseFn = unsafe extern "C" fn(c_int) -> c_int;

/// The vendor shared library, loaded at runtime.
pub struct NativeCdbLibrary {
    init: InitFn,
    status: StatusFn,
    get: GetFn,
    close: CloseFn,
    // Serializes calls into the library, which keeps global state.
    lock: Mutex<()>,
    // Keeps the function pointers above valid.
    _library: Library,
}

impl NativeCdbLibrary {
    /// Load the library from `path` and resolve the functions used here.
    pub fn load(path: &Path) -> Result<Self, CdbError> {
        let unavailable =
            |e: libloading::Error| CdbError::LibraryUnavailable(format!("{}: {e}", path.display()));

        // SAFETY: loading runs the library's initializers; the vendor
        // library has no initialization requirements beyond its own
        // directory being on the search path. The resolved symbols have the
        // signatures documented by the vendor and stay valid while
        // `_library` is alive.
        unsafe {
            let library = Library::new(path).map_err(unavailable)?;
            let init = *library
                .get::<InitFn>(b"sof_cdb_init\0")
                .map_err(unavailable)?;
            let status = *library
                .get::<StatusFn>(b"sof_cdb_status\0")
                .map_err(unavailable)?;
            let get = *library.get::<GetFn>(b"sof_cdb_get\0").map_err(unavailable)?;
            let close = *library
                .get::<CloseFn>(b"sof_cdb_close\0")
                .map_err(unavailable)?;

            Ok(Self {
                init,
                status,
                get,
                close,
                lock: Mutex::new(()),
                _library: library,
            })
        }
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CdbLibrary for NativeCdbLibrary {
    fn open(&self, path: &Path) -> Result<i32, CdbError> {
        let open_error = |reason: String| CdbError::Open {
            path: path.to_path_buf(),
            reason,
        };

        // The library creates missing files on init; never let it.
        if !path.is_file() {
            return Err(open_error("file does not exist".into()));
        }
        let name = path
            .to_str()
            .and_then(|s| CString::new(s).ok())
            .ok_or_else(|| open_error("path is not valid UTF-8".into()))?;

        let _guard = self.guard();
        // SAFETY: `name` is a valid NUL-terminated string for the duration
        // of the call.
        let index = unsafe { (self.init)(name.as_ptr(), INIT_READ_ONLY) };
        if index <= 0 {
            return Err(open_error(format!("sof_cdb_init returned {index}")));
        }
        // SAFETY: `index` was just returned by `sof_cdb_init`.
        let status = unsafe { (self.status)(index) };
        tracing::debug!(path = %path.display(), index, status, "Result database opened");
        Ok(index)
    }

    fn get(&self, index: i32, key: i32, load_case: i32, buf: &mut [u8]) -> i32 {
        let mut rec_len = c_int::try_from(buf.len()).unwrap_or(c_int::MAX);
        let _guard = self.guard();
        // SAFETY: the library writes at most `rec_len` bytes into `buf`,
        // which is exactly `buf.len()` long.
        unsafe {
            (self.get)(
                index,
                key,
                load_case,
                buf.as_mut_ptr().cast::<c_void>(),
                &mut rec_len,
                POS_NEXT,
            )
        }
    }

    fn close(&self, index: i32) {
        let _guard = self.guard();
        // SAFETY: `index` was returned by `sof_cdb_init` and is closed once.
        let rc = unsafe { (self.close)(index) };
        tracing::debug!(index, rc, "Result database closed");
    }
}

/// Stand-in used when the vendor library could not be loaded at startup.
///
/// Every open fails, so extraction requests degrade to a clean error
/// instead of the service refusing to start.
pub struct MissingCdbLibrary {
    reason: String,
}

impl MissingCdbLibrary {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl CdbLibrary for MissingCdbLibrary {
    fn open(&self, _path: &Path) -> Result<i32, CdbError> {
        Err(CdbError::LibraryUnavailable(self.reason.clone()))
    }

    fn get(&self, _index: i32, _key: i32, _load_case: i32, _buf: &mut [u8]) -> i32 {
        super::STATUS_END
    }

    fn close(&self, _index: i32) {}
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn loading_a_missing_library_fails_cleanly() {
        let result = NativeCdbLibrary::load(Path::new("/nonexistent/sof_cdb_w-70.dll"));
        assert_matches!(result.err(), Some(CdbError::LibraryUnavailable(_)));
    }

    #[test]
    fn missing_library_refuses_to_open() {
        let library = MissingCdbLibrary::new("not installed");
        assert_matches!(
            library.open(Path::new("job.cdb")),
            Err(CdbError::LibraryUnavailable(reason)) if reason == "not installed"
        );
    }
}

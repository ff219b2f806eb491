//! Result database (CDB) access.
//!
//! [`CdbHandle`] owns one open database index and closes it exactly once,
//! on drop or via [`CdbHandle::close`]. [`RecordCursor`] turns the native
//! cursor read into an [`Iterator`] of typed records.

mod library;
mod records;

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use library::{CdbLibrary, MissingCdbLibrary, NativeCdbLibrary};
pub use records::{CdbRecord, NativeField, NodeResult, QuadForces, TrussResult};

/// A record was read completely.
pub const STATUS_OK: i32 = 0;
/// A record was read but is longer than the buffer; the prefix is valid.
pub const STATUS_TRUNCATED: i32 = 1;
/// No more records of the requested kind (2 = end reached, 3 = key absent).
pub const STATUS_END: i32 = 2;

/// Errors from the result database layer.
#[derive(Debug, thiserror::Error)]
pub enum CdbError {
    #[error("Result database library unavailable: {0}")]
    LibraryUnavailable(String),

    #[error("Failed to open result database {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("Failed to read record kind {key} (status {status})")]
    Read { key: i32, status: i32 },
}

/// An open result database.
pub struct CdbHandle {
    library: Arc<dyn CdbLibrary>,
    index: i32,
    path: PathBuf,
    open: bool,
}

impl CdbHandle {
    pub fn open(library: Arc<dyn CdbLibrary>, path: &Path) -> Result<Self, CdbError> {
        let index = library.open(path)?;
        Ok(Self {
            library,
            index,
            path: path.to_path_buf(),
            open: true,
        })
    }

    /// Enumerate every record of kind `R` for `load_case`.
    pub fn records<R: CdbRecord>(&self, load_case: i32) -> RecordCursor<'_, R> {
        RecordCursor {
            handle: self,
            load_case,
            buf: vec![0; R::SIZE],
            done: false,
            _record: PhantomData,
        }
    }

    /// Collect all records of kind `R`; fails on the first read error.
    pub fn read_all<R: CdbRecord>(&self, load_case: i32) -> Result<Vec<R>, CdbError> {
        self.records(load_case).collect()
    }

    /// Close the database now instead of on drop.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if std::mem::take(&mut self.open) {
            self.library.close(self.index);
            tracing::trace!(index = self.index, path = %self.path.display(), "Result database closed");
        }
    }
}

impl Drop for CdbHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Iterator over the records of one kind.
///
/// The native call overwrites the same buffer on every step; each record
/// is decoded into an owned value before the cursor advances.
pub struct RecordCursor<'h, R> {
    handle: &'h CdbHandle,
    load_case: i32,
    buf: Vec<u8>,
    done: bool,
    _record: PhantomData<R>,
}

impl<R: CdbRecord> Iterator for RecordCursor<'_, R> {
    type Item = Result<R, CdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        self.buf.fill(0);
        let status = self
            .handle
            .library
            .get(self.handle.index, R::KEY, self.load_case, &mut self.buf);

        match status {
            STATUS_OK | STATUS_TRUNCATED => Some(Ok(R::decode(&self.buf))),
            status if status >= STATUS_END => {
                self.done = true;
                None
            }
            status => {
                self.done = true;
                Some(Err(CdbError::Read {
                    key: R::KEY,
                    status,
                }))
            }
        }
    }
}

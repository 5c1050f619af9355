//! Filesystem collaborator for packed files.
//!
//! This module centralizes all filesystem- and path-related logic for
//! `packed-table-core`. It is responsible for mapping a table location plus a
//! relative path to:
//!
//! - Sequential write streams for column group files (for example,
//!   `<base>/0`, `<base>/1`).
//! - Random-access read handles the Parquet reader can seek within.
//!
//! Goals of this module include:
//!
//! - Keeping path conventions in one place so they can be evolved without
//!   touching the writer and reader logic.
//! - Classifying backend I/O failures into a small set of storage errors that
//!   higher layers can match on (`NotFound`, `AlreadyExists`, other I/O).
//!
//! This module does not impose any particular storage backend beyond the
//! local filesystem yet, but the API is shaped so that future adapters (for
//! example, object storage) can be introduced without rewriting the writer
//! and reader.

use snafu::{Backtrace, prelude::*};
use std::{
    error::Error,
    fmt,
    fs::{File, OpenOptions},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Represents the location of a packed table.
///
/// This enum abstracts over different storage backends, currently supporting
/// local filesystem paths with potential future support for object storage.
#[derive(Clone, Debug)]
pub enum TableLocation {
    /// A table stored on the local filesystem at the given root path.
    Local(PathBuf),
    // Future:
    // S3 { bucket: String, prefix: String },
}

impl TableLocation {
    /// Creates a new `TableLocation` for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        TableLocation::Local(root.into())
    }
}

/// Errors produced by the storage backend implementation.
///
/// Currently this crate only supports a local filesystem backend;
/// backend-specific I/O errors are wrapped in this enum so higher layers can
/// map them into `StorageError` variants with additional context.
#[derive(Debug)]
pub enum BackendError {
    /// A local filesystem I/O error.
    Local(io::Error),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Local(e) => write!(f, "local I/O error: {e}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            BackendError::Local(e) => Some(e),
        }
    }
}

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    /// The specified path was not found.
    #[snafu(display("Path not found: {path}"))]
    NotFound {
        /// The path that was not found.
        path: String,
        /// Underlying backend error that caused the failure.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },

    /// The specified path already exists when creation was requested with
    /// create-new semantics.
    #[snafu(display("Path already exists: {path}"))]
    AlreadyExists {
        /// The path that was found to already exist.
        path: String,
        /// Underlying backend error that indicates the existing resource.
        source: BackendError,
        /// The backtrace captured when the error occurred.
        backtrace: Backtrace,
    },

    /// An I/O error occurred on the local filesystem.
    #[snafu(display("Local I/O error at {path}: {source}"))]
    OtherIo {
        /// The path where the I/O error occurred.
        path: String,
        /// Underlying backend I/O error with platform-specific details.
        source: BackendError,
        /// The backtrace at the time the error occurred.
        backtrace: Backtrace,
    },
}

/// Join a table location with a relative path into an absolute local path.
///
/// v0.1: only Local is supported.
pub(crate) fn join_local(location: &TableLocation, rel: &Path) -> PathBuf {
    match location {
        TableLocation::Local(root) => root.join(rel),
    }
}

fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

/// Open a *new* sequential write stream at `rel_path` inside `location`,
/// failing if the file already exists.
///
/// Column group files must land on fresh paths; a collision means the caller
/// reused a base path from an earlier write session, which would silently
/// interleave two sessions' data. Parent directories are created as needed.
///
/// # Errors
///
/// Returns `StorageError::AlreadyExists` when the target path is occupied and
/// `StorageError::OtherIo` for any other filesystem failure.
pub fn create_write_stream(
    location: &TableLocation,
    rel_path: &Path,
) -> StorageResult<BufWriter<File>> {
    match location {
        TableLocation::Local(_) => {
            let abs = join_local(location, rel_path);
            create_parent_dir(&abs)?;

            let path_str = abs.display().to_string();

            // Atomic "create only if not exists" on the target path.
            let file = match OpenOptions::new().write(true).create_new(true).open(&abs) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    return Err(BackendError::Local(e))
                        .context(AlreadyExistsSnafu { path: path_str });
                }
                Err(e) => {
                    return Err(BackendError::Local(e)).context(OtherIoSnafu { path: path_str });
                }
            };

            Ok(BufWriter::new(file))
        }
    }
}

/// Open the file at `rel_path` within `location` for reading.
///
/// The returned handle supports the random access the Parquet footer and
/// column chunk reads require. On a missing file this returns
/// `StorageError::NotFound`; other filesystem problems produce
/// `StorageError::OtherIo`.
pub fn open_read_stream(location: &TableLocation, rel_path: &Path) -> StorageResult<File> {
    match location {
        TableLocation::Local(_) => {
            let abs = join_local(location, rel_path);

            match File::open(&abs) {
                Ok(f) => Ok(f),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackendError::Local(e))
                    .context(NotFoundSnafu {
                        path: abs.display().to_string(),
                    }),
                Err(e) => Err(BackendError::Local(e)).context(OtherIoSnafu {
                    path: abs.display().to_string(),
                }),
            }
        }
    }
}

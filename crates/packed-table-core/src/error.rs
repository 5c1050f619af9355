//! Error types and SNAFU context selectors for packed writing and reading.
//!
//! This module centralizes the `PackError` enum used by the public API and
//! exposes context selectors (via `#[snafu(visibility(pub(crate)))]`) so
//! implementation details in sibling modules can attach error context without
//! re-exporting everything at the crate root. Keep new variants here to ensure
//! consistent user-facing messages and to avoid scattering selectors.
//!
//! Variants fall into four kinds, all surfaced to the immediate caller with
//! no retry and no silent swallowing:
//!
//! - configuration errors (state machine violations, schema mismatch, empty
//!   batches),
//! - mapping errors (column offsets pointing outside the supplied file list
//!   or a file's physical schema),
//! - I/O errors (wrapping [`StorageError`]),
//! - format errors (malformed Parquet content, misaligned packed files).

use arrow::{datatypes::SchemaRef, error::ArrowError};
use parquet::errors::ParquetError;
use snafu::prelude::*;

use crate::storage::StorageError;

/// Result alias used throughout the packed writer and reader.
pub type PackResult<T> = Result<T, PackError>;

/// Errors from packed write and read operations.
///
/// Each variant carries enough context for callers to surface actionable
/// messages to users; partial progress (for example, group files finalized
/// before another group failed) is reported, not rolled back.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PackError {
    /// `init` was called on a writer that already ran its split decision.
    #[snafu(display("Writer is already initialized; group membership is fixed for the session"))]
    AlreadyInitialized,

    /// An operation that requires an initialized writer ran before `init`.
    #[snafu(display("Writer is not initialized; call init with the first batch before {operation}"))]
    NotInitialized {
        /// The operation that was attempted on the uninitialized writer.
        operation: &'static str,
    },

    /// An operation ran on a writer or reader that was already closed.
    #[snafu(display("Cannot {operation}: instance is already closed"))]
    AlreadyClosed {
        /// The operation that was attempted after close.
        operation: &'static str,
    },

    /// A batch arrived with a schema different from the session's logical schema.
    #[snafu(display("Batch schema does not match the session schema: expected {expected:?}, got {actual:?}"))]
    SchemaMismatch {
        /// The logical schema fixed at `init`.
        expected: SchemaRef,
        /// The schema of the offending batch.
        actual: SchemaRef,
    },

    /// A zero-row batch was supplied where per-row sizes must be computed or
    /// rows appended.
    #[snafu(display("Cannot {operation} an empty batch (zero rows)"))]
    EmptyBatch {
        /// The operation that rejected the empty batch.
        operation: &'static str,
    },

    /// `to_table` was called on a reader whose batch sequence was already drained.
    #[snafu(display("Reader is exhausted; construct a new reader to re-read the packed files"))]
    ReaderExhausted,

    /// The supplied column offsets do not cover the target schema one-to-one.
    #[snafu(display("Expected {expected} column offsets (one per target schema column), got {actual}"))]
    OffsetCountMismatch {
        /// Number of fields in the target schema.
        expected: usize,
        /// Number of supplied column offsets.
        actual: usize,
    },

    /// A needed column index does not exist in the target schema.
    #[snafu(display("Needed column {column} is out of range for a target schema with {column_count} columns"))]
    NeededColumnOutOfRange {
        /// The offending logical column index.
        column: usize,
        /// Number of fields in the target schema.
        column_count: usize,
    },

    /// A column offset references a physical file outside the path list.
    #[snafu(display("Column {column} maps to file index {file_index}, but only {file_count} paths were supplied"))]
    FileIndexOutOfRange {
        /// The logical column whose offset is invalid.
        column: usize,
        /// The out-of-range file index.
        file_index: usize,
        /// Number of supplied file paths.
        file_count: usize,
    },

    /// A column offset references a physical column outside a file's schema.
    #[snafu(display("Physical column {column_index} is out of range for {path} ({column_count} columns)"))]
    ColumnIndexOutOfRange {
        /// The physical file whose schema was consulted.
        path: String,
        /// The out-of-range physical column index.
        column_index: usize,
        /// Number of columns in the file's physical schema.
        column_count: usize,
    },

    /// A mapped physical column's type differs from the target schema field.
    #[snafu(display("Column {column} expects type {expected:?}, but {column} stores {actual:?}"))]
    ColumnTypeMismatch {
        /// Name of the target schema field.
        column: String,
        /// Data type declared by the target schema.
        expected: arrow::datatypes::DataType,
        /// Data type found in the physical file.
        actual: arrow::datatypes::DataType,
    },

    /// Storage error while opening or writing packed files.
    #[snafu(display("Storage error while accessing packed files: {source}"))]
    Storage {
        /// Underlying storage error.
        #[snafu(source, backtrace)]
        source: StorageError,
    },

    /// Parquet error while appending or flushing a column group file.
    #[snafu(display("Parquet write error in column group {group}: {source}"))]
    ParquetWrite {
        /// Index of the column group whose file writer failed.
        group: usize,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Parquet error while opening a packed file (missing magic, truncated
    /// footer, malformed metadata).
    #[snafu(display("Cannot open packed file {path}: {source}"))]
    ParquetOpen {
        /// The physical file that failed format validation.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// Error while decoding a batch from a packed file mid-read.
    #[snafu(display("Failed to read a batch from {path}: {source}"))]
    ReadBatch {
        /// The physical file the batch was being read from.
        path: String,
        /// Underlying Arrow decode error.
        source: ArrowError,
    },

    /// Arrow compute or construction error while splitting or reassembling
    /// batches.
    #[snafu(display("Arrow error while assembling batch: {source}"))]
    Arrow {
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// One or more column group files failed to finalize during `close`.
    ///
    /// Finalization is best-effort: every group is attempted even after a
    /// failure, and the groups that did finalize stay valid on disk.
    #[snafu(display("Failed to finalize {} of {total} column group files: {details}", failed.len()))]
    FinalizeGroups {
        /// Indices of the groups whose finalize failed.
        failed: Vec<usize>,
        /// Total number of column groups in the session.
        total: usize,
        /// Concatenated per-group failure messages.
        details: String,
    },

    /// Packed files disagree on total row count.
    ///
    /// Every file of one packed layout stores the same logical rows, so one
    /// file running out of rows while a peer still has rows means the set of
    /// paths does not form one consistent layout.
    #[snafu(display("Packed file {path} ended before its peers; the supplied files are misaligned"))]
    RowCountMisaligned {
        /// The physical file that ran out of rows first.
        path: String,
    },
}

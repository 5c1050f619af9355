//! Bounded-memory writer for packed column group files.
//!
//! [`PackedWriter`] turns a stream of logical row batches into one Parquet
//! file per column group. It is an explicit two-phase state machine:
//!
//! - `Unsplit`: constructed, no split decision yet.
//! - `Writing`: [`PackedWriter::init`] ran the size-based splitter against
//!   the first batch, fixed group membership for the session, and opened one
//!   file writer per group at `base_path/<group_index>`.
//! - `Closed`: [`PackedWriter::close`] finalized every group file.
//!
//! Illegal transitions (double init, writing after close, closing twice) are
//! configuration errors. Buffered bytes are tracked across all group writers;
//! once a batch would push the total over the memory budget, every group's
//! buffered rows are flushed to its file stream before the batch is accepted.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use log::{debug, warn};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;

use crate::{
    error::{
        AlreadyClosedSnafu, AlreadyInitializedSnafu, ArrowSnafu, EmptyBatchSnafu,
        FinalizeGroupsSnafu, NotInitializedSnafu, PackResult, ParquetWriteSnafu,
        SchemaMismatchSnafu, StorageSnafu,
    },
    group::ColumnOffset,
    splitter::{DEFAULT_SPLIT_THRESHOLD, SizeBasedSplitter, batch_payload_bytes},
    storage::{self, BackendError, TableLocation},
};

/// Default ceiling on buffered bytes across all open column group writers.
pub const DEFAULT_MEMORY_BUDGET: usize = 16 * 1024 * 1024;

/// Configuration for a [`PackedWriter`] session.
///
/// `writer_properties` is passed through to the Parquet writers unchanged;
/// this crate does not interpret encoding or compression settings.
#[derive(Debug, Clone)]
pub struct PackedWriterOptions {
    /// Ceiling on cumulative buffered bytes across all column groups.
    pub memory_budget: usize,
    /// Average per-row byte threshold handed to the size-based splitter.
    pub split_threshold: usize,
    /// Parquet writer properties applied to every column group file.
    pub writer_properties: WriterProperties,
}

impl Default for PackedWriterOptions {
    fn default() -> Self {
        Self {
            memory_budget: DEFAULT_MEMORY_BUDGET,
            split_threshold: DEFAULT_SPLIT_THRESHOLD,
            writer_properties: WriterProperties::default(),
        }
    }
}

enum WriterState {
    Unsplit,
    Writing,
    Closed,
}

struct GroupFileWriter {
    columns: Vec<usize>,
    path: String,
    writer: ArrowWriter<BufWriter<File>>,
}

/// Writes a logical table as one Parquet file per column group.
///
/// Single-writer: not internally synchronized. The writer exclusively owns
/// the files under its base path until [`PackedWriter::close`] hands them to
/// the caller. No manifest is written; callers persist the layout exposed by
/// [`PackedWriter::column_offsets`] for later reader construction.
pub struct PackedWriter {
    location: TableLocation,
    base_path: PathBuf,
    schema: SchemaRef,
    options: PackedWriterOptions,
    state: WriterState,
    groups: Vec<GroupFileWriter>,
    offsets: Vec<ColumnOffset>,
    group_columns: Vec<Vec<usize>>,
}

impl PackedWriter {
    /// Creates a writer for `schema` rooted at `base_path` inside `location`.
    ///
    /// No files are touched until [`PackedWriter::init`] runs the split
    /// decision against the first batch.
    pub fn new(
        location: TableLocation,
        base_path: impl Into<PathBuf>,
        schema: SchemaRef,
        options: PackedWriterOptions,
    ) -> Self {
        Self {
            location,
            base_path: base_path.into(),
            schema,
            options,
            state: WriterState::Unsplit,
            groups: Vec::new(),
            offsets: Vec::new(),
            group_columns: Vec::new(),
        }
    }

    /// Runs the split decision on `first_batch`, opens one group file per
    /// resulting column group, and writes the batch.
    ///
    /// Group membership is fixed for the rest of the session. Group files are
    /// created with create-new semantics: a base path colliding with an
    /// earlier session fails with an already-exists storage error.
    ///
    /// # Errors
    ///
    /// Fails on a second call, after `close`, on an empty first batch, or on
    /// a batch whose schema differs from the writer's logical schema.
    pub fn init(&mut self, first_batch: &RecordBatch) -> PackResult<()> {
        match self.state {
            WriterState::Unsplit => {}
            WriterState::Writing => return AlreadyInitializedSnafu.fail(),
            WriterState::Closed => return AlreadyClosedSnafu { operation: "init" }.fail(),
        }
        self.check_batch(first_batch, "init")?;

        let splitter = SizeBasedSplitter::new(self.options.split_threshold);
        let groups = splitter.split(first_batch)?;

        let mut offsets = vec![ColumnOffset::new(0, 0); self.schema.fields().len()];
        let mut group_writers = Vec::with_capacity(groups.len());

        for (group_index, group) in groups.iter().enumerate() {
            for (column_index, &logical) in group.columns().iter().enumerate() {
                offsets[logical] = ColumnOffset::new(group_index, column_index);
            }

            let rel = self.base_path.join(group_index.to_string());
            let stream =
                storage::create_write_stream(&self.location, &rel).context(StorageSnafu)?;
            let physical_schema = self
                .schema
                .project(group.columns())
                .map(std::sync::Arc::new)
                .context(ArrowSnafu)?;
            let writer = ArrowWriter::try_new(
                stream,
                physical_schema,
                Some(self.options.writer_properties.clone()),
            )
            .context(ParquetWriteSnafu { group: group_index })?;

            group_writers.push(GroupFileWriter {
                columns: group.columns().to_vec(),
                path: storage::join_local(&self.location, &rel).display().to_string(),
                writer,
            });
        }

        debug!(
            "split {} logical columns into {} column groups under {}",
            self.schema.fields().len(),
            group_writers.len(),
            self.base_path.display()
        );

        self.group_columns = group_writers
            .iter()
            .map(|group| group.columns.clone())
            .collect();
        self.groups = group_writers;
        self.offsets = offsets;
        self.state = WriterState::Writing;

        self.append(first_batch)
    }

    /// Appends a batch, split per the membership fixed at `init`.
    ///
    /// Rows land in each group file in call order. If buffering the batch
    /// would push cumulative buffered bytes over the memory budget, all
    /// groups are flushed to their file streams first.
    pub fn write(&mut self, batch: &RecordBatch) -> PackResult<()> {
        match self.state {
            WriterState::Writing => {}
            WriterState::Unsplit => return NotInitializedSnafu { operation: "write" }.fail(),
            WriterState::Closed => return AlreadyClosedSnafu { operation: "write" }.fail(),
        }
        self.check_batch(batch, "write")?;
        self.append(batch)
    }

    /// Flushes and finalizes every group file, then releases all handles.
    ///
    /// Finalization is best-effort: a failing group does not prevent the
    /// remaining groups from writing their footers, and the failures are
    /// aggregated into a single error. A second call fails; already-written
    /// files are never re-finalized.
    pub fn close(&mut self) -> PackResult<()> {
        match self.state {
            WriterState::Writing => {}
            WriterState::Unsplit => return NotInitializedSnafu { operation: "close" }.fail(),
            WriterState::Closed => return AlreadyClosedSnafu { operation: "close" }.fail(),
        }
        self.state = WriterState::Closed;

        let groups = std::mem::take(&mut self.groups);
        let total = groups.len();
        let mut failed = Vec::new();
        let mut details = Vec::new();

        for (group_index, group) in groups.into_iter().enumerate() {
            match Self::finalize_group(group) {
                Ok(()) => {}
                Err(message) => {
                    warn!("failed to finalize column group {group_index}: {message}");
                    failed.push(group_index);
                    details.push(format!("group {group_index}: {message}"));
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            FinalizeGroupsSnafu {
                failed,
                total,
                details: details.join("; "),
            }
            .fail()
        }
    }

    /// The layout produced by the split decision: one [`ColumnOffset`] per
    /// logical column, in logical schema order.
    ///
    /// Available from `init` onward (including after `close`) so callers can
    /// persist the mapping for later reader construction.
    pub fn column_offsets(&self) -> PackResult<&[ColumnOffset]> {
        match self.state {
            WriterState::Unsplit => NotInitializedSnafu {
                operation: "column_offsets",
            }
            .fail(),
            _ => Ok(&self.offsets),
        }
    }

    /// Logical column indices per column group, in group index order.
    ///
    /// Together with [`PackedWriter::column_offsets`] this is the full
    /// persisted-layout contract; it stays available after `close`.
    pub fn group_columns(&self) -> PackResult<&[Vec<usize>]> {
        match self.state {
            WriterState::Unsplit => NotInitializedSnafu {
                operation: "group_columns",
            }
            .fail(),
            _ => Ok(&self.group_columns),
        }
    }

    /// Cumulative buffered bytes across all open group writers.
    pub fn buffered_bytes(&self) -> usize {
        self.groups
            .iter()
            .map(|group| group.writer.in_progress_size())
            .sum()
    }

    fn check_batch(&self, batch: &RecordBatch, operation: &'static str) -> PackResult<()> {
        ensure!(
            batch.schema() == self.schema,
            SchemaMismatchSnafu {
                expected: self.schema.clone(),
                actual: batch.schema(),
            }
        );
        ensure!(batch.num_rows() > 0, EmptyBatchSnafu { operation });
        Ok(())
    }

    fn append(&mut self, batch: &RecordBatch) -> PackResult<()> {
        let incoming = batch_payload_bytes(batch)?;
        if self.buffered_bytes() + incoming > self.options.memory_budget {
            self.flush_all()?;
        }

        for (group_index, group) in self.groups.iter_mut().enumerate() {
            let projected = batch.project(&group.columns).context(ArrowSnafu)?;
            group
                .writer
                .write(&projected)
                .context(ParquetWriteSnafu { group: group_index })?;
        }

        // A single batch larger than the whole budget cannot be kept buffered
        // either; it goes straight to the file streams.
        if self.buffered_bytes() > self.options.memory_budget {
            self.flush_all()?;
        }
        Ok(())
    }

    fn flush_all(&mut self) -> PackResult<()> {
        let buffered = self.buffered_bytes();
        for (group_index, group) in self.groups.iter_mut().enumerate() {
            group
                .writer
                .flush()
                .context(ParquetWriteSnafu { group: group_index })?;
            group
                .writer
                .inner_mut()
                .flush()
                .map_err(BackendError::Local)
                .context(crate::storage::OtherIoSnafu {
                    path: group.path.clone(),
                })
                .context(StorageSnafu)?;
        }
        debug!(
            "flushed {} column groups ({buffered} buffered bytes) to file streams",
            self.groups.len()
        );
        Ok(())
    }

    fn finalize_group(group: GroupFileWriter) -> Result<(), String> {
        let mut stream = group
            .writer
            .into_inner()
            .map_err(|e| format!("finalize {}: {e}", group.path))?;
        stream
            .flush()
            .map_err(|e| format!("flush {}: {e}", group.path))?;
        Ok(())
    }
}

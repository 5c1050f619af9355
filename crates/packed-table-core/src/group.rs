//! Column group model shared by the splitter, writer, and reader.
//!
//! A [`ColumnGroup`] is an ordered subset of a logical schema's columns that
//! is stored together in one physical file, plus the row batches assigned to
//! it so far. A [`ColumnOffset`] maps one logical column to the physical file
//! and in-file column that store it. Groups are produced by the splitter and
//! consumed by the writer; offsets are produced by a write session and
//! supplied to the reader by whoever persisted them.

use arrow::array::RecordBatch;
use serde::{Deserialize, Serialize};

/// An ordered subset of logical column indices together with the row batches
/// assigned to the group.
///
/// Invariants:
/// - Column indices are unique and keep the order of first assignment.
/// - After a split decision, every logical column belongs to exactly one
///   group, and membership never changes for the rest of the write session.
#[derive(Debug, Clone)]
pub struct ColumnGroup {
    columns: Vec<usize>,
    batches: Vec<RecordBatch>,
    payload_bytes: usize,
}

impl ColumnGroup {
    /// Creates an empty group owning the given logical column indices.
    pub fn new(columns: Vec<usize>) -> Self {
        Self {
            columns,
            batches: Vec::new(),
            payload_bytes: 0,
        }
    }

    /// Logical column indices assigned to this group, in assignment order.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Appends a batch already projected down to this group's columns.
    pub fn push_batch(&mut self, batch: RecordBatch, payload_bytes: usize) {
        self.payload_bytes += payload_bytes;
        self.batches.push(batch);
    }

    /// Returns the `i`-th accumulated batch, if present.
    pub fn batch(&self, i: usize) -> Option<&RecordBatch> {
        self.batches.get(i)
    }

    /// Number of accumulated batches.
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    /// Total payload bytes across the accumulated batches.
    pub fn payload_bytes(&self) -> usize {
        self.payload_bytes
    }
}

/// Maps one logical column to its physical location in a packed layout.
///
/// `file_index` addresses the reader's file path list; `column_index`
/// addresses the physical schema of that file. The mapping is an external
/// contract produced by a prior write session (see
/// [`PackedWriter::column_offsets`](crate::writer::PackedWriter::column_offsets));
/// the reader trusts it and never re-derives grouping from file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOffset {
    /// Index into the packed layout's physical file list.
    pub file_index: usize,
    /// Index of the column within that file's physical schema.
    pub column_index: usize,
}

impl ColumnOffset {
    /// Creates a new offset from a file index and an in-file column index.
    pub fn new(file_index: usize, column_index: usize) -> Self {
        Self {
            file_index,
            column_index,
        }
    }
}

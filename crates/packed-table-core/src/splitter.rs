//! Size-based partitioning of logical columns into column groups.
//!
//! The splitter looks at one row batch and decides, from average per-row
//! byte sizes, which columns are wide enough to deserve their own physical
//! file and which can be packed together. The decision is pure and
//! deterministic: the writer runs it exactly once, against the first batch of
//! a session, and reuses the resulting membership for every later batch.

use arrow::array::{Array, RecordBatch};

use crate::{
    error::{ArrowSnafu, EmptyBatchSnafu, PackResult},
    group::ColumnGroup,
};
use snafu::prelude::*;

/// Default byte threshold separating packable columns from oversized ones.
pub const DEFAULT_SPLIT_THRESHOLD: usize = 1024;

/// Actual payload bytes of one column of a batch.
///
/// Measures the sliced data (value buffers, offsets, validity), not the
/// capacity of the underlying allocations, so repeated batches with the same
/// content always measure the same.
pub(crate) fn column_payload_bytes(array: &dyn Array) -> PackResult<usize> {
    array
        .to_data()
        .get_slice_memory_size()
        .context(ArrowSnafu)
}

/// Total payload bytes across all columns of a batch.
pub(crate) fn batch_payload_bytes(batch: &RecordBatch) -> PackResult<usize> {
    let mut total = 0;
    for column in batch.columns() {
        total += column_payload_bytes(column.as_ref())?;
    }
    Ok(total)
}

/// Partitions a batch's columns into column groups by average per-row size.
///
/// Columns whose average row exceeds the threshold each get a singleton
/// group; the rest are greedily packed, preserving the original column
/// order, into groups whose combined average row stays at or under the
/// threshold. Singleton groups come first in the output, in the order the
/// columns were encountered, followed by packed groups in formation order.
#[derive(Debug, Clone, Copy)]
pub struct SizeBasedSplitter {
    threshold: usize,
}

impl SizeBasedSplitter {
    /// Creates a splitter with the given per-row byte threshold.
    ///
    /// A threshold of zero degenerates to maximal fan-out: every column
    /// becomes its own singleton group.
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Splits `batch` into column groups, each seeded with its projection of
    /// the batch.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error on a zero-row batch (per-row sizes
    /// would divide by zero) and propagates Arrow errors from size
    /// measurement or projection.
    pub fn split(&self, batch: &RecordBatch) -> PackResult<Vec<ColumnGroup>> {
        let rows = batch.num_rows();
        ensure!(rows > 0, EmptyBatchSnafu { operation: "split" });

        let mut singletons: Vec<ColumnGroup> = Vec::new();
        let mut packed: Vec<ColumnGroup> = Vec::new();

        let mut current: Vec<usize> = Vec::new();
        let mut current_size: usize = 0;

        for (index, column) in batch.columns().iter().enumerate() {
            let avg_row_bytes = column_payload_bytes(column.as_ref())?.div_ceil(rows);

            if self.threshold == 0 || avg_row_bytes > self.threshold {
                singletons.push(ColumnGroup::new(vec![index]));
                continue;
            }

            if !current.is_empty() && current_size + avg_row_bytes > self.threshold {
                packed.push(ColumnGroup::new(std::mem::take(&mut current)));
                current_size = 0;
            }
            current.push(index);
            current_size += avg_row_bytes;
        }

        if !current.is_empty() {
            packed.push(ColumnGroup::new(current));
        }

        let mut groups = singletons;
        groups.extend(packed);

        for group in &mut groups {
            let projected = batch.project(group.columns()).context(ArrowSnafu)?;
            let payload = batch_payload_bytes(&projected)?;
            group.push_batch(projected, payload);
        }

        Ok(groups)
    }
}

//! Reassembles logical row batches from packed column group files.
//!
//! [`PackedRecordBatchReader`] is driven entirely by an externally supplied
//! [`ColumnOffset`] mapping: it never re-derives grouping from file contents.
//! Given a target logical schema, the mapping, and the set of needed logical
//! columns, it opens only the physical files that contain needed columns and
//! streams them in budget-bounded increments.
//!
//! Cross-file row alignment is an explicit merge step: each open file keeps a
//! queue of decoded chunks, and every emitted logical batch takes the minimum
//! contiguous row count available across all files, so all columns of an
//! output batch share one row count. Rows are never reordered, only regrouped
//! into different batch boundaries.
//!
//! Documented reuse semantics (fail on reuse, never silent emptiness):
//! [`PackedRecordBatchReader::to_table`] on a drained reader and a second
//! [`PackedRecordBatchReader::close`] both fail with configuration errors.
//! Dropping the reader without closing releases all file handles.

use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fs::File,
    path::Path,
    sync::Arc,
};

use arrow::array::{ArrayRef, RecordBatch, new_null_array};
use arrow::compute::concat_batches;
use arrow::datatypes::{Field, Schema, SchemaRef};
use log::debug;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use snafu::prelude::*;

use crate::{
    error::{
        AlreadyClosedSnafu, ArrowSnafu, ColumnIndexOutOfRangeSnafu, ColumnTypeMismatchSnafu,
        FileIndexOutOfRangeSnafu, NeededColumnOutOfRangeSnafu, OffsetCountMismatchSnafu,
        PackResult, ParquetOpenSnafu, ReadBatchSnafu, ReaderExhaustedSnafu,
        RowCountMisalignedSnafu, StorageSnafu,
    },
    group::ColumnOffset,
    splitter::batch_payload_bytes,
    storage::{self, TableLocation},
};

/// Ceiling on the row count of one budget-bounded pull.
pub const DEFAULT_READ_BATCH_ROWS: usize = 1024;

#[derive(Debug)]
enum ReaderState {
    Active,
    Drained,
    Closed,
}

struct FileReaderState {
    path: String,
    reader: ParquetRecordBatchReader,
    /// Decoded chunks waiting to be merged, with their payload byte size.
    queue: VecDeque<(RecordBatch, usize)>,
    /// Rows already consumed from the front chunk.
    consumed: usize,
    buffered_bytes: usize,
    /// Physical column indices included in the projection, ascending; the
    /// rank of an index here is its position in decoded chunks.
    projected: Vec<usize>,
    exhausted: bool,
}

impl std::fmt::Debug for FileReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReaderState")
            .field("path", &self.path)
            .field("reader", &"<ParquetRecordBatchReader>")
            .field("queue", &self.queue)
            .field("consumed", &self.consumed)
            .field("buffered_bytes", &self.buffered_bytes)
            .field("projected", &self.projected)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl FileReaderState {
    fn projected_position(&self, column_index: usize) -> usize {
        self.projected
            .binary_search(&column_index)
            .unwrap_or_else(|_| unreachable!("projection covers every mapped column"))
    }

    /// Ensures at least one chunk is buffered, unless the file is exhausted.
    fn fill(&mut self) -> PackResult<()> {
        while self.queue.is_empty() && !self.exhausted {
            match self.reader.next() {
                Some(Ok(chunk)) => {
                    if chunk.num_rows() == 0 {
                        continue;
                    }
                    let payload = batch_payload_bytes(&chunk)?;
                    self.buffered_bytes += payload;
                    self.queue.push_back((chunk, payload));
                }
                Some(Err(source)) => {
                    return Err(source).context(ReadBatchSnafu {
                        path: self.path.clone(),
                    });
                }
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    fn available_rows(&self) -> Option<usize> {
        self.queue.front().map(|(chunk, _)| chunk.num_rows() - self.consumed)
    }

    fn advance(&mut self, rows: usize) {
        self.consumed += rows;
        let front_rows = self.queue.front().map(|(chunk, _)| chunk.num_rows());
        if front_rows == Some(self.consumed) {
            if let Some((_, payload)) = self.queue.pop_front() {
                self.buffered_bytes -= payload;
            }
            self.consumed = 0;
        }
    }
}

/// Streams logical row batches reassembled from packed column group files.
///
/// Constructed from a file path list, a target logical schema, one
/// [`ColumnOffset`] per target column, the set of needed logical columns, and
/// a memory budget. Only files containing needed columns are opened; columns
/// outside the needed set occupy their schema position as all-null arrays
/// (their fields are marked nullable in emitted batches). Column order in
/// every produced batch follows the target schema, never physical file order.
///
/// The batch sequence is lazy, finite, and forward-only; reconstructing the
/// reader is the only way to restart it.
#[derive(Debug)]
pub struct PackedRecordBatchReader {
    output_schema: SchemaRef,
    offsets: Vec<ColumnOffset>,
    needed: BTreeSet<usize>,
    files: Vec<Option<FileReaderState>>,
    state: ReaderState,
}

impl PackedRecordBatchReader {
    /// Opens the physical files needed by the requested projection and
    /// validates the supplied mapping against them.
    ///
    /// Per-file read increments are sized so that buffered bytes across all
    /// open files stay within `memory_budget` (per-row sizes are estimated
    /// from Parquet row-group metadata).
    ///
    /// # Errors
    ///
    /// Mapping errors (offset count, needed column range, file index range,
    /// physical column range, column type mismatch) surface immediately, as
    /// do storage errors for missing files and format errors for content
    /// that fails Parquet validation.
    pub fn try_new(
        location: TableLocation,
        paths: Vec<String>,
        schema: SchemaRef,
        column_offsets: Vec<ColumnOffset>,
        needed_columns: BTreeSet<usize>,
        memory_budget: usize,
    ) -> PackResult<Self> {
        ensure!(
            column_offsets.len() == schema.fields().len(),
            OffsetCountMismatchSnafu {
                expected: schema.fields().len(),
                actual: column_offsets.len(),
            }
        );

        let mut columns_by_file: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for &column in &needed_columns {
            ensure!(
                column < schema.fields().len(),
                NeededColumnOutOfRangeSnafu {
                    column,
                    column_count: schema.fields().len(),
                }
            );
            let offset = column_offsets[column];
            ensure!(
                offset.file_index < paths.len(),
                FileIndexOutOfRangeSnafu {
                    column,
                    file_index: offset.file_index,
                    file_count: paths.len(),
                }
            );
            columns_by_file
                .entry(offset.file_index)
                .or_default()
                .insert(offset.column_index);
        }

        // First pass: open and validate every needed file, collecting per-row
        // size estimates before any reader is built.
        let mut pending = Vec::with_capacity(columns_by_file.len());
        let mut per_row_total: usize = 0;
        for (&file_index, physical_columns) in &columns_by_file {
            let path = &paths[file_index];
            let file = storage::open_read_stream(&location, Path::new(path))
                .context(StorageSnafu)?;
            let builder = ParquetRecordBatchReaderBuilder::try_new(file)
                .context(ParquetOpenSnafu { path: path.clone() })?;

            let file_schema = builder.schema().clone();
            for &physical in physical_columns {
                ensure!(
                    physical < file_schema.fields().len(),
                    ColumnIndexOutOfRangeSnafu {
                        path: path.clone(),
                        column_index: physical,
                        column_count: file_schema.fields().len(),
                    }
                );
            }
            for &column in &needed_columns {
                let offset = column_offsets[column];
                if offset.file_index != file_index {
                    continue;
                }
                let expected = schema.field(column);
                let actual = file_schema.field(offset.column_index);
                ensure!(
                    expected.data_type() == actual.data_type(),
                    ColumnTypeMismatchSnafu {
                        column: expected.name().clone(),
                        expected: expected.data_type().clone(),
                        actual: actual.data_type().clone(),
                    }
                );
            }

            per_row_total += estimate_row_bytes(&builder);
            pending.push((file_index, path.clone(), builder, physical_columns));
        }

        // Bound every pull so simultaneously buffered chunks fit the budget.
        let batch_rows = if per_row_total == 0 {
            DEFAULT_READ_BATCH_ROWS
        } else {
            (memory_budget / per_row_total).clamp(1, DEFAULT_READ_BATCH_ROWS)
        };

        let mut files: Vec<Option<FileReaderState>> = (0..paths.len()).map(|_| None).collect();
        for (file_index, path, builder, physical_columns) in pending {
            let projected: Vec<usize> = physical_columns.iter().copied().collect();
            let mask = ProjectionMask::roots(builder.parquet_schema(), projected.clone());
            let reader = builder
                .with_batch_size(batch_rows)
                .with_projection(mask)
                .build()
                .context(ParquetOpenSnafu { path: path.clone() })?;

            debug!("opened packed file {path} projecting {} columns", projected.len());
            files[file_index] = Some(FileReaderState {
                path,
                reader,
                queue: VecDeque::new(),
                consumed: 0,
                buffered_bytes: 0,
                projected,
                exhausted: false,
            });
        }

        Ok(Self {
            output_schema: nullable_for_unneeded(&schema, &needed_columns),
            offsets: column_offsets,
            needed: needed_columns,
            files,
            state: ReaderState::Active,
        })
    }

    /// Schema of the emitted batches: the target schema with columns outside
    /// the needed set marked nullable (they materialize as all-null arrays).
    pub fn schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    /// Cumulative payload bytes of chunks buffered across all open files.
    pub fn buffered_bytes(&self) -> usize {
        self.files
            .iter()
            .flatten()
            .map(|file| file.buffered_bytes)
            .sum()
    }

    /// Drains the remaining batch sequence into one materialized table.
    ///
    /// Fails with a configuration error on a reader that was already drained
    /// (by iteration or a previous `to_table`) or closed; it never silently
    /// returns an empty second table.
    pub fn to_table(&mut self) -> PackResult<RecordBatch> {
        match self.state {
            ReaderState::Active => {}
            ReaderState::Drained => return ReaderExhaustedSnafu.fail(),
            ReaderState::Closed => {
                return AlreadyClosedSnafu {
                    operation: "to_table",
                }
                .fail();
            }
        }

        let mut batches = Vec::new();
        for batch in self.by_ref() {
            batches.push(batch?);
        }
        concat_batches(&self.output_schema, &batches).context(ArrowSnafu)
    }

    /// Releases all opened file handles.
    ///
    /// A second call fails with a configuration error. Readers dropped
    /// without an explicit close release their handles anyway.
    pub fn close(&mut self) -> PackResult<()> {
        match self.state {
            ReaderState::Closed => AlreadyClosedSnafu { operation: "close" }.fail(),
            _ => {
                self.files.clear();
                self.state = ReaderState::Closed;
                Ok(())
            }
        }
    }

    fn next_batch(&mut self) -> PackResult<Option<RecordBatch>> {
        if self.needed.is_empty() {
            return Ok(None);
        }

        let mut exhausted_path: Option<String> = None;
        let mut rows_available: Option<usize> = None;
        for file in self.files.iter_mut().flatten() {
            file.fill()?;
            match file.available_rows() {
                Some(rows) => {
                    rows_available = Some(match rows_available {
                        Some(current) => current.min(rows),
                        None => rows,
                    });
                }
                None => exhausted_path = Some(file.path.clone()),
            }
        }

        let rows = match (rows_available, exhausted_path) {
            (None, _) => return Ok(None),
            (Some(_), Some(path)) => return RowCountMisalignedSnafu { path }.fail(),
            (Some(rows), None) => rows,
        };

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.output_schema.fields().len());
        for (logical, field) in self.output_schema.fields().iter().enumerate() {
            if !self.needed.contains(&logical) {
                columns.push(new_null_array(field.data_type(), rows));
                continue;
            }
            let offset = self.offsets[logical];
            let file = self.files[offset.file_index]
                .as_ref()
                .unwrap_or_else(|| unreachable!("needed columns always have an open file"));
            let (front, _) = file
                .queue
                .front()
                .unwrap_or_else(|| unreachable!("fill buffered a chunk for every open file"));
            let position = file.projected_position(offset.column_index);
            columns.push(front.column(position).slice(file.consumed, rows));
        }

        for file in self.files.iter_mut().flatten() {
            file.advance(rows);
        }

        let batch = RecordBatch::try_new(self.output_schema.clone(), columns)
            .context(ArrowSnafu)?;
        Ok(Some(batch))
    }
}

impl Iterator for PackedRecordBatchReader {
    type Item = PackResult<RecordBatch>;

    /// Pulls the next aligned logical batch.
    ///
    /// On a read failure the in-progress batch is aborted and the sequence
    /// ends; no partial batch is returned.
    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ReaderState::Active => {}
            _ => return None,
        }
        match self.next_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.state = ReaderState::Drained;
                None
            }
            Err(error) => {
                self.state = ReaderState::Drained;
                Some(Err(error))
            }
        }
    }
}

/// Average per-row byte estimate for one file, from row-group metadata.
///
/// Uses uncompressed sizes, which overestimate the projected subset for
/// packed groups; the overestimate only shrinks read increments, keeping
/// buffered bytes under the budget.
fn estimate_row_bytes(builder: &ParquetRecordBatchReaderBuilder<File>) -> usize {
    let mut total_bytes: i64 = 0;
    let mut total_rows: i64 = 0;
    for row_group in builder.metadata().row_groups() {
        total_bytes += row_group.total_byte_size();
        total_rows += row_group.num_rows();
    }
    if total_rows > 0 {
        usize::try_from(total_bytes / total_rows).unwrap_or(1).max(1)
    } else {
        1
    }
}

fn nullable_for_unneeded(schema: &SchemaRef, needed: &BTreeSet<usize>) -> SchemaRef {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| {
            if needed.contains(&index) {
                field.as_ref().clone()
            } else {
                field.as_ref().clone().with_nullable(true)
            }
        })
        .collect();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PackError;
    use crate::storage::StorageError;
    use crate::test_util::{
        TestResult, collect_i32, collect_i64, collect_strings, make_test_batch, make_test_schema,
        test_string,
    };
    use crate::writer::{PackedWriter, PackedWriterOptions};
    use arrow::datatypes::DataType;
    use std::io::Write;
    use tempfile::TempDir;

    /// Writes `batches` test batches of `rows` rows each under
    /// `<tmp>/<base>` and returns the session's column offsets.
    fn write_packed(
        tmp: &TempDir,
        base: &str,
        batches: usize,
        rows: usize,
    ) -> Result<Vec<ColumnOffset>, Box<dyn std::error::Error>> {
        let options = PackedWriterOptions {
            split_threshold: 64,
            ..PackedWriterOptions::default()
        };
        let mut writer = PackedWriter::new(
            TableLocation::local(tmp.path()),
            base,
            make_test_schema(),
            options,
        );

        writer.init(&make_test_batch(rows)?)?;
        for _ in 1..batches {
            writer.write(&make_test_batch(rows)?)?;
        }
        writer.close()?;
        Ok(writer.column_offsets()?.to_vec())
    }

    fn packed_paths(base: &str) -> Vec<String> {
        vec![format!("{base}/0"), format!("{base}/1")]
    }

    fn all_columns() -> BTreeSet<usize> {
        BTreeSet::from([0, 1, 2])
    }

    #[test]
    fn round_trip_recovers_all_batches_in_row_order() -> TestResult {
        let tmp = TempDir::new()?;
        let batches = 5;
        let rows = 3;
        let offsets = write_packed(&tmp, "data", batches, rows)?;

        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            make_test_schema(),
            offsets,
            all_columns(),
            1024 * 1024,
        )?;
        let table = reader.to_table()?;
        reader.close()?;

        assert_eq!(table.num_rows(), batches * rows);

        let mut expected_i32 = Vec::new();
        let mut expected_strs = Vec::new();
        let mut expected_i64 = Vec::new();
        for _ in 0..batches {
            for i in 0..rows {
                expected_i32.push(i as i32);
                expected_strs.push(test_string(i));
                expected_i64.push(i as i64 * 10);
            }
        }

        assert_eq!(collect_i32(&table, "int32"), expected_i32);
        assert_eq!(collect_strings(&table, "str"), expected_strs);
        assert_eq!(collect_i64(&table, "int64"), expected_i64);
        Ok(())
    }

    #[test]
    fn reordered_target_schema_controls_output_order() -> TestResult {
        let tmp = TempDir::new()?;
        write_packed(&tmp, "data", 2, 3)?;

        // Same packed layout addressed through a reordered target schema:
        // the string file is 0, the packed int file is 1.
        let target = Arc::new(Schema::new(vec![
            Field::new("str", DataType::Utf8, false),
            Field::new("int32", DataType::Int32, false),
            Field::new("int64", DataType::Int64, false),
        ]));
        let offsets = vec![
            ColumnOffset::new(0, 0),
            ColumnOffset::new(1, 0),
            ColumnOffset::new(1, 1),
        ];

        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            target,
            offsets,
            all_columns(),
            1024 * 1024,
        )?;
        let table = reader.to_table()?;

        let schema = table.schema();
        let names: Vec<&str> = schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(names, vec!["str", "int32", "int64"]);
        assert_eq!(collect_i32(&table, "int32"), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(
            collect_strings(&table, "str"),
            vec![
                test_string(0),
                test_string(1),
                test_string(2),
                test_string(0),
                test_string(1),
                test_string(2),
            ]
        );
        Ok(())
    }

    #[test]
    fn projection_never_touches_unneeded_files() -> TestResult {
        let tmp = TempDir::new()?;
        let offsets = write_packed(&tmp, "data", 3, 2)?;

        // Deleting the string group file proves the reader does not open it
        // when only the int columns are needed.
        std::fs::remove_file(tmp.path().join("data/0"))?;

        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            make_test_schema(),
            offsets,
            BTreeSet::from([0, 2]),
            1024 * 1024,
        )?;
        let table = reader.to_table()?;

        assert_eq!(table.num_rows(), 6);
        assert_eq!(collect_i32(&table, "int32"), vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(collect_i64(&table, "int64"), vec![0, 10, 0, 10, 0, 10]);

        // The unneeded column keeps its schema position as an all-null array.
        let str_idx = table.schema().index_of("str")?;
        assert!(table.schema().field(str_idx).is_nullable());
        assert_eq!(table.column(str_idx).null_count(), 6);
        Ok(())
    }

    #[test]
    fn mapping_errors_surface_immediately() -> TestResult {
        let tmp = TempDir::new()?;
        let offsets = write_packed(&tmp, "data", 1, 2)?;
        let location = TableLocation::local(tmp.path());

        // Offset count must cover the target schema one-to-one.
        let err = PackedRecordBatchReader::try_new(
            location.clone(),
            packed_paths("data"),
            make_test_schema(),
            offsets[..2].to_vec(),
            all_columns(),
            1024 * 1024,
        )
        .expect_err("offset count mismatch");
        assert!(matches!(err, PackError::OffsetCountMismatch { .. }));

        // Needed column outside the target schema.
        let err = PackedRecordBatchReader::try_new(
            location.clone(),
            packed_paths("data"),
            make_test_schema(),
            offsets.clone(),
            BTreeSet::from([7]),
            1024 * 1024,
        )
        .expect_err("needed column out of range");
        assert!(matches!(err, PackError::NeededColumnOutOfRange { .. }));

        // File index outside the path list.
        let mut bad = offsets.clone();
        bad[0] = ColumnOffset::new(9, 0);
        let err = PackedRecordBatchReader::try_new(
            location.clone(),
            packed_paths("data"),
            make_test_schema(),
            bad,
            all_columns(),
            1024 * 1024,
        )
        .expect_err("file index out of range");
        assert!(matches!(err, PackError::FileIndexOutOfRange { .. }));

        // Physical column outside the file's schema.
        let mut bad = offsets.clone();
        bad[2] = ColumnOffset::new(1, 5);
        let err = PackedRecordBatchReader::try_new(
            location,
            packed_paths("data"),
            make_test_schema(),
            bad,
            all_columns(),
            1024 * 1024,
        )
        .expect_err("physical column out of range");
        assert!(matches!(err, PackError::ColumnIndexOutOfRange { .. }));
        Ok(())
    }

    #[test]
    fn missing_and_truncated_files_fail_to_open() -> TestResult {
        let tmp = TempDir::new()?;
        let offsets = write_packed(&tmp, "data", 1, 2)?;
        let location = TableLocation::local(tmp.path());

        let err = PackedRecordBatchReader::try_new(
            location.clone(),
            vec!["data/0".to_string(), "data/missing".to_string()],
            make_test_schema(),
            offsets.clone(),
            all_columns(),
            1024 * 1024,
        )
        .expect_err("missing file");
        match err {
            PackError::Storage { source } => {
                assert!(matches!(source, StorageError::NotFound { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Truncate a group file below its footer.
        let f = std::fs::OpenOptions::new()
            .write(true)
            .open(tmp.path().join("data/1"))?;
        f.set_len(4)?;

        let err = PackedRecordBatchReader::try_new(
            location,
            packed_paths("data"),
            make_test_schema(),
            offsets,
            all_columns(),
            1024 * 1024,
        )
        .expect_err("truncated file");
        assert!(matches!(err, PackError::ParquetOpen { .. }));
        Ok(())
    }

    #[test]
    fn mismatched_column_type_is_a_mapping_error() -> TestResult {
        let tmp = TempDir::new()?;
        let offsets = write_packed(&tmp, "data", 1, 2)?;

        // Swap the int32/int64 offsets so each lands on the wrong field.
        let mut bad = offsets;
        bad.swap(0, 2);

        let err = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            make_test_schema(),
            bad,
            all_columns(),
            1024 * 1024,
        )
        .expect_err("column type mismatch");
        assert!(matches!(err, PackError::ColumnTypeMismatch { .. }));
        Ok(())
    }

    #[test]
    fn misaligned_files_abort_with_format_error() -> TestResult {
        let tmp = TempDir::new()?;
        write_packed(&tmp, "long", 5, 2)?;
        write_packed(&tmp, "short", 1, 2)?;

        // One file from each session: 10 rows against 2 rows.
        let paths = vec!["long/1".to_string(), "short/1".to_string()];
        let offsets = vec![
            ColumnOffset::new(0, 0),
            ColumnOffset::new(0, 0),
            ColumnOffset::new(1, 1),
        ];
        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            paths,
            make_test_schema(),
            offsets,
            BTreeSet::from([0, 2]),
            1024 * 1024,
        )?;

        let err = reader.to_table().expect_err("misaligned row counts");
        assert!(matches!(err, PackError::RowCountMisaligned { .. }));
        Ok(())
    }

    #[test]
    fn to_table_twice_and_double_close_fail() -> TestResult {
        let tmp = TempDir::new()?;
        let offsets = write_packed(&tmp, "data", 2, 2)?;

        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            make_test_schema(),
            offsets,
            all_columns(),
            1024 * 1024,
        )?;

        reader.to_table()?;
        let err = reader.to_table().expect_err("second to_table");
        assert!(matches!(err, PackError::ReaderExhausted));

        reader.close()?;
        let err = reader.close().expect_err("double close");
        assert!(matches!(err, PackError::AlreadyClosed { .. }));

        let err = reader.to_table().expect_err("to_table after close");
        assert!(matches!(err, PackError::AlreadyClosed { .. }));
        Ok(())
    }

    #[test]
    fn buffered_bytes_respect_memory_budget() -> TestResult {
        use parquet::file::properties::WriterProperties;

        let tmp = TempDir::new()?;

        // Plain-encoded pages keep the file's uncompressed sizes close to the
        // decoded payload, which is what the row-size estimate reads.
        let options = PackedWriterOptions {
            split_threshold: 64,
            writer_properties: WriterProperties::builder()
                .set_dictionary_enabled(false)
                .build(),
            ..PackedWriterOptions::default()
        };
        let mut writer = PackedWriter::new(
            TableLocation::local(tmp.path()),
            "data",
            make_test_schema(),
            options,
        );
        writer.init(&make_test_batch(4)?)?;
        for _ in 1..16 {
            writer.write(&make_test_batch(4)?)?;
        }
        writer.close()?;
        let offsets = writer.column_offsets()?.to_vec();

        let budget = 64 * 1024;
        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            make_test_schema(),
            offsets,
            all_columns(),
            budget,
        )?;

        let mut rows_seen = 0;
        while let Some(batch) = reader.next() {
            let batch = batch?;
            assert!(reader.buffered_bytes() <= budget);
            rows_seen += batch.num_rows();
        }
        assert_eq!(rows_seen, 64);
        Ok(())
    }

    #[test]
    fn empty_projection_yields_no_batches() -> TestResult {
        let tmp = TempDir::new()?;
        let offsets = write_packed(&tmp, "data", 2, 2)?;

        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            make_test_schema(),
            offsets,
            BTreeSet::new(),
            1024 * 1024,
        )?;

        assert!(reader.next().is_none());
        let err = reader.to_table().expect_err("drained after empty pull");
        assert!(matches!(err, PackError::ReaderExhausted));
        Ok(())
    }

    #[test]
    fn read_failure_mid_stream_aborts_without_partial_batch() -> TestResult {
        let tmp = TempDir::new()?;
        let offsets = write_packed(&tmp, "data", 8, 4)?;

        // Small budget forces several pulls, so corruption past the first
        // pages surfaces mid-iteration rather than at open.
        let mut reader = PackedRecordBatchReader::try_new(
            TableLocation::local(tmp.path()),
            packed_paths("data"),
            make_test_schema(),
            offsets,
            all_columns(),
            32 * 1024,
        )?;

        // Overwrite the string file's data pages while keeping its footer:
        // the metadata stays readable, the pages do not.
        let path = tmp.path().join("data/0");
        let original = std::fs::read(&path)?;
        let corrupted = vec![0xFF; original.len() / 2];
        let mut f = std::fs::OpenOptions::new().write(true).open(&path)?;
        f.write_all(&corrupted)?;
        f.flush()?;
        drop(f);

        let mut saw_error = false;
        for batch in reader.by_ref() {
            match batch {
                Ok(b) => assert_eq!(b.schema().fields().len(), 3),
                Err(err) => {
                    assert!(matches!(err, PackError::ReadBatch { .. }));
                    saw_error = true;
                    break;
                }
            }
        }
        assert!(saw_error, "corrupted pages must surface a read error");

        // The sequence ended with the failure; no further batches appear.
        assert!(reader.next().is_none());
        Ok(())
    }
}

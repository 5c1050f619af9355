use arrow::array::{Int32Builder, Int64Builder, RecordBatch, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Width of the string payload in test batches; large enough that the string
/// column always classifies as oversized against small thresholds.
pub(crate) const TEST_STR_LEN: usize = 10_000;

pub(crate) fn make_test_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("int32", DataType::Int32, false),
        Field::new("str", DataType::Utf8, false),
        Field::new("int64", DataType::Int64, false),
    ]))
}

/// Builds a batch over [`make_test_schema`] with deterministic per-row values:
/// row `i` holds `(i, <10000 repeats of a letter cycling by i>, i * 10)`.
pub(crate) fn make_test_batch(rows: usize) -> Result<RecordBatch, Box<dyn std::error::Error>> {
    let mut int32_builder = Int32Builder::with_capacity(rows);
    let mut str_builder = StringBuilder::with_capacity(rows, rows * TEST_STR_LEN);
    let mut int64_builder = Int64Builder::with_capacity(rows);

    for i in 0..rows {
        int32_builder.append_value(i as i32);
        str_builder.append_value(test_string(i));
        int64_builder.append_value(i as i64 * 10);
    }

    let batch = RecordBatch::try_new(
        make_test_schema(),
        vec![
            Arc::new(int32_builder.finish()),
            Arc::new(str_builder.finish()),
            Arc::new(int64_builder.finish()),
        ],
    )?;
    Ok(batch)
}

pub(crate) fn test_string(row: usize) -> String {
    let letter = (b'a' + (row % 26) as u8) as char;
    letter.to_string().repeat(TEST_STR_LEN)
}

pub(crate) fn collect_i32(batch: &RecordBatch, name: &str) -> Vec<i32> {
    let idx = batch.schema().index_of(name).expect("column present");
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<arrow::array::Int32Array>()
        .expect("int32 column")
        .iter()
        .map(|v| v.expect("non-null value"))
        .collect()
}

pub(crate) fn collect_i64(batch: &RecordBatch, name: &str) -> Vec<i64> {
    let idx = batch.schema().index_of(name).expect("column present");
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<arrow::array::Int64Array>()
        .expect("int64 column")
        .iter()
        .map(|v| v.expect("non-null value"))
        .collect()
}

pub(crate) fn collect_strings(batch: &RecordBatch, name: &str) -> Vec<String> {
    let idx = batch.schema().index_of(name).expect("column present");
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<arrow::array::StringArray>()
        .expect("utf8 column")
        .iter()
        .map(|v| v.expect("non-null value").to_string())
        .collect()
}

#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use arrow::{
    array::{Array, ArrayRef, AsArray, Int64Array, RecordBatchIterator, RecordBatchReader, StringArray},
    datatypes::{DataType, Int64Type},
    error::ArrowError,
    record_batch::RecordBatch,
};
use tablet_scan::{
    BatchStatus, ReadError, Reader, ReaderStatistics, Schema, SegmentHandle, StorageManager,
    TabletId, VersionRange,
};

pub const TABLET: TabletId = 11;

/// One row of the fixture schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub id: i64,
    pub value: Option<i64>,
    pub name: Option<String>,
}

impl Row {
    pub fn new(id: i64, value: i64, name: &str) -> Self {
        Self {
            id,
            value: Some(value),
            name: Some(name.to_string()),
        }
    }
}

/// `id` key, nullable `value` and `name`.
pub fn schema() -> Schema {
    Schema::builder()
        .key_column(1, "id", DataType::Int64)
        .column(2, "value", DataType::Int64, true)
        .column(3, "name", DataType::Utf8, true)
        .build()
        .expect("fixture schema")
}

pub fn segment(rows: &[Row]) -> RecordBatch {
    let schema = schema();
    let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.id)));
    let values: ArrayRef = Arc::new(Int64Array::from(
        rows.iter().map(|r| r.value).collect::<Vec<_>>(),
    ));
    let names: ArrayRef = Arc::new(StringArray::from(
        rows.iter().map(|r| r.name.as_deref()).collect::<Vec<_>>(),
    ));
    RecordBatch::try_new(Arc::clone(schema.arrow_schema()), vec![ids, values, names])
        .expect("fixture segment")
}

/// Rows whose value is ten times the key and whose name is `v<version>`.
pub fn versioned(keys: &[i64], version: u64) -> Vec<Row> {
    keys.iter()
        .map(|id| Row::new(*id, id * 10, &format!("v{version}")))
        .collect()
}

pub fn rows_of(batch: &RecordBatch) -> Vec<Row> {
    let ids = batch.column(0).as_primitive::<Int64Type>();
    let values = batch.column(1).as_primitive::<Int64Type>();
    let names = batch.column(2).as_string::<i32>();
    (0..batch.num_rows())
        .map(|row| Row {
            id: ids.value(row),
            value: (!values.is_null(row)).then(|| values.value(row)),
            name: (!names.is_null(row)).then(|| names.value(row).to_string()),
        })
        .collect()
}

/// Pull every batch, checking capacity on the way.
pub fn drain(reader: &mut Reader) -> Result<Vec<Row>, ReadError> {
    let mut batch = reader.new_batch();
    let mut rows = Vec::new();
    while reader.next_batch(&mut batch)? == BatchStatus::Filled {
        assert!(batch.num_rows() > 0, "filled batches are never empty");
        assert!(batch.num_rows() <= batch.capacity());
        let record_batch = batch.record_batch().expect("filled batch has data");
        rows.extend(rows_of(record_batch));
    }
    Ok(rows)
}

pub fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().map(|row| row.id).collect()
}

/// Storage wrapper injecting failures into an inner store.
pub struct FaultyStore<S> {
    inner: S,
    fail_open: AtomicBool,
    fail_after_first_block: AtomicBool,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_open: AtomicBool::new(false),
            fail_after_first_block: AtomicBool::new(false),
        }
    }

    pub fn fail_open(self) -> Self {
        self.fail_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_after_first_block(self) -> Self {
        self.fail_after_first_block.store(true, Ordering::SeqCst);
        self
    }
}

impl<S: StorageManager> StorageManager for FaultyStore<S> {
    fn resolve(
        &self,
        tablet: TabletId,
        versions: VersionRange,
    ) -> Result<Vec<SegmentHandle>, ReadError> {
        self.inner.resolve(tablet, versions)
    }

    fn open_segment(
        &self,
        handle: &SegmentHandle,
        batch_size: usize,
        stats: &mut ReaderStatistics,
    ) -> Result<Box<dyn RecordBatchReader + Send>, ReadError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "segment unavailable").into());
        }
        let reader = self.inner.open_segment(handle, batch_size, stats)?;
        if !self.fail_after_first_block.load(Ordering::SeqCst) {
            return Ok(reader);
        }
        let schema = reader.schema();
        let mut blocks: Vec<Result<RecordBatch, ArrowError>> = reader.take(1).collect();
        blocks.push(Err(ArrowError::IoError(
            "checksum mismatch".to_string(),
            std::io::Error::new(std::io::ErrorKind::InvalidData, "checksum mismatch"),
        )));
        Ok(Box::new(RecordBatchIterator::new(blocks, schema)))
    }
}

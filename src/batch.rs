//! Fixed-capacity columnar batch passed between iterators.

use std::sync::Arc;

use arrow::{
    array::ArrayRef,
    datatypes::SchemaRef,
    record_batch::{RecordBatch, RecordBatchOptions},
};

use crate::error::{AllocationError, ReadError};

/// Default number of rows per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Columnar window of rows with a fixed row capacity.
///
/// The caller owns the batch and hands it to a producer, which replaces its
/// contents on every successful call. Whatever the batch held before the call
/// is dropped, so callers must finish reading a batch before refilling it.
#[derive(Debug)]
pub struct Batch {
    schema: SchemaRef,
    capacity: usize,
    data: Option<RecordBatch>,
}

impl Batch {
    /// Create an empty batch for `schema` holding at most `capacity` rows.
    pub fn new(schema: SchemaRef, capacity: usize) -> Self {
        Self {
            schema,
            capacity: capacity.max(1),
            data: None,
        }
    }

    /// Create an empty batch with [`DEFAULT_CHUNK_SIZE`] rows of capacity.
    pub fn with_default_capacity(schema: SchemaRef) -> Self {
        Self::new(schema, DEFAULT_CHUNK_SIZE)
    }

    /// Arrow schema of the batch.
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// Maximum number of rows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Rows currently held.
    pub fn num_rows(&self) -> usize {
        self.data.as_ref().map_or(0, RecordBatch::num_rows)
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Columns currently held, empty when the batch was reset.
    pub fn columns(&self) -> &[ArrayRef] {
        match &self.data {
            Some(data) => data.columns(),
            None => &[],
        }
    }

    /// Column at a position.
    pub fn column(&self, idx: usize) -> Option<&ArrayRef> {
        self.columns().get(idx)
    }

    /// Borrow the contents as a record batch.
    pub fn record_batch(&self) -> Option<&RecordBatch> {
        self.data.as_ref()
    }

    /// Replace the contents with `columns`, all of length `rows`.
    pub fn fill(&mut self, columns: Vec<ArrayRef>, rows: usize) -> Result<(), ReadError> {
        if rows > self.capacity {
            return Err(AllocationError::BatchOverflow {
                rows,
                capacity: self.capacity,
            }
            .into());
        }
        let options = RecordBatchOptions::new().with_row_count(Some(rows));
        let data = RecordBatch::try_new_with_options(Arc::clone(&self.schema), columns, &options)?;
        self.data = Some(data);
        Ok(())
    }

    /// Move the contents out, leaving the batch empty.
    pub fn take(&mut self) -> Option<RecordBatch> {
        self.data.take()
    }

    /// Drop the contents so the batch can be handed back to a producer.
    pub fn reset(&mut self) {
        self.data = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, Int64Array, StringArray},
        datatypes::{DataType, Field, Schema},
    };

    use super::Batch;
    use crate::error::{AllocationError, ReadError};

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]))
    }

    #[test]
    fn fill_replaces_previous_contents() {
        let mut batch = Batch::new(schema(), 4);
        let ids: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
        let names: ArrayRef = Arc::new(StringArray::from(vec![Some("a"), None]));
        batch.fill(vec![ids, names], 2).expect("fill");
        assert_eq!(batch.num_rows(), 2);

        let ids: ArrayRef = Arc::new(Int64Array::from(vec![9]));
        let names: ArrayRef = Arc::new(StringArray::from(vec!["z"]));
        batch.fill(vec![ids, names], 1).expect("refill");
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.columns().len(), 2);

        batch.reset();
        assert!(batch.is_empty());
        assert!(batch.columns().is_empty());
    }

    #[test]
    fn overflow_is_an_allocation_error() {
        let mut batch = Batch::new(schema(), 1);
        let ids: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
        let names: ArrayRef = Arc::new(StringArray::from(vec!["a", "b"]));
        let err = batch.fill(vec![ids, names], 2).expect_err("over capacity");
        assert!(matches!(
            err,
            ReadError::Allocation(AllocationError::BatchOverflow {
                rows: 2,
                capacity: 1
            })
        ));
    }

    #[test]
    fn mismatched_columns_are_rejected() {
        let mut batch = Batch::new(schema(), 8);
        let ids: ArrayRef = Arc::new(Int64Array::from(vec![1, 2]));
        assert!(matches!(
            batch.fill(vec![ids], 2),
            Err(ReadError::Resource(_))
        ));
    }
}

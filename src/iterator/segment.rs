use std::{cmp, mem, ops::Range, sync::Arc};

use arrow::{
    array::{ArrayRef, RecordBatchReader, UInt32Array},
    compute::take,
    record_batch::RecordBatch,
};
use tablet_predicate::{ColumnId, Predicate};

use super::{BatchStatus, ChunkIterator};
use crate::{
    batch::Batch,
    error::{AllocationError, ReadError},
    eval::{scalar_at, BlockPruner, RowEvaluator},
    observability::log_debug,
    scan::{excludes_every_key, KeyRange},
    schema::Schema,
    stats::ReaderStatistics,
    storage::SegmentHandle,
};

/// Read options bound to one leaf when it is opened.
#[derive(Clone, Debug, Default)]
pub struct SegmentReadOptions {
    /// Key ranges, OR'ed; empty means every key.
    pub key_ranges: Vec<KeyRange>,
    /// Conjuncts evaluated inside the leaf.
    pub predicates: Vec<Predicate>,
    /// Delete conjunctions of the segment's version evaluated inside the leaf.
    pub delete_conjunctions: Vec<Predicate>,
    /// Rows per physical block.
    pub chunk_size: usize,
    /// Reserved cache flag.
    pub use_page_cache: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LeafState {
    Created,
    Reading,
    Exhausted,
    Closed,
}

struct Pending {
    block: RecordBatch,
    selected: Vec<u32>,
    offset: usize,
}

/// Leaf producer over one sorted segment.
///
/// Blocks are pulled from the segment's physical reader, trimmed to the
/// union of the key-range windows, pruned as a whole when the first key
/// column's bounds rule out a pushed predicate, and filtered row by row.
/// Batches carry the segment's physical schema.
pub struct SegmentIterator {
    handle: SegmentHandle,
    producer_id: u64,
    schema: Schema,
    source: Option<Box<dyn RecordBatchReader + Send>>,
    key_ranges: Vec<KeyRange>,
    predicates: Vec<Predicate>,
    deletes: Vec<Predicate>,
    prune_column: Option<ColumnId>,
    deferred_predicates: Vec<Predicate>,
    deferred_deletes: Vec<Predicate>,
    use_page_cache: bool,
    pending: Option<Pending>,
    state: LeafState,
}

impl SegmentIterator {
    /// Wrap the physical reader of `handle`.
    ///
    /// Predicates and delete conjunctions referencing columns the segment does
    /// not store are set aside; see [`SegmentIterator::take_deferred`].
    pub fn new(
        handle: SegmentHandle,
        producer_id: u64,
        source: Box<dyn RecordBatchReader + Send>,
        options: SegmentReadOptions,
    ) -> Result<Self, ReadError> {
        let schema = Schema::from_arrow(source.schema())?;
        let stored = |predicate: &Predicate| {
            predicate
                .column_ids()
                .iter()
                .all(|column| schema.contains(*column))
        };
        let (predicates, deferred_predicates): (Vec<_>, Vec<_>) =
            options.predicates.into_iter().partition(|p| stored(p));
        let (deletes, deferred_deletes): (Vec<_>, Vec<_>) = options
            .delete_conjunctions
            .into_iter()
            .partition(|p| stored(p));
        let prune_column = schema.key_column_ids().first().copied();

        Ok(Self {
            handle,
            producer_id,
            schema,
            source: Some(source),
            key_ranges: options.key_ranges,
            predicates,
            deletes,
            prune_column,
            deferred_predicates,
            deferred_deletes,
            use_page_cache: options.use_page_cache,
            pending: None,
            state: LeafState::Created,
        })
    }

    /// Segment this leaf reads.
    pub fn handle(&self) -> SegmentHandle {
        self.handle
    }

    /// Whether the reserved cache flag was set for this leaf.
    pub fn page_cache_requested(&self) -> bool {
        self.use_page_cache
    }

    /// Move out the predicates and delete conjunctions that could not run
    /// against the physical schema, to be evaluated after conversion.
    pub fn take_deferred(&mut self) -> (Vec<Predicate>, Vec<Predicate>) {
        (
            mem::take(&mut self.deferred_predicates),
            mem::take(&mut self.deferred_deletes),
        )
    }

    fn finish(&mut self) {
        self.source = None;
        self.pending = None;
        if self.state != LeafState::Closed {
            self.state = LeafState::Exhausted;
        }
    }

    fn emit(&mut self, batch: &mut Batch) -> Result<bool, ReadError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(false);
        };
        let remaining = pending.selected.len() - pending.offset;
        let len = cmp::min(remaining, batch.capacity());
        let run = &pending.selected[pending.offset..pending.offset + len];
        let first = run[0] as usize;
        let last = run[len - 1] as usize;

        if last - first + 1 == len {
            let slice = pending.block.slice(first, len);
            batch.fill(slice.columns().to_vec(), len)?;
        } else {
            let indices = UInt32Array::from(run.to_vec());
            let columns = pending
                .block
                .columns()
                .iter()
                .map(|column| take(column.as_ref(), &indices, None))
                .collect::<Result<Vec<_>, _>>()?;
            batch.fill(columns, len)?;
        }

        pending.offset += len;
        if pending.offset == pending.selected.len() {
            self.pending = None;
        }
        Ok(true)
    }

    fn row_windows(
        &mut self,
        keys: &[ArrayRef],
        num_rows: usize,
    ) -> Result<Vec<Range<usize>>, ReadError> {
        if self.key_ranges.is_empty() {
            return Ok(vec![0..num_rows]);
        }
        let mut windows = self
            .key_ranges
            .iter()
            .filter(|range| !range.is_empty())
            .map(|range| range.row_window(keys, num_rows))
            .collect::<Result<Vec<_>, _>>()?;
        if windows.iter().all(|window| window.end < num_rows) {
            // every upper bound lies inside this block
            log_debug!(
                component = "segment",
                event = "segment_early_stop",
                tablet = self.handle.tablet,
                version = self.handle.version,
                segment = self.handle.segment_id,
            );
            self.source = None;
        }
        windows.retain(|window| !window.is_empty());
        windows.sort_by_key(|window| window.start);

        let mut merged: Vec<Range<usize>> = Vec::with_capacity(windows.len());
        for window in windows {
            match merged.last_mut() {
                Some(last) if window.start <= last.end => last.end = last.end.max(window.end),
                _ => merged.push(window),
            }
        }
        Ok(merged)
    }

    fn block_may_match(
        &self,
        keys: &[ArrayRef],
        windows: &[Range<usize>],
    ) -> Result<bool, ReadError> {
        let (Some(column), Some(first), Some(last)) =
            (self.prune_column, windows.first(), windows.last())
        else {
            return Ok(true);
        };
        let mut pushed = self
            .predicates
            .iter()
            .filter(|predicate| predicate.column_id() == Some(column))
            .peekable();
        if pushed.peek().is_none() {
            return Ok(true);
        }
        let min = scalar_at(keys[0].as_ref(), first.start)?;
        let max = scalar_at(keys[0].as_ref(), last.end - 1)?;
        let mut pruner = BlockPruner::new(column, min, max, true);
        Ok(pushed.all(|predicate| pruner.may_match(predicate)))
    }

    fn select_rows(
        &mut self,
        block: &RecordBatch,
        stats: &mut ReaderStatistics,
    ) -> Result<Vec<u32>, ReadError> {
        let num_rows = block.num_rows();
        let keys: Vec<ArrayRef> = self
            .schema
            .key_indices()
            .map(|idx| Arc::clone(block.column(idx)))
            .collect();
        let windows = self.row_windows(&keys, num_rows)?;
        let covered: usize = windows.iter().map(ExactSizeIterator::len).sum();
        stats.rows_key_range_filtered += (num_rows - covered) as u64;
        stats.raw_rows_read += covered as u64;
        if covered == 0 {
            return Ok(Vec::new());
        }

        if !self.block_may_match(&keys, &windows)? {
            stats.blocks_pruned += 1;
            stats.rows_pred_filtered += covered as u64;
            return Ok(Vec::new());
        }

        let mut selected = Vec::with_capacity(covered);
        for row in windows.into_iter().flatten() {
            let mut evaluator = RowEvaluator::new(&self.schema, block.columns(), row);
            if evaluator.matches_any(&self.deletes)? {
                stats.rows_del_filtered += 1;
                continue;
            }
            if !evaluator.matches_all(&self.predicates)? {
                stats.rows_pred_filtered += 1;
                continue;
            }
            let row = u32::try_from(row).map_err(|_| AllocationError::BatchOverflow {
                rows: num_rows,
                capacity: u32::MAX as usize,
            })?;
            selected.push(row);
        }
        Ok(selected)
    }
}

impl ChunkIterator for SegmentIterator {
    fn init(&mut self) -> Result<(), ReadError> {
        if self.state != LeafState::Created {
            return Err(ReadError::InvalidState {
                op: "init",
                state: "already initialized",
            });
        }
        self.state = LeafState::Reading;
        if excludes_every_key(&self.key_ranges) {
            self.finish();
        }
        Ok(())
    }

    fn next_batch(
        &mut self,
        batch: &mut Batch,
        stats: &mut ReaderStatistics,
    ) -> Result<BatchStatus, ReadError> {
        match self.state {
            LeafState::Created => {
                return Err(ReadError::InvalidState {
                    op: "next_batch",
                    state: "not initialized",
                })
            }
            LeafState::Closed => {
                return Err(ReadError::InvalidState {
                    op: "next_batch",
                    state: "closed",
                })
            }
            LeafState::Reading | LeafState::Exhausted => {}
        }

        loop {
            if self.emit(batch)? {
                return Ok(BatchStatus::Filled);
            }
            let Some(source) = self.source.as_mut() else {
                self.finish();
                batch.reset();
                return Ok(BatchStatus::EndOfStream);
            };
            let block = match source.next() {
                Some(block) => block?,
                None => {
                    self.finish();
                    continue;
                }
            };
            let selected = self.select_rows(&block, stats)?;
            if !selected.is_empty() {
                self.pending = Some(Pending {
                    block,
                    selected,
                    offset: 0,
                });
            }
        }
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn producer_id(&self) -> u64 {
        self.producer_id
    }

    fn is_lazy_materialization(&self) -> bool {
        !self.predicates.is_empty() || !self.deletes.is_empty()
    }

    fn close(&mut self) {
        self.source = None;
        self.pending = None;
        self.state = LeafState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use std::{ops::Bound, sync::Arc};

    use arrow::{
        array::{Array, ArrayRef, AsArray, Int64Array, RecordBatchIterator, StringArray},
        datatypes::{DataType, Int64Type},
        record_batch::RecordBatch,
    };
    use tablet_predicate::Predicate;

    use super::{SegmentIterator, SegmentReadOptions};
    use crate::{
        batch::Batch,
        error::ReadError,
        iterator::{BatchStatus, ChunkIterator},
        scan::KeyRange,
        schema::Schema,
        stats::ReaderStatistics,
        storage::SegmentHandle,
    };

    fn schema() -> Schema {
        Schema::builder()
            .key_column(1, "id", DataType::Int64)
            .column(2, "name", DataType::Utf8, true)
            .build()
            .expect("schema")
    }

    // two blocks of four rows: ids 0..8, names "n0".."n7"
    fn leaf(options: SegmentReadOptions) -> SegmentIterator {
        let schema = schema();
        let blocks: Vec<_> = [0i64, 4]
            .into_iter()
            .map(|start| {
                let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(start..start + 4));
                let names: ArrayRef = Arc::new(StringArray::from_iter_values(
                    (start..start + 4).map(|i| format!("n{i}")),
                ));
                RecordBatch::try_new(Arc::clone(schema.arrow_schema()), vec![ids, names])
            })
            .collect();
        let source = RecordBatchIterator::new(blocks, Arc::clone(schema.arrow_schema()));
        let handle = SegmentHandle::new(1, 1, 0);
        let mut leaf =
            SegmentIterator::new(handle, 0, Box::new(source), options).expect("leaf");
        leaf.init().expect("init");
        leaf
    }

    fn drain(leaf: &mut SegmentIterator, capacity: usize) -> (Vec<i64>, ReaderStatistics) {
        let mut stats = ReaderStatistics::default();
        let mut batch = Batch::new(Arc::clone(leaf.schema().arrow_schema()), capacity);
        let mut ids = Vec::new();
        while leaf.next_batch(&mut batch, &mut stats).expect("next") == BatchStatus::Filled {
            assert!(batch.num_rows() <= capacity);
            let column = batch.column(0).expect("id column");
            ids.extend(column.as_primitive::<Int64Type>().values().iter().copied());
        }
        (ids, stats)
    }

    #[test]
    fn overlapping_ranges_yield_each_row_once() {
        let options = SegmentReadOptions {
            key_ranges: vec![
                KeyRange::new(Bound::Included(vec![1i64.into()]), Bound::Included(vec![5i64.into()])),
                KeyRange::new(Bound::Included(vec![3i64.into()]), Bound::Excluded(vec![7i64.into()])),
            ],
            chunk_size: 4,
            ..SegmentReadOptions::default()
        };
        let mut leaf = leaf(options);
        let (ids, stats) = drain(&mut leaf, 3);
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(stats.raw_rows_read, 6);
        assert_eq!(stats.rows_key_range_filtered, 2);
    }

    #[test]
    fn predicates_deletes_and_block_pruning() {
        let options = SegmentReadOptions {
            predicates: vec![Predicate::ge(1, 4i64), Predicate::ne(2, "n6")],
            delete_conjunctions: vec![Predicate::eq(1, 5i64)],
            chunk_size: 4,
            ..SegmentReadOptions::default()
        };
        let mut leaf = leaf(options);
        assert!(leaf.is_lazy_materialization());
        let (ids, stats) = drain(&mut leaf, 8);
        assert_eq!(ids, vec![4, 7]);
        assert_eq!(stats.blocks_pruned, 1);
        assert_eq!(stats.rows_pred_filtered, 5);
        assert_eq!(stats.rows_del_filtered, 1);
        assert_eq!(stats.raw_rows_read, 8);
    }

    #[test]
    fn predicates_on_unknown_columns_are_deferred() {
        let options = SegmentReadOptions {
            predicates: vec![Predicate::is_null(9), Predicate::gt(1, 2i64)],
            delete_conjunctions: vec![Predicate::eq(9, 1i64)],
            chunk_size: 4,
            use_page_cache: true,
            ..SegmentReadOptions::default()
        };
        let mut leaf = leaf(options);
        assert_eq!(leaf.handle(), SegmentHandle::new(1, 1, 0));
        assert!(leaf.page_cache_requested());
        let (predicates, deletes) = leaf.take_deferred();
        assert_eq!(predicates, vec![Predicate::is_null(9)]);
        assert_eq!(deletes, vec![Predicate::eq(9, 1i64)]);
        let (ids, _) = drain(&mut leaf, 8);
        assert_eq!(ids, vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn protocol_misuse_and_idempotent_end_of_stream() {
        let empty = KeyRange::new(Bound::Included(vec![5i64.into()]), Bound::Included(vec![1i64.into()]));
        let mut leaf = leaf(SegmentReadOptions {
            key_ranges: vec![empty],
            chunk_size: 4,
            ..SegmentReadOptions::default()
        });
        assert!(matches!(leaf.init(), Err(ReadError::InvalidState { op: "init", .. })));

        let mut stats = ReaderStatistics::default();
        let mut batch = Batch::new(Arc::clone(leaf.schema().arrow_schema()), 4);
        for _ in 0..2 {
            let status = leaf.next_batch(&mut batch, &mut stats).expect("eos");
            assert_eq!(status, BatchStatus::EndOfStream);
        }
        assert_eq!(stats.raw_rows_read, 0);

        leaf.close();
        leaf.close();
        assert!(matches!(
            leaf.next_batch(&mut batch, &mut stats),
            Err(ReadError::InvalidState { .. })
        ));
        assert!(batch.column(0).map_or(true, |c| c.is_empty()));
    }
}

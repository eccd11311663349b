use std::{cmp::Ordering, ops::Range, sync::Arc};

use arrow::{
    array::Array,
    compute::interleave,
    record_batch::RecordBatch,
    row::{Row, RowConverter, SortField},
};
use tablet_predicate::Predicate;

use super::{BatchStatus, ChunkIterator, ScanIterator};
use crate::{
    arena::{ScanArena, SourceId},
    batch::Batch,
    error::ReadError,
    eval::RowEvaluator,
    scan::{DeletePredicates, Version},
    schema::Schema,
    stats::ReaderStatistics,
};

/// One producer fed into a [`MergeIterator`].
pub struct MergeInput {
    /// Producer emitting batches in the target schema, sorted by key.
    pub iterator: ScanIterator,
    /// Rowset version the producer reads.
    pub version: Version,
}

struct Cursor {
    iterator: ScanIterator,
    version: Version,
    producer_id: u64,
    buffer: Batch,
    window: Option<SourceId>,
    pos: usize,
    len: usize,
}

impl Cursor {
    fn key<'a>(&self, arena: &'a ScanArena) -> Option<Row<'a>> {
        let keys = arena.keys(self.window?)?;
        Some(keys.row(self.pos))
    }
}

/// Cursors plus the arena holding their keys.
struct Heads<'a> {
    cursors: &'a [Cursor],
    arena: &'a ScanArena,
}

impl Heads<'_> {
    // Smaller key first; on equal keys the newer producer first.
    fn order(&self, a: usize, b: usize) -> Ordering {
        let (left, right) = (&self.cursors[a], &self.cursors[b]);
        match (left.key(self.arena), right.key(self.arena)) {
            (Some(l), Some(r)) => l
                .cmp(&r)
                .then_with(|| right.producer_id.cmp(&left.producer_id)),
            _ => Ordering::Equal,
        }
    }
}

/// Binary min-heap of cursor slots ordered by [`Heads::order`].
#[derive(Default)]
struct CursorHeap {
    slots: Vec<usize>,
}

impl CursorHeap {
    fn peek(&self) -> Option<usize> {
        self.slots.first().copied()
    }

    fn push(&mut self, slot: usize, heads: &Heads<'_>) {
        self.slots.push(slot);
        self.sift_up(self.slots.len() - 1, heads);
    }

    fn pop(&mut self, heads: &Heads<'_>) -> Option<usize> {
        if self.slots.is_empty() {
            return None;
        }
        let top = self.slots.swap_remove(0);
        self.sift_down(0, heads);
        Some(top)
    }

    fn sift_up(&mut self, mut idx: usize, heads: &Heads<'_>) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if heads.order(self.slots[idx], self.slots[parent]) != Ordering::Less {
                break;
            }
            self.slots.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize, heads: &Heads<'_>) {
        let len = self.slots.len();
        loop {
            let left = 2 * idx + 1;
            let right = left + 1;
            let mut smallest = idx;
            if left < len
                && heads.order(self.slots[left], self.slots[smallest]) == Ordering::Less
            {
                smallest = left;
            }
            if right < len
                && heads.order(self.slots[right], self.slots[smallest]) == Ordering::Less
            {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.slots.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}

/// Conjuncts and delete statements that could not be pushed to the leaves.
struct ResidualFilter {
    predicates: Vec<Predicate>,
    deletes: DeletePredicates,
}

impl ResidualFilter {
    fn keep(
        &self,
        schema: &Schema,
        window: &RecordBatch,
        row: usize,
        version: Version,
        stats: &mut ReaderStatistics,
    ) -> Result<bool, ReadError> {
        let mut evaluator = RowEvaluator::new(schema, window.columns(), row);
        if evaluator.matches_any(self.deletes.for_version(version))? {
            stats.rows_del_filtered += 1;
            return Ok(false);
        }
        if !evaluator.matches_all(&self.predicates)? {
            stats.rows_pred_filtered += 1;
            return Ok(false);
        }
        Ok(true)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MergeState {
    Created,
    Streaming,
    Exhausted,
    Closed,
}

/// K-way merge of sorted producers with last-writer-wins de-duplication.
///
/// The newest producer's row for a key wins; every other row with the same key
/// is collapsed and counted in `merged_rows`. A winning row is then checked
/// against the residual delete statements of its version and the residual
/// predicates. Collapsing is decided against the previous winner, so a
/// deleted newest version hides every older version of its key.
pub struct MergeIterator {
    schema: Schema,
    cursors: Vec<Cursor>,
    heap: CursorHeap,
    arena: ScanArena,
    converter: RowConverter,
    residual: ResidualFilter,
    // window and row of the last key that won, pinned until the next sweep
    last_winner: Option<(SourceId, usize)>,
    primed: bool,
    state: MergeState,
}

impl MergeIterator {
    /// Merge `inputs`, all producing batches in `schema`.
    ///
    /// `chunk_size` bounds the rows pulled from a producer at once;
    /// `memory_limit` bounds the bytes pinned by the merge.
    pub fn new(
        schema: Schema,
        inputs: Vec<MergeInput>,
        predicates: Vec<Predicate>,
        deletes: DeletePredicates,
        chunk_size: usize,
        memory_limit: Option<usize>,
    ) -> Result<Self, ReadError> {
        let sort_fields = schema
            .key_indices()
            .map(|idx| SortField::new(schema.field(idx).data_type().clone()))
            .collect();
        let converter = RowConverter::new(sort_fields)?;
        let cursors = inputs
            .into_iter()
            .map(|input| Cursor {
                producer_id: input.iterator.producer_id(),
                buffer: Batch::new(
                    Arc::clone(input.iterator.schema().arrow_schema()),
                    chunk_size,
                ),
                iterator: input.iterator,
                version: input.version,
                window: None,
                pos: 0,
                len: 0,
            })
            .collect();

        Ok(Self {
            schema,
            cursors,
            heap: CursorHeap::default(),
            arena: ScanArena::new(memory_limit),
            converter,
            residual: ResidualFilter {
                predicates,
                deletes,
            },
            last_winner: None,
            primed: false,
            state: MergeState::Created,
        })
    }

    /// Number of producers being merged.
    pub fn num_inputs(&self) -> usize {
        self.cursors.len()
    }

    fn prime(&mut self, stats: &mut ReaderStatistics) -> Result<(), ReadError> {
        let key_columns = self.schema.key_indices();
        for slot in 0..self.cursors.len() {
            let live = refill(
                &mut self.cursors[slot],
                &self.converter,
                &mut self.arena,
                key_columns.clone(),
                stats,
            )?;
            if live {
                let heads = Heads {
                    cursors: &self.cursors,
                    arena: &self.arena,
                };
                self.heap.push(slot, &heads);
            }
        }
        self.primed = true;
        Ok(())
    }

    // Move the top cursor past its current row.
    fn advance(&mut self, slot: usize, stats: &mut ReaderStatistics) -> Result<(), ReadError> {
        let cursor = &mut self.cursors[slot];
        cursor.pos += 1;
        let live = cursor.pos < cursor.len
            || refill(
                cursor,
                &self.converter,
                &mut self.arena,
                self.schema.key_indices(),
                stats,
            )?;
        let heads = Heads {
            cursors: &self.cursors,
            arena: &self.arena,
        };
        if live {
            self.heap.sift_down(0, &heads);
        } else {
            self.heap.pop(&heads);
        }
        Ok(())
    }

    fn release(&mut self) {
        self.heap.clear();
        self.arena.release();
        self.last_winner = None;
        for cursor in &mut self.cursors {
            cursor.window = None;
        }
    }
}

// Pull the next non-empty batch of a cursor and pin it.
fn refill(
    cursor: &mut Cursor,
    converter: &RowConverter,
    arena: &mut ScanArena,
    key_columns: Range<usize>,
    stats: &mut ReaderStatistics,
) -> Result<bool, ReadError> {
    cursor.window = None;
    cursor.pos = 0;
    cursor.len = 0;
    loop {
        if cursor
            .iterator
            .next_batch(&mut cursor.buffer, stats)?
            .is_end_of_stream()
        {
            return Ok(false);
        }
        let Some(rows) = cursor.buffer.take() else {
            continue;
        };
        if rows.num_rows() == 0 {
            continue;
        }
        let keys = converter.convert_columns(&rows.columns()[key_columns.clone()])?;
        cursor.len = rows.num_rows();
        cursor.window = Some(arena.pin_keyed(rows, keys)?);
        return Ok(true);
    }
}

impl ChunkIterator for MergeIterator {
    fn init(&mut self) -> Result<(), ReadError> {
        if self.state != MergeState::Created {
            return Err(ReadError::InvalidState {
                op: "init",
                state: "already initialized",
            });
        }
        for cursor in &mut self.cursors {
            cursor.iterator.init()?;
        }
        self.state = MergeState::Streaming;
        Ok(())
    }

    fn next_batch(
        &mut self,
        batch: &mut Batch,
        stats: &mut ReaderStatistics,
    ) -> Result<BatchStatus, ReadError> {
        match self.state {
            MergeState::Created => {
                return Err(ReadError::InvalidState {
                    op: "next_batch",
                    state: "not initialized",
                })
            }
            MergeState::Closed => {
                return Err(ReadError::InvalidState {
                    op: "next_batch",
                    state: "closed",
                })
            }
            MergeState::Exhausted => {
                batch.reset();
                return Ok(BatchStatus::EndOfStream);
            }
            MergeState::Streaming => {}
        }
        if !self.primed {
            self.prime(stats)?;
        }
        // windows neither a cursor nor the last winner points into were fully
        // consumed by earlier batches
        let winner = self.last_winner.map(|(window, _)| window);
        self.arena.sweep(
            self.cursors
                .iter()
                .filter_map(|cursor| cursor.window)
                .chain(winner),
        );

        let capacity = batch.capacity();
        let mut sources: Vec<SourceId> = Vec::new();
        let mut picks: Vec<(usize, usize)> = Vec::with_capacity(capacity);
        while picks.len() < capacity {
            let Some(slot) = self.heap.peek() else {
                break;
            };
            let cursor = &self.cursors[slot];
            let (Some(key), Some(window)) = (cursor.key(&self.arena), cursor.window) else {
                let heads = Heads {
                    cursors: &self.cursors,
                    arena: &self.arena,
                };
                self.heap.pop(&heads);
                continue;
            };
            let duplicate = self.last_winner.is_some_and(|(winner, row)| {
                self.arena
                    .keys(winner)
                    .is_some_and(|keys| keys.row(row) == key)
            });
            if duplicate {
                stats.merged_rows += 1;
            } else {
                self.last_winner = Some((window, cursor.pos));
                let rows = self.arena.get(window);
                if self
                    .residual
                    .keep(&self.schema, rows, cursor.pos, cursor.version, stats)?
                {
                    let source = match sources.iter().position(|id| *id == window) {
                        Some(source) => source,
                        None => {
                            sources.push(window);
                            sources.len() - 1
                        }
                    };
                    picks.push((source, cursor.pos));
                }
            }
            self.advance(slot, stats)?;
        }

        stats.peak_arena_bytes = stats.peak_arena_bytes.max(self.arena.peak_bytes() as u64);
        if picks.is_empty() {
            self.state = MergeState::Exhausted;
            self.release();
            batch.reset();
            return Ok(BatchStatus::EndOfStream);
        }

        let windows: Vec<&RecordBatch> = sources.iter().map(|id| self.arena.get(*id)).collect();
        let columns = (0..self.schema.num_columns())
            .map(|col| {
                let arrays: Vec<&dyn Array> = windows
                    .iter()
                    .map(|window| window.column(col).as_ref())
                    .collect();
                interleave(&arrays, &picks)
            })
            .collect::<Result<Vec<_>, _>>()?;
        batch.fill(columns, picks.len())?;
        stats.rows_returned += picks.len() as u64;
        Ok(BatchStatus::Filled)
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn close(&mut self) {
        for cursor in &mut self.cursors {
            cursor.iterator.close();
        }
        self.release();
        self.state = MergeState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, AsArray, Int64Array, RecordBatchIterator, StringArray},
        datatypes::{DataType, Int64Type},
        record_batch::RecordBatch,
    };
    use tablet_predicate::Predicate;

    use super::{MergeInput, MergeIterator};
    use crate::{
        batch::Batch,
        error::{AllocationError, ReadError},
        iterator::{BatchStatus, ChunkIterator, ScanIterator, SegmentIterator, SegmentReadOptions},
        scan::DeletePredicates,
        schema::Schema,
        stats::ReaderStatistics,
        storage::SegmentHandle,
    };

    fn schema() -> Schema {
        Schema::builder()
            .key_column(1, "id", DataType::Int64)
            .column(2, "value", DataType::Utf8, true)
            .build()
            .expect("schema")
    }

    fn input(version: u64, rows: &[(i64, &str)]) -> MergeInput {
        let schema = schema();
        let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.0)));
        let values: ArrayRef = Arc::new(StringArray::from_iter_values(rows.iter().map(|r| r.1)));
        let block = RecordBatch::try_new(Arc::clone(schema.arrow_schema()), vec![ids, values]);
        let source = RecordBatchIterator::new(vec![block], Arc::clone(schema.arrow_schema()));
        let leaf = SegmentIterator::new(
            SegmentHandle::new(1, version, 0),
            version,
            Box::new(source),
            SegmentReadOptions {
                chunk_size: 2,
                ..SegmentReadOptions::default()
            },
        )
        .expect("leaf");
        MergeInput {
            iterator: ScanIterator::Segment(leaf),
            version,
        }
    }

    fn drain(merge: &mut MergeIterator, capacity: usize) -> (Vec<(i64, String)>, ReaderStatistics) {
        let mut stats = ReaderStatistics::default();
        let mut batch = Batch::new(Arc::clone(schema().arrow_schema()), capacity);
        let mut rows = Vec::new();
        while merge.next_batch(&mut batch, &mut stats).expect("next") == BatchStatus::Filled {
            let ids = batch.column(0).expect("ids").as_primitive::<Int64Type>();
            let values = batch.column(1).expect("values").as_string::<i32>();
            for row in 0..batch.num_rows() {
                rows.push((ids.value(row), values.value(row).to_string()));
            }
        }
        (rows, stats)
    }

    #[test]
    fn newest_version_wins_on_equal_keys() {
        let inputs = vec![
            input(1, &[(1, "a1"), (2, "b1"), (4, "d1")]),
            input(2, &[(2, "b2"), (3, "c2")]),
            input(3, &[(2, "b3"), (4, "d3")]),
        ];
        let mut merge =
            MergeIterator::new(schema(), inputs, Vec::new(), DeletePredicates::default(), 2, None)
                .expect("merge");
        merge.init().expect("init");
        let (rows, stats) = drain(&mut merge, 3);
        let expected: Vec<(i64, String)> = vec![
            (1, "a1".into()),
            (2, "b3".into()),
            (3, "c2".into()),
            (4, "d3".into()),
        ];
        assert_eq!(rows, expected);
        assert_eq!(stats.merged_rows, 3);
        assert_eq!(stats.rows_returned, 4);
        assert!(stats.is_balanced());
    }

    #[test]
    fn deleted_winner_hides_older_versions() {
        let schema = schema();
        let deletes = DeletePredicates::build(&schema, &[(2, Predicate::eq(1, 2i64))])
            .expect("deletes");
        let inputs = vec![
            input(1, &[(1, "a1"), (2, "b1")]),
            input(2, &[(2, "b2"), (3, "c2")]),
        ];
        let mut merge =
            MergeIterator::new(schema, inputs, vec![Predicate::ne(2, "c2")], deletes, 2, None)
                .expect("merge");
        merge.init().expect("init");
        let (rows, stats) = drain(&mut merge, 8);
        assert_eq!(rows, vec![(1, "a1".to_string())]);
        assert_eq!(stats.rows_del_filtered, 1);
        assert_eq!(stats.rows_pred_filtered, 1);
        assert_eq!(stats.merged_rows, 1);
        assert!(stats.is_balanced());
    }

    #[test]
    fn lifecycle_and_memory_limit() {
        let mut merge = MergeIterator::new(
            schema(),
            vec![input(1, &[(1, "a")])],
            Vec::new(),
            DeletePredicates::default(),
            2,
            Some(1),
        )
        .expect("merge");
        let mut stats = ReaderStatistics::default();
        let mut batch = Batch::new(Arc::clone(schema().arrow_schema()), 4);
        assert!(matches!(
            merge.next_batch(&mut batch, &mut stats),
            Err(ReadError::InvalidState { .. })
        ));
        merge.init().expect("init");
        assert!(merge.init().is_err());
        assert!(matches!(
            merge.next_batch(&mut batch, &mut stats),
            Err(ReadError::Allocation(AllocationError::MemoryLimitExceeded { .. }))
        ));
        merge.close();
        merge.close();
    }

    #[test]
    fn winner_outlives_its_window_across_batches() {
        let inputs = vec![
            input(1, &[(1, "a1"), (2, "b1"), (3, "c1")]),
            input(2, &[(1, "a2"), (2, "b2")]),
        ];
        let mut merge =
            MergeIterator::new(schema(), inputs, Vec::new(), DeletePredicates::default(), 1, None)
                .expect("merge");
        merge.init().expect("init");
        let (rows, stats) = drain(&mut merge, 1);
        let expected: Vec<(i64, String)> =
            vec![(1, "a2".into()), (2, "b2".into()), (3, "c1".into())];
        assert_eq!(rows, expected);
        assert_eq!(stats.merged_rows, 2);
        assert!(stats.is_balanced());
    }

    #[test]
    fn no_inputs_is_an_empty_stream() {
        let mut merge =
            MergeIterator::new(schema(), Vec::new(), Vec::new(), DeletePredicates::default(), 2, None)
                .expect("merge");
        merge.init().expect("init");
        let (rows, stats) = drain(&mut merge, 4);
        assert!(rows.is_empty());
        assert_eq!(stats, ReaderStatistics::default());
    }
}

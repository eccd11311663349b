//! Pull-based chunk iterators.
//!
//! Every producer in a scan tree speaks [`ChunkIterator`]: a leaf reading one
//! segment, a wrapper converting a leaf to the target schema, and the k-way
//! merge over all of them. The set is closed, so trees are built from the
//! [`ScanIterator`] enum and dispatch statically.

mod convert;
mod merge;
mod segment;

pub use convert::ConvertIterator;
pub use merge::{MergeInput, MergeIterator};
pub use segment::{SegmentIterator, SegmentReadOptions};

use crate::{batch::Batch, error::ReadError, schema::Schema, stats::ReaderStatistics};

/// Outcome of a successful [`ChunkIterator::next_batch`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    /// The batch holds at least one row.
    Filled,
    /// The producer has no more rows; the batch was left empty.
    EndOfStream,
}

impl BatchStatus {
    /// Whether this is [`BatchStatus::EndOfStream`].
    pub fn is_end_of_stream(self) -> bool {
        matches!(self, BatchStatus::EndOfStream)
    }
}

/// Producer of row batches.
///
/// `init` is called at most once, before the first `next_batch`. After end of
/// stream every further `next_batch` reports end of stream again. Statistics
/// are accumulated into the sink passed on each call.
pub trait ChunkIterator {
    /// Prepare the producer; a second call is an error.
    fn init(&mut self) -> Result<(), ReadError>;

    /// Fill `batch` with the next rows, replacing its contents.
    fn next_batch(
        &mut self,
        batch: &mut Batch,
        stats: &mut ReaderStatistics,
    ) -> Result<BatchStatus, ReadError>;

    /// Schema of the produced batches.
    fn schema(&self) -> &Schema;

    /// Identity of the producer, used to break ties between equal keys.
    fn producer_id(&self) -> u64 {
        0
    }

    /// Whether rows are filtered before all columns are materialized.
    fn is_lazy_materialization(&self) -> bool {
        false
    }

    /// Release held resources. Safe to call more than once.
    fn close(&mut self) {}
}

/// Closed set of producers making up a scan tree.
pub enum ScanIterator {
    /// Reads one segment.
    Segment(SegmentIterator),
    /// Converts a producer to the target schema.
    Convert(ConvertIterator),
    /// Merges producers by key.
    Merge(MergeIterator),
}

impl ChunkIterator for ScanIterator {
    fn init(&mut self) -> Result<(), ReadError> {
        match self {
            ScanIterator::Segment(it) => it.init(),
            ScanIterator::Convert(it) => it.init(),
            ScanIterator::Merge(it) => it.init(),
        }
    }

    fn next_batch(
        &mut self,
        batch: &mut Batch,
        stats: &mut ReaderStatistics,
    ) -> Result<BatchStatus, ReadError> {
        match self {
            ScanIterator::Segment(it) => it.next_batch(batch, stats),
            ScanIterator::Convert(it) => it.next_batch(batch, stats),
            ScanIterator::Merge(it) => it.next_batch(batch, stats),
        }
    }

    fn schema(&self) -> &Schema {
        match self {
            ScanIterator::Segment(it) => it.schema(),
            ScanIterator::Convert(it) => it.schema(),
            ScanIterator::Merge(it) => it.schema(),
        }
    }

    fn producer_id(&self) -> u64 {
        match self {
            ScanIterator::Segment(it) => it.producer_id(),
            ScanIterator::Convert(it) => it.producer_id(),
            ScanIterator::Merge(it) => it.producer_id(),
        }
    }

    fn is_lazy_materialization(&self) -> bool {
        match self {
            ScanIterator::Segment(it) => it.is_lazy_materialization(),
            ScanIterator::Convert(it) => it.is_lazy_materialization(),
            ScanIterator::Merge(it) => it.is_lazy_materialization(),
        }
    }

    fn close(&mut self) {
        match self {
            ScanIterator::Segment(it) => it.close(),
            ScanIterator::Convert(it) => it.close(),
            ScanIterator::Merge(it) => it.close(),
        }
    }
}

impl From<SegmentIterator> for ScanIterator {
    fn from(it: SegmentIterator) -> Self {
        ScanIterator::Segment(it)
    }
}

impl From<ConvertIterator> for ScanIterator {
    fn from(it: ConvertIterator) -> Self {
        ScanIterator::Convert(it)
    }
}

impl From<MergeIterator> for ScanIterator {
    fn from(it: MergeIterator) -> Self {
        ScanIterator::Merge(it)
    }
}

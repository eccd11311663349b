//! Scan-scoped counters.

/// Counters for one scan, threaded as `&mut` through every iterator.
///
/// Rows enter the accounting once, when a leaf reads them inside a key range,
/// and leave it through exactly one of the terminal counters, so after a scan
/// has been drained:
///
/// `raw_rows_read == rows_returned + rows_pred_filtered + rows_del_filtered + merged_rows`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderStatistics {
    /// Rows read by leaves from inside the key ranges.
    pub raw_rows_read: u64,
    /// Rows emitted to the caller.
    pub rows_returned: u64,
    /// Rows dropped by a column predicate, at a leaf or at the merge.
    pub rows_pred_filtered: u64,
    /// Rows dropped by a delete predicate of their version.
    pub rows_del_filtered: u64,
    /// Older row versions superseded by a newer version of the same key.
    pub merged_rows: u64,
    /// Rows skipped by leaves because they lie outside every key range.
    pub rows_key_range_filtered: u64,
    /// Physical blocks dropped whole from their key bounds.
    pub blocks_pruned: u64,
    /// Segments opened by the storage manager.
    pub segments_opened: u64,
    /// Segments never read because every key range was empty.
    pub segments_skipped: u64,
    /// Batches returned to the caller.
    pub batches_returned: u64,
    /// Segment footers served from the storage manager's cache.
    pub cache_hits: u64,
    /// Largest number of bytes the scan arena held at once.
    pub peak_arena_bytes: u64,
}

impl ReaderStatistics {
    /// Rows that left the accounting through a terminal counter.
    pub fn accounted_rows(&self) -> u64 {
        self.rows_returned + self.rows_pred_filtered + self.rows_del_filtered + self.merged_rows
    }

    /// Whether every row read has been returned, filtered or merged.
    pub fn is_balanced(&self) -> bool {
        self.raw_rows_read == self.accounted_rows()
    }
}

//! Public entry point of the read path.

use std::sync::Arc;

use crate::{
    batch::Batch,
    error::{ConfigError, ReadError},
    iterator::{BatchStatus, ChunkIterator, MergeIterator},
    observability::{log_info, log_warn},
    scan::{build_seek_ranges, DeletePredicates, PredicateIndex, ScanConfig},
    schema::Schema,
    stats::ReaderStatistics,
    storage::{acquire_producers, ScanPlan, StorageManager},
};

/// Lifecycle of a [`Reader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Constructed, not yet initialized.
    Created,
    /// Producers acquired, no batch pulled yet.
    Initialized,
    /// At least one batch pulled.
    Streaming,
    /// Resources released.
    Closed,
    /// A call failed; resources were released.
    Failed,
}

impl ReaderState {
    /// Lower-case name used in errors and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ReaderState::Created => "created",
            ReaderState::Initialized => "initialized",
            ReaderState::Streaming => "streaming",
            ReaderState::Closed => "closed",
            ReaderState::Failed => "failed",
        }
    }
}

/// Scans one tablet: merges the visible rowsets by key, keeps the newest
/// version of every key and drops deleted or filtered rows.
///
/// ```ignore
/// let mut reader = Reader::new(schema, storage);
/// reader.init(ScanConfig::new(tablet, VersionRange::up_to(5)))?;
/// let mut batch = reader.new_batch();
/// while reader.next_batch(&mut batch)? == BatchStatus::Filled {
///     consume(batch.record_batch());
/// }
/// reader.close();
/// ```
pub struct Reader {
    schema: Schema,
    storage: Arc<dyn StorageManager>,
    merge: Option<MergeIterator>,
    chunk_size: usize,
    stats: ReaderStatistics,
    state: ReaderState,
}

impl Reader {
    /// Reader producing rows in `schema`, reading segments from `storage`.
    pub fn new(schema: Schema, storage: Arc<dyn StorageManager>) -> Self {
        Self {
            schema,
            storage,
            merge: None,
            chunk_size: crate::batch::DEFAULT_CHUNK_SIZE,
            stats: ReaderStatistics::default(),
            state: ReaderState::Created,
        }
    }

    /// Validate `config`, open one producer per visible segment and prepare
    /// the merge.
    ///
    /// Configuration errors are detected before any segment is opened. On any
    /// failure the reader moves to [`ReaderState::Failed`].
    pub fn init(&mut self, config: ScanConfig) -> Result<(), ReadError> {
        if self.state != ReaderState::Created {
            return Err(self.invalid_state("init"));
        }
        match self.open(&config) {
            Ok(merge) => {
                log_info!(
                    component = "reader",
                    event = "reader_init",
                    tablet = config.tablet(),
                    versions = ?config.versions(),
                    producers = merge.num_inputs(),
                    key_ranges = config.key_ranges().len(),
                    predicates = config.predicates().len(),
                    delete_predicates = config.delete_predicates().len(),
                    chunk_size = config.get_chunk_size(),
                );
                self.chunk_size = config.get_chunk_size();
                self.merge = Some(merge);
                self.state = ReaderState::Initialized;
                Ok(())
            }
            Err(err) => Err(self.fail("init", err)),
        }
    }

    fn open(&mut self, config: &ScanConfig) -> Result<MergeIterator, ReadError> {
        config.validate()?;
        let plan = ScanPlan {
            target: self.schema.clone(),
            key_ranges: build_seek_ranges(&self.schema, config.key_ranges())?,
            predicates: PredicateIndex::build(&self.schema, config.predicates())?,
            deletes: DeletePredicates::build(&self.schema, config.delete_predicates())?,
        };
        let acquired = acquire_producers(self.storage.as_ref(), config, &plan, &mut self.stats)?;
        let mut merge = MergeIterator::new(
            self.schema.clone(),
            acquired.inputs,
            acquired.residual_predicates,
            acquired.residual_deletes,
            config.get_chunk_size(),
            config.get_memory_limit(),
        )?;
        merge.init()?;
        Ok(merge)
    }

    /// Fill `batch` with the next rows in ascending key order.
    ///
    /// `batch` must use the reader's schema; see [`Reader::new_batch`]. A batch
    /// of another schema is rejected without affecting the scan.
    pub fn next_batch(&mut self, batch: &mut Batch) -> Result<BatchStatus, ReadError> {
        if !matches!(
            self.state,
            ReaderState::Initialized | ReaderState::Streaming
        ) {
            return Err(self.invalid_state("next_batch"));
        }
        let expected = self.schema.arrow_schema();
        if !Arc::ptr_eq(batch.schema(), expected) && batch.schema() != expected {
            return Err(ConfigError::BatchSchemaMismatch.into());
        }
        let Some(merge) = self.merge.as_mut() else {
            return Err(self.invalid_state("next_batch"));
        };
        match merge.next_batch(batch, &mut self.stats) {
            Ok(BatchStatus::Filled) => {
                self.stats.batches_returned += 1;
                self.state = ReaderState::Streaming;
                Ok(BatchStatus::Filled)
            }
            Ok(BatchStatus::EndOfStream) => {
                self.state = ReaderState::Streaming;
                Ok(BatchStatus::EndOfStream)
            }
            Err(err) => Err(self.fail("next_batch", err)),
        }
    }

    /// Release every producer and the scan arena. Calling it again is a no-op.
    pub fn close(&mut self) {
        if matches!(self.state, ReaderState::Closed) {
            return;
        }
        if let Some(mut merge) = self.merge.take() {
            merge.close();
        }
        let previous = self.state;
        self.state = ReaderState::Closed;
        log_info!(
            component = "reader",
            event = "reader_closed",
            previous_state = previous.as_str(),
            raw_rows_read = self.stats.raw_rows_read,
            rows_returned = self.stats.rows_returned,
            rows_pred_filtered = self.stats.rows_pred_filtered,
            rows_del_filtered = self.stats.rows_del_filtered,
            merged_rows = self.stats.merged_rows,
            rows_key_range_filtered = self.stats.rows_key_range_filtered,
            blocks_pruned = self.stats.blocks_pruned,
            segments_opened = self.stats.segments_opened,
            segments_skipped = self.stats.segments_skipped,
            batches_returned = self.stats.batches_returned,
            cache_hits = self.stats.cache_hits,
            peak_arena_bytes = self.stats.peak_arena_bytes,
        );
    }

    /// Rows collapsed as older versions of a key.
    pub fn merged_rows(&self) -> u64 {
        self.stats.merged_rows
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &ReaderStatistics {
        &self.stats
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// Schema of the produced batches.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Empty batch in the reader's schema sized to the configured chunk size.
    pub fn new_batch(&self) -> Batch {
        Batch::new(Arc::clone(self.schema.arrow_schema()), self.chunk_size)
    }

    fn invalid_state(&self, op: &'static str) -> ReadError {
        ReadError::InvalidState {
            op,
            state: self.state.as_str(),
        }
    }

    fn fail(&mut self, op: &'static str, err: ReadError) -> ReadError {
        if let Some(mut merge) = self.merge.take() {
            merge.close();
        }
        self.state = ReaderState::Failed;
        log_warn!(
            component = "reader",
            event = "reader_failed",
            op,
            error = %err,
        );
        err
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Some(mut merge) = self.merge.take() {
            merge.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::datatypes::DataType;

    use super::{Reader, ReaderState};
    use crate::{
        error::{ConfigError, ReadError},
        iterator::BatchStatus,
        scan::{ScanConfig, VersionRange},
        schema::Schema,
        storage::MemTabletStore,
    };

    fn reader() -> Reader {
        let schema = Schema::builder()
            .key_column(1, "id", DataType::Int64)
            .build()
            .expect("schema");
        Reader::new(schema, Arc::new(MemTabletStore::new()))
    }

    #[test]
    fn calls_out_of_order_are_rejected() {
        let mut reader = reader();
        let mut batch = reader.new_batch();
        assert!(matches!(
            reader.next_batch(&mut batch),
            Err(ReadError::InvalidState {
                op: "next_batch",
                state: "created"
            })
        ));

        reader
            .init(ScanConfig::new(1, VersionRange::up_to(3)))
            .expect("init");
        assert_eq!(reader.state(), ReaderState::Initialized);
        assert!(matches!(
            reader.init(ScanConfig::new(1, VersionRange::up_to(3))),
            Err(ReadError::InvalidState { op: "init", .. })
        ));
        assert_eq!(
            reader.next_batch(&mut batch).expect("eos"),
            BatchStatus::EndOfStream
        );
        assert_eq!(
            reader.next_batch(&mut batch).expect("eos again"),
            BatchStatus::EndOfStream
        );

        reader.close();
        reader.close();
        assert_eq!(reader.state(), ReaderState::Closed);
        assert!(reader.next_batch(&mut batch).is_err());
    }

    #[test]
    fn bad_configuration_fails_the_reader() {
        let mut reader = reader();
        let err = reader
            .init(ScanConfig::new(1, VersionRange::up_to(3)).chunk_size(0))
            .expect_err("zero chunk");
        assert!(matches!(
            err,
            ReadError::Configuration(ConfigError::ZeroChunkSize)
        ));
        assert_eq!(reader.state(), ReaderState::Failed);

        let mut batch = reader.new_batch();
        assert!(matches!(
            reader.next_batch(&mut batch),
            Err(ReadError::InvalidState {
                state: "failed",
                ..
            })
        ));
        reader.close();
        assert_eq!(reader.state(), ReaderState::Closed);
    }
}

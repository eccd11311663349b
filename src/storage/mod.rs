//! Segment storage and leaf producer acquisition.
//!
//! A [`StorageManager`] resolves a tablet and a version range to the segments
//! of the visible rowsets and opens each one as an Arrow record batch reader.
//! [`acquire_producers`] turns those readers into leaf iterators, deciding per
//! leaf which filters run inside it and wrapping leaves written under an older
//! schema in a conversion iterator.

mod disk;
mod memory;

use std::fmt;

use arrow::{
    record_batch::{RecordBatch, RecordBatchReader},
    row::{RowConverter, SortField},
};
pub use disk::ParquetTabletStore;
pub use memory::MemTabletStore;
use tablet_predicate::Predicate;

use crate::{
    error::{ConfigError, ReadError},
    iterator::{ChunkIterator, ConvertIterator, MergeInput, ScanIterator, SegmentIterator, SegmentReadOptions},
    observability::{log_debug, log_info},
    scan::{
        excludes_every_key, DeletePredicates, KeyRange, PredicateIndex, ScanConfig, TabletId,
        Version, VersionRange,
    },
    schema::Schema,
    stats::ReaderStatistics,
};

/// Address of one immutable segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentHandle {
    /// Owning tablet.
    pub tablet: TabletId,
    /// Version of the rowset holding the segment.
    pub version: Version,
    /// Ordinal of the segment inside its rowset.
    pub segment_id: u32,
}

impl SegmentHandle {
    /// Handle of segment `segment_id` of rowset `version`.
    pub fn new(tablet: TabletId, version: Version, segment_id: u32) -> Self {
        Self {
            tablet,
            version,
            segment_id,
        }
    }
}

impl fmt::Display for SegmentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tablet, self.version, self.segment_id)
    }
}

/// Source of segment readers, shared across scans.
pub trait StorageManager: Send + Sync {
    /// Segments of the rowsets of `tablet` whose version lies in `versions`.
    fn resolve(
        &self,
        tablet: TabletId,
        versions: VersionRange,
    ) -> Result<Vec<SegmentHandle>, ReadError>;

    /// Open the rows of a segment, in key order, `batch_size` rows at a time.
    fn open_segment(
        &self,
        handle: &SegmentHandle,
        batch_size: usize,
        stats: &mut ReaderStatistics,
    ) -> Result<Box<dyn RecordBatchReader + Send>, ReadError>;

    /// Open a segment as a leaf iterator bound to `options`.
    fn open_segment_iterator(
        &self,
        handle: &SegmentHandle,
        options: SegmentReadOptions,
        producer_id: u64,
        stats: &mut ReaderStatistics,
    ) -> Result<SegmentIterator, ReadError> {
        let source = self.open_segment(handle, options.chunk_size, stats)?;
        stats.segments_opened += 1;
        SegmentIterator::new(*handle, producer_id, source, options)
    }
}

/// Check that `batch` matches a self-describing schema and that its keys are
/// strictly ascending.
pub(crate) fn validate_segment(batch: &RecordBatch) -> Result<Schema, ReadError> {
    let schema = Schema::from_arrow(batch.schema())?;
    let sort_fields = schema
        .key_indices()
        .map(|idx| SortField::new(schema.field(idx).data_type().clone()))
        .collect();
    let converter = RowConverter::new(sort_fields)?;
    let keys = converter.convert_columns(&batch.columns()[schema.key_indices()])?;
    for row in 1..keys.num_rows() {
        if keys.row(row) <= keys.row(row - 1) {
            return Err(ConfigError::UnsortedSegment { row }.into());
        }
    }
    Ok(schema)
}

/// Validated filters of one scan, ready to be distributed over producers.
#[derive(Clone, Debug)]
pub struct ScanPlan {
    /// Schema every producer must deliver.
    pub target: Schema,
    /// Sorted key ranges.
    pub key_ranges: Vec<KeyRange>,
    /// Column predicates.
    pub predicates: PredicateIndex,
    /// Delete statements by version.
    pub deletes: DeletePredicates,
}

/// Leaves ready for merging plus the filters the merge must apply itself.
pub struct AcquiredProducers {
    /// One input per opened segment, in ascending producer id.
    pub inputs: Vec<MergeInput>,
    /// Conjuncts evaluated after de-duplication.
    pub residual_predicates: Vec<Predicate>,
    /// Delete statements evaluated after de-duplication.
    pub residual_deletes: DeletePredicates,
}

/// Open one leaf per visible segment.
///
/// Producer ids ascend with `(version, segment_id)`, so a newer rowset always
/// has the larger id. Key-column conjuncts always run in the leaves. Value
/// column conjuncts and delete statements only run in a leaf when it is the
/// sole producer; otherwise filtering a newer version early would let an older
/// version of the same key through the merge.
pub fn acquire_producers(
    storage: &dyn StorageManager,
    config: &ScanConfig,
    plan: &ScanPlan,
    stats: &mut ReaderStatistics,
) -> Result<AcquiredProducers, ReadError> {
    let versions = config.versions();
    let mut handles: Vec<SegmentHandle> = storage
        .resolve(config.tablet(), versions)?
        .into_iter()
        .filter(|handle| handle.tablet == config.tablet() && versions.contains(handle.version))
        .collect();
    handles.sort();
    handles.dedup();

    if excludes_every_key(&plan.key_ranges) {
        stats.segments_skipped += handles.len() as u64;
        log_debug!(
            component = "acquire",
            event = "segment_pruned",
            tablet = config.tablet(),
            segments = handles.len(),
            reason = "empty key ranges",
        );
        return Ok(AcquiredProducers {
            inputs: Vec::new(),
            residual_predicates: Vec::new(),
            residual_deletes: DeletePredicates::default(),
        });
    }

    let single = handles.len() == 1;
    let mut pushed = Vec::new();
    let mut residual_predicates = Vec::new();
    for (column, predicates) in plan.predicates.iter() {
        if single || plan.target.is_key_column(column) {
            pushed.extend_from_slice(predicates);
        } else {
            residual_predicates.extend_from_slice(predicates);
        }
    }
    residual_predicates.extend_from_slice(plan.predicates.multi_column());
    let residual_deletes = if single {
        DeletePredicates::default()
    } else {
        plan.deletes.clone()
    };

    let mut inputs = Vec::with_capacity(handles.len());
    for (producer_id, handle) in handles.iter().enumerate() {
        let options = SegmentReadOptions {
            key_ranges: plan.key_ranges.clone(),
            predicates: pushed.clone(),
            delete_conjunctions: if single {
                plan.deletes.for_version(handle.version).to_vec()
            } else {
                Vec::new()
            },
            chunk_size: config.get_chunk_size(),
            use_page_cache: config.page_cache_enabled(),
        };
        let mut leaf = storage.open_segment_iterator(handle, options, producer_id as u64, stats)?;
        let (deferred_predicates, deferred_deletes) = leaf.take_deferred();

        let iterator = if leaf.schema().same_layout(&plan.target)
            && deferred_predicates.is_empty()
            && deferred_deletes.is_empty()
        {
            ScanIterator::Segment(leaf)
        } else {
            ConvertIterator::try_new(
                ScanIterator::Segment(leaf),
                plan.target.clone(),
                deferred_predicates,
                deferred_deletes,
            )?
            .into()
        };
        inputs.push(MergeInput {
            iterator,
            version: handle.version,
        });
    }

    log_info!(
        component = "acquire",
        event = "producers_acquired",
        tablet = config.tablet(),
        producers = inputs.len(),
        pushed_predicates = pushed.len(),
        residual_predicates = residual_predicates.len(),
        deletes_pushed = single && !plan.deletes.is_empty(),
    );

    Ok(AcquiredProducers {
        inputs,
        residual_predicates,
        residual_deletes,
    })
}

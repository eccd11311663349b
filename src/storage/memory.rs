use std::collections::BTreeMap;

use arrow::record_batch::{RecordBatch, RecordBatchIterator, RecordBatchReader};
use parking_lot::RwLock;

use super::{validate_segment, SegmentHandle, StorageManager};
use crate::{
    error::{ReadError, ResourceError},
    observability::log_debug,
    scan::{TabletId, Version, VersionRange},
    stats::ReaderStatistics,
};

/// Rowsets kept in memory, one record batch per segment.
#[derive(Default)]
pub struct MemTabletStore {
    rowsets: RwLock<BTreeMap<(TabletId, Version), Vec<RecordBatch>>>,
}

impl MemTabletStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register rowset `version` of `tablet`, replacing any previous one.
    ///
    /// Every segment must carry a self-describing schema and strictly
    /// ascending keys.
    pub fn add_rowset(
        &self,
        tablet: TabletId,
        version: Version,
        segments: Vec<RecordBatch>,
    ) -> Result<(), ReadError> {
        for segment in &segments {
            validate_segment(segment)?;
        }
        log_debug!(
            component = "store",
            event = "rowset_added",
            tablet,
            version,
            segments = segments.len(),
        );
        self.rowsets.write().insert((tablet, version), segments);
        Ok(())
    }

    /// Forget rowset `version` of `tablet`; returns whether it existed.
    pub fn remove_rowset(&self, tablet: TabletId, version: Version) -> bool {
        self.rowsets.write().remove(&(tablet, version)).is_some()
    }
}

impl StorageManager for MemTabletStore {
    fn resolve(
        &self,
        tablet: TabletId,
        versions: VersionRange,
    ) -> Result<Vec<SegmentHandle>, ReadError> {
        let rowsets = self.rowsets.read();
        let handles = rowsets
            .range((tablet, versions.start)..=(tablet, versions.end))
            .flat_map(|((tablet, version), segments)| {
                (0..segments.len() as u32)
                    .map(move |segment| SegmentHandle::new(*tablet, *version, segment))
            })
            .collect();
        Ok(handles)
    }

    fn open_segment(
        &self,
        handle: &SegmentHandle,
        batch_size: usize,
        _stats: &mut ReaderStatistics,
    ) -> Result<Box<dyn RecordBatchReader + Send>, ReadError> {
        let segment = self
            .rowsets
            .read()
            .get(&(handle.tablet, handle.version))
            .and_then(|segments| segments.get(handle.segment_id as usize))
            .cloned()
            .ok_or(ResourceError::UnknownSegment {
                tablet: handle.tablet,
                version: handle.version,
                segment: handle.segment_id,
            })?;

        let batch_size = batch_size.max(1);
        let rows = segment.num_rows();
        let blocks: Vec<_> = (0..rows)
            .step_by(batch_size)
            .map(|offset| Ok(segment.slice(offset, batch_size.min(rows - offset))))
            .collect();
        Ok(Box::new(RecordBatchIterator::new(blocks, segment.schema())))
    }
}

use std::{
    collections::HashMap,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use arrow::record_batch::{RecordBatch, RecordBatchReader};
use parking_lot::Mutex;
use parquet::{
    arrow::{
        arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder},
        ArrowWriter,
    },
    file::properties::WriterProperties,
};

use super::{validate_segment, SegmentHandle, StorageManager};
use crate::{
    error::{ReadError, ResourceError},
    observability::log_debug,
    scan::{TabletId, Version, VersionRange},
    stats::ReaderStatistics,
};

const SEGMENT_EXTENSION: &str = "parquet";

/// Segments stored as one Parquet file each under a root directory.
///
/// Files live at `<root>/<tablet>/<version>_<segment>.parquet` with the
/// version zero-padded to 20 digits and the segment ordinal to 5, so a
/// directory listing sorts in producer order. Parsed footers are cached per
/// file; re-opening a segment skips the footer read.
pub struct ParquetTabletStore {
    root: PathBuf,
    writer_properties: Option<WriterProperties>,
    footers: Mutex<HashMap<PathBuf, ArrowReaderMetadata>>,
}

impl ParquetTabletStore {
    /// Store rooted at `root`; the directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writer_properties: None,
            footers: Mutex::new(HashMap::new()),
        }
    }

    /// Properties used when writing segments.
    pub fn with_writer_properties(self, writer_properties: WriterProperties) -> Self {
        ParquetTabletStore {
            writer_properties: Some(writer_properties),
            ..self
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing `handle`.
    pub fn segment_path(&self, handle: &SegmentHandle) -> PathBuf {
        self.root.join(handle.tablet.to_string()).join(format!(
            "{:020}_{:05}.{SEGMENT_EXTENSION}",
            handle.version, handle.segment_id
        ))
    }

    /// Write `batch` as segment `segment_id` of rowset `version`.
    ///
    /// The batch must carry a self-describing schema and strictly ascending
    /// keys. The file is written under a temporary name and renamed into
    /// place, so a partially written segment is never resolved.
    pub fn write_segment(
        &self,
        tablet: TabletId,
        version: Version,
        segment_id: u32,
        batch: &RecordBatch,
    ) -> Result<SegmentHandle, ReadError> {
        validate_segment(batch)?;
        let handle = SegmentHandle::new(tablet, version, segment_id);
        let path = self.segment_path(&handle);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let staging = path.with_extension("tmp");
        let file = File::create(&staging)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), self.writer_properties.clone())?;
        writer.write(batch)?;
        writer.close()?;
        fs::rename(&staging, &path)?;
        self.footers.lock().remove(&path);

        log_debug!(
            component = "store",
            event = "segment_written",
            segment = %handle,
            rows = batch.num_rows(),
        );
        Ok(handle)
    }

    fn footer(
        &self,
        path: &Path,
        file: &File,
        stats: &mut ReaderStatistics,
    ) -> Result<ArrowReaderMetadata, ReadError> {
        if let Some(footer) = self.footers.lock().get(path) {
            stats.cache_hits += 1;
            return Ok(footer.clone());
        }
        let footer = ArrowReaderMetadata::load(file, ArrowReaderOptions::new())?;
        self.footers
            .lock()
            .insert(path.to_path_buf(), footer.clone());
        Ok(footer)
    }
}

fn parse_segment_name(name: &str) -> Option<(Version, u32)> {
    let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
    let (version, segment) = stem.split_once('_')?;
    Some((version.parse().ok()?, segment.parse().ok()?))
}

impl StorageManager for ParquetTabletStore {
    fn resolve(
        &self,
        tablet: TabletId,
        versions: VersionRange,
    ) -> Result<Vec<SegmentHandle>, ReadError> {
        let dir = self.root.join(tablet.to_string());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut handles = Vec::new();
        for entry in entries {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Some((version, segment)) = parse_segment_name(&name) {
                if versions.contains(version) {
                    handles.push(SegmentHandle::new(tablet, version, segment));
                }
            }
        }
        handles.sort();
        Ok(handles)
    }

    fn open_segment(
        &self,
        handle: &SegmentHandle,
        batch_size: usize,
        stats: &mut ReaderStatistics,
    ) -> Result<Box<dyn RecordBatchReader + Send>, ReadError> {
        let path = self.segment_path(handle);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ResourceError::UnknownSegment {
                    tablet: handle.tablet,
                    version: handle.version,
                    segment: handle.segment_id,
                }
                .into())
            }
            Err(err) => return Err(err.into()),
        };
        let footer = self.footer(&path, &file, stats)?;
        let reader = ParquetRecordBatchReaderBuilder::new_with_metadata(file, footer)
            .with_batch_size(batch_size.max(1))
            .build()?;
        Ok(Box::new(reader))
    }
}

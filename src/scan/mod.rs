//! Scan requests: what to read from a tablet and how to filter it.

mod predicates;
mod range;

use std::collections::BTreeSet;

pub use predicates::{DeletePredicates, PredicateIndex};
pub use range::{build_seek_ranges, compare_prefix, excludes_every_key, KeyRange, SeekTuple};
use tablet_predicate::{ColumnId, Predicate};

use crate::{batch::DEFAULT_CHUNK_SIZE, error::ConfigError};

/// Identifier of a tablet.
pub type TabletId = u64;

/// Rowset version; larger versions are newer.
pub type Version = u64;

/// Inclusive range of rowset versions visible to a scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VersionRange {
    /// First visible version.
    pub start: Version,
    /// Last visible version.
    pub end: Version,
}

impl VersionRange {
    /// Versions `start..=end`.
    pub fn new(start: Version, end: Version) -> Self {
        Self { start, end }
    }

    /// Exactly one version.
    pub fn single(version: Version) -> Self {
        Self::new(version, version)
    }

    /// Every version up to and including `end`.
    pub fn up_to(end: Version) -> Self {
        Self::new(0, end)
    }

    /// Whether `version` is visible.
    pub fn contains(&self, version: Version) -> bool {
        (self.start..=self.end).contains(&version)
    }
}

/// Immutable description of one scan.
///
/// Built with chained setters and handed to
/// [`Reader::init`](crate::reader::Reader::init), which never mutates it.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub(crate) tablet: TabletId,
    pub(crate) versions: VersionRange,
    pub(crate) key_ranges: Vec<KeyRange>,
    pub(crate) predicates: Vec<Predicate>,
    pub(crate) delete_predicates: Vec<(Version, Predicate)>,
    pub(crate) chunk_size: usize,
    pub(crate) memory_limit: Option<usize>,
    pub(crate) use_page_cache: bool,
    #[allow(unused)]
    pub(crate) load_bloom_filter_columns: BTreeSet<ColumnId>,
}

impl ScanConfig {
    /// Scan every row of `tablet` visible at `versions`.
    pub fn new(tablet: TabletId, versions: VersionRange) -> Self {
        ScanConfig {
            tablet,
            versions,
            key_ranges: Vec::new(),
            predicates: Vec::new(),
            delete_predicates: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_limit: None,
            use_page_cache: false,
            load_bloom_filter_columns: BTreeSet::new(),
        }
    }

    /// Add a key range; ranges are OR'ed.
    pub fn key_range(mut self, range: KeyRange) -> Self {
        self.key_ranges.push(range);
        self
    }

    /// Add a column predicate; predicates are AND'ed.
    pub fn predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Register a delete statement for `version`: rows of that version that
    /// satisfy `conjunction` are logically deleted.
    pub fn delete_predicate(mut self, version: Version, conjunction: Predicate) -> Self {
        self.delete_predicates.push((version, conjunction));
        self
    }

    /// Rows each leaf reads per physical block.
    pub fn chunk_size(self, chunk_size: usize) -> Self {
        ScanConfig { chunk_size, ..self }
    }

    /// Upper bound on bytes the merge may hold pinned at once.
    pub fn memory_limit(self, memory_limit: usize) -> Self {
        ScanConfig {
            memory_limit: Some(memory_limit),
            ..self
        }
    }

    /// Ask leaves to go through the block cache.
    ///
    /// Reserved: carried to every leaf, no leaf acts on it yet.
    pub fn use_page_cache(self, use_page_cache: bool) -> Self {
        ScanConfig {
            use_page_cache,
            ..self
        }
    }

    /// Columns whose bloom filters should be loaded.
    ///
    /// Reserved: recorded but never read.
    pub fn load_bloom_filter_columns<I>(self, columns: I) -> Self
    where
        I: IntoIterator<Item = ColumnId>,
    {
        ScanConfig {
            load_bloom_filter_columns: columns.into_iter().collect(),
            ..self
        }
    }

    /// Tablet to scan.
    pub fn tablet(&self) -> TabletId {
        self.tablet
    }

    /// Visible versions.
    pub fn versions(&self) -> VersionRange {
        self.versions
    }

    /// Key ranges as supplied.
    pub fn key_ranges(&self) -> &[KeyRange] {
        &self.key_ranges
    }

    /// Column predicates as supplied.
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Delete statements as supplied.
    pub fn delete_predicates(&self) -> &[(Version, Predicate)] {
        &self.delete_predicates
    }

    /// Rows per leaf block.
    pub fn get_chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Configured memory limit.
    pub fn get_memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    /// Whether the block cache was requested.
    pub fn page_cache_enabled(&self) -> bool {
        self.use_page_cache
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        if self.versions.start > self.versions.end {
            return Err(ConfigError::InvalidVersionRange {
                start: self.versions.start,
                end: self.versions.end,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use tablet_predicate::Predicate;

    use super::{KeyRange, ScanConfig, VersionRange};
    use crate::{batch::DEFAULT_CHUNK_SIZE, error::ConfigError};

    #[test]
    fn defaults_scan_everything() {
        let config = ScanConfig::new(7, VersionRange::up_to(3));
        assert_eq!(config.tablet(), 7);
        assert!(config.key_ranges().is_empty());
        assert!(config.predicates().is_empty());
        assert_eq!(config.get_chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.get_memory_limit(), None);
        assert!(!config.page_cache_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn setters_accumulate() {
        let config = ScanConfig::new(1, VersionRange::single(2))
            .key_range(KeyRange::new(Bound::Included(vec![1i64.into()]), Bound::Unbounded))
            .key_range(KeyRange::all())
            .predicate(Predicate::gt(2, 0i64))
            .delete_predicate(2, Predicate::eq(1, 5i64))
            .chunk_size(16)
            .memory_limit(1 << 20)
            .use_page_cache(true)
            .load_bloom_filter_columns([2]);
        assert_eq!(config.key_ranges().len(), 2);
        assert_eq!(config.predicates().len(), 1);
        assert_eq!(config.delete_predicates()[0].0, 2);
        assert_eq!(config.get_chunk_size(), 16);
        assert_eq!(config.get_memory_limit(), Some(1 << 20));
        assert!(config.page_cache_enabled());
    }

    #[test]
    fn invalid_sizes_and_versions_are_rejected() {
        let zero = ScanConfig::new(1, VersionRange::single(1)).chunk_size(0);
        assert_eq!(zero.validate(), Err(ConfigError::ZeroChunkSize));

        let inverted = ScanConfig::new(1, VersionRange::new(5, 2));
        assert!(matches!(
            inverted.validate(),
            Err(ConfigError::InvalidVersionRange { start: 5, end: 2 })
        ));
        assert!(VersionRange::new(2, 5).contains(5));
        assert!(!VersionRange::new(2, 5).contains(1));
    }
}

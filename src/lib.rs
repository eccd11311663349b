#![deny(missing_docs)]
//! Read path of a versioned columnar tablet.
//!
//! A tablet is a set of rowsets, each stamped with a version and made of
//! immutable segments sorted by primary key. A scan merges the segments of
//! every visible rowset into one key-ordered stream of Arrow batches, keeping
//! only the newest version of each key, and drops rows outside the requested
//! key ranges, rows failing the column predicates and rows removed by delete
//! statements.
//!
//! [`Reader`] is the entry point; segments come from a [`StorageManager`] such
//! as [`MemTabletStore`] or [`ParquetTabletStore`].

/// Scan-scoped pool of source windows.
pub mod arena;

/// Fixed-capacity columnar batches.
pub mod batch;

/// Error taxonomy.
pub mod error;

mod eval;

/// Chunk iterator protocol and its producers.
pub mod iterator;

mod observability;

/// Public scan facade.
pub mod reader;

/// Scan configuration, key ranges and predicate indexes.
pub mod scan;

/// Tablet schemas with stable column ids.
pub mod schema;

/// Scan counters.
pub mod stats;

/// Segment storage and producer acquisition.
pub mod storage;

pub use tablet_predicate::{
    ColumnId, ColumnRef, ComparisonOp, Operand, Predicate, PredicateNode, PredicateVisitor,
    ScalarValue, ScalarValueRef, VisitOutcome,
};

pub use crate::{
    batch::{Batch, DEFAULT_CHUNK_SIZE},
    error::{AllocationError, ConfigError, ReadError, ReadResult, ResourceError},
    iterator::{BatchStatus, ChunkIterator, ScanIterator},
    reader::{Reader, ReaderState},
    scan::{KeyRange, ScanConfig, SeekTuple, TabletId, Version, VersionRange},
    schema::{Schema, SchemaBuilder},
    stats::ReaderStatistics,
    storage::{MemTabletStore, ParquetTabletStore, SegmentHandle, StorageManager},
};

//! Error taxonomy of the read path.
//!
//! Every failure is one of three categories: the scan request itself is
//! malformed ([`ConfigError`]), a segment could not be opened or read
//! ([`ResourceError`]), or memory for the scan could not be provided
//! ([`AllocationError`]). End of stream is not an error; it is reported as
//! [`BatchStatus::EndOfStream`](crate::iterator::BatchStatus::EndOfStream).

use arrow::{datatypes::DataType, error::ArrowError};
use parquet::errors::ParquetError;
use tablet_predicate::{ColumnId, ScalarValue};

use crate::scan::{TabletId, Version};

/// Result type shared across the read path.
pub type ReadResult<T> = Result<T, ReadError>;

/// Error returned by every fallible read-path operation.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The scan request is invalid; detected before any segment is read.
    #[error("invalid scan configuration: {0}")]
    Configuration(#[from] ConfigError),
    /// Opening or reading a segment failed; the scan is aborted.
    #[error("segment resource failure: {0}")]
    Resource(#[from] ResourceError),
    /// Scan memory could not be provided; the scan is aborted.
    #[error("allocation failure: {0}")]
    Allocation(#[from] AllocationError),
    /// An operation was invoked in a lifecycle state that does not permit it.
    #[error("`{op}` is not permitted while {state}")]
    InvalidState {
        /// Rejected operation.
        op: &'static str,
        /// State the callee was in.
        state: &'static str,
    },
}

impl From<ArrowError> for ReadError {
    fn from(err: ArrowError) -> Self {
        ReadError::Resource(ResourceError::Arrow(err))
    }
}

impl From<ParquetError> for ReadError {
    fn from(err: ParquetError) -> Self {
        ReadError::Resource(ResourceError::Parquet(err))
    }
}

impl From<std::io::Error> for ReadError {
    fn from(err: std::io::Error) -> Self {
        ReadError::Resource(ResourceError::Io(err))
    }
}

/// Malformed scan request, detected at initialization time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A predicate or schema references a column id the schema does not have.
    #[error("unknown column id {column}")]
    UnknownColumn {
        /// Offending column id.
        column: ColumnId,
    },
    /// A literal cannot be compared with the column it is matched against.
    #[error("literal {literal} is not comparable with column {column} of type {data_type}")]
    TypeMismatch {
        /// Column the literal is compared with.
        column: ColumnId,
        /// Column type.
        data_type: DataType,
        /// Offending literal.
        literal: ScalarValue,
    },
    /// Two columns of incomparable types are compared with each other.
    #[error("columns {left} ({left_type}) and {right} ({right_type}) are not comparable")]
    IncomparableColumns {
        /// Left column id.
        left: ColumnId,
        /// Left column type.
        left_type: DataType,
        /// Right column id.
        right: ColumnId,
        /// Right column type.
        right_type: DataType,
    },
    /// The column type cannot be evaluated by predicates or used as a key.
    #[error("unsupported column type {data_type}")]
    UnsupportedType {
        /// Offending type.
        data_type: DataType,
    },
    /// A comparison uses a `NULL` literal; `IS NULL` must be used instead.
    #[error("comparison against NULL on column {column}; use IS NULL")]
    NullComparison {
        /// Column compared with `NULL`.
        column: ColumnId,
    },
    /// A value-in-set predicate has no candidates.
    #[error("value-in-set predicate on column {column} has an empty list")]
    EmptyInList {
        /// Column tested for membership.
        column: ColumnId,
    },
    /// A seek tuple has more values than the key has columns.
    #[error("seek tuple has {len} values but the key has {key_columns} columns")]
    SeekTupleTooLong {
        /// Tuple length.
        len: usize,
        /// Number of key columns.
        key_columns: usize,
    },
    /// A seek tuple value does not fit the key column at its position.
    #[error("seek tuple value {literal} at position {position} does not fit key type {data_type}")]
    SeekTupleType {
        /// Position inside the tuple.
        position: usize,
        /// Key column type.
        data_type: DataType,
        /// Offending value.
        literal: ScalarValue,
    },
    /// No conversion rule maps a physical column type to the target type.
    #[error("no conversion from {from} to {to} for column {column}")]
    MissingConversion {
        /// Column id.
        column: ColumnId,
        /// Physical type.
        from: DataType,
        /// Target type.
        to: DataType,
    },
    /// A non-nullable target column is absent from a segment.
    #[error("segment lacks non-nullable column {column}")]
    MissingColumn {
        /// Column id.
        column: ColumnId,
    },
    /// The segment's key columns differ from the target key columns.
    #[error("key columns differ: target {expected:?}, segment {actual:?}")]
    KeyMismatch {
        /// Target key column ids.
        expected: Vec<ColumnId>,
        /// Segment key column ids.
        actual: Vec<ColumnId>,
    },
    /// Schema metadata is missing or inconsistent.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Rows of a segment are not strictly ascending by key.
    #[error("segment rows are not strictly ascending by key at row {row}")]
    UnsortedSegment {
        /// First row that is not greater than its predecessor.
        row: usize,
    },
    /// The version range is inverted.
    #[error("version range {start}..={end} is empty")]
    InvalidVersionRange {
        /// First version.
        start: Version,
        /// Last version.
        end: Version,
    },
    /// A batch or chunk size of zero was requested.
    #[error("chunk size must be positive")]
    ZeroChunkSize,
    /// The caller's batch was built for another schema than the reader's.
    #[error("batch schema does not match the reader schema")]
    BatchSchemaMismatch,
}

/// Segment acquisition or I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    /// Arrow failure while decoding or assembling batches.
    #[error("arrow error: {0}")]
    Arrow(#[from] ArrowError),
    /// Parquet failure while opening or decoding a segment.
    #[error("parquet error: {0}")]
    Parquet(#[from] ParquetError),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The storage manager does not know the requested segment.
    #[error("segment {segment} of tablet {tablet} version {version} not found")]
    UnknownSegment {
        /// Tablet id.
        tablet: TabletId,
        /// Rowset version.
        version: Version,
        /// Segment ordinal inside the rowset.
        segment: u32,
    },
}

/// Failure to provide memory for a scan.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// Pinning another source window would exceed the scan memory limit.
    #[error("scan memory limit exceeded: {in_use} bytes in use, {requested} requested, limit {limit}")]
    MemoryLimitExceeded {
        /// Bytes held when the request was made.
        in_use: usize,
        /// Bytes requested.
        requested: usize,
        /// Configured limit.
        limit: usize,
    },
    /// More rows were written into a batch than its capacity.
    #[error("batch overflow: {rows} rows exceed capacity {capacity}")]
    BatchOverflow {
        /// Rows offered.
        rows: usize,
        /// Batch capacity.
        capacity: usize,
    },
}

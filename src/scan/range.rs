//! Key ranges over the primary key, built from caller-supplied bound tuples.
//!
//! A bound tuple may be shorter than the key; it is then a prefix bound that
//! matches any suffix. Ranges are OR'ed and never coalesced: overlapping
//! ranges are resolved by leaves, which union the row windows of all ranges in
//! row-index space.

use std::{
    cmp::Ordering,
    ops::{Bound, Range},
};

use arrow::array::ArrayRef;
use tablet_predicate::ScalarValue;

use crate::{
    error::{ConfigError, ReadError},
    eval::{literal_fits, scalar_at},
    schema::Schema,
};

/// Key prefix used as a range bound.
pub type SeekTuple = Vec<ScalarValue>;

/// Range over primary keys with prefix bounds.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyRange {
    lower: Bound<SeekTuple>,
    upper: Bound<SeekTuple>,
    empty: bool,
}

impl KeyRange {
    /// Create a range from explicit bounds.
    pub fn new(lower: Bound<SeekTuple>, upper: Bound<SeekTuple>) -> Self {
        let empty = bounds_are_empty(&lower, &upper);
        Self {
            lower,
            upper,
            empty,
        }
    }

    /// Range covering every key.
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Keys whose prefix equals `prefix`.
    pub fn prefix(prefix: SeekTuple) -> Self {
        Self::new(Bound::Included(prefix.clone()), Bound::Included(prefix))
    }

    /// Lower bound.
    pub fn lower(&self) -> &Bound<SeekTuple> {
        &self.lower
    }

    /// Upper bound.
    pub fn upper(&self) -> &Bound<SeekTuple> {
        &self.upper
    }

    /// Whether the bounds are malformed so that no key can match.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Rows of a sorted block that fall inside the range.
    ///
    /// `key_columns` are the block's key arrays in key order.
    pub(crate) fn row_window(
        &self,
        key_columns: &[ArrayRef],
        num_rows: usize,
    ) -> Result<Range<usize>, ReadError> {
        if self.empty {
            return Ok(0..0);
        }
        let start = partition_point(0, num_rows, |row| {
            Ok(!self.admits_lower(key_columns, row)?)
        })?;
        let end = partition_point(start, num_rows, |row| self.admits_upper(key_columns, row))?;
        Ok(start..end)
    }

    fn admits_lower(&self, key_columns: &[ArrayRef], row: usize) -> Result<bool, ReadError> {
        Ok(match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(tuple) => compare_prefix(key_columns, row, tuple)? != Ordering::Less,
            Bound::Excluded(tuple) => {
                compare_prefix(key_columns, row, tuple)? == Ordering::Greater
            }
        })
    }

    fn admits_upper(&self, key_columns: &[ArrayRef], row: usize) -> Result<bool, ReadError> {
        Ok(match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(tuple) => {
                compare_prefix(key_columns, row, tuple)? != Ordering::Greater
            }
            Bound::Excluded(tuple) => compare_prefix(key_columns, row, tuple)? == Ordering::Less,
        })
    }
}

/// Whether ranges were given and none of them can match a key.
///
/// No ranges at all means every key.
pub fn excludes_every_key(ranges: &[KeyRange]) -> bool {
    !ranges.is_empty() && ranges.iter().all(KeyRange::is_empty)
}

/// Validate caller bounds against the key columns of `schema` and sort them by
/// lower bound.
///
/// Tuples longer than the key or holding values that do not fit the key types
/// are configuration errors. Inverted bounds are not: such a range is kept and
/// flagged empty. An empty input means the whole tablet and stays empty.
pub fn build_seek_ranges(schema: &Schema, ranges: &[KeyRange]) -> Result<Vec<KeyRange>, ConfigError> {
    let mut built = Vec::with_capacity(ranges.len());
    for range in ranges {
        for bound in [&range.lower, &range.upper] {
            if let Bound::Included(tuple) | Bound::Excluded(tuple) = bound {
                validate_tuple(schema, tuple)?;
            }
        }
        built.push(KeyRange::new(range.lower.clone(), range.upper.clone()));
    }
    built.sort_by(|a, b| cmp_lower(&a.lower, &b.lower));
    Ok(built)
}

fn validate_tuple(schema: &Schema, tuple: &[ScalarValue]) -> Result<(), ConfigError> {
    if tuple.len() > schema.num_key_columns() {
        return Err(ConfigError::SeekTupleTooLong {
            len: tuple.len(),
            key_columns: schema.num_key_columns(),
        });
    }
    for (position, literal) in tuple.iter().enumerate() {
        let data_type = schema.field(position).data_type();
        if literal.is_null() || !literal_fits(data_type, literal) {
            return Err(ConfigError::SeekTupleType {
                position,
                data_type: data_type.clone(),
                literal: literal.clone(),
            });
        }
    }
    Ok(())
}

/// Compare the key of `row` with a key prefix over the prefix's length.
pub fn compare_prefix(
    key_columns: &[ArrayRef],
    row: usize,
    prefix: &[ScalarValue],
) -> Result<Ordering, ReadError> {
    for (column, value) in key_columns.iter().zip(prefix) {
        let cell = scalar_at(column.as_ref(), row)?;
        match cell.compare(value.as_ref()) {
            Some(Ordering::Equal) | None => continue,
            Some(ordering) => return Ok(ordering),
        }
    }
    Ok(Ordering::Equal)
}

fn cmp_tuples(a: &[ScalarValue], b: &[ScalarValue]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y) {
            Some(Ordering::Equal) | None => continue,
            Some(ordering) => return ordering,
        }
    }
    a.len().cmp(&b.len())
}

fn bounds_are_empty(lower: &Bound<SeekTuple>, upper: &Bound<SeekTuple>) -> bool {
    let ((low, low_inclusive), (high, high_inclusive)) = match (lower, upper) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => return false,
        (Bound::Included(l), Bound::Included(u)) => ((l, true), (u, true)),
        (Bound::Included(l), Bound::Excluded(u)) => ((l, true), (u, false)),
        (Bound::Excluded(l), Bound::Included(u)) => ((l, false), (u, true)),
        (Bound::Excluded(l), Bound::Excluded(u)) => ((l, false), (u, false)),
    };
    let common = low.len().min(high.len());
    match cmp_tuples(&low[..common], &high[..common]) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => low.len() == high.len() && !(low_inclusive && high_inclusive),
    }
}

// Lower-bound comparator: Included(x) < Excluded(x) < Included(y) if x<y
fn cmp_lower(a: &Bound<SeekTuple>, b: &Bound<SeekTuple>) -> Ordering {
    use Bound as B;
    match (a, b) {
        (B::Unbounded, B::Unbounded) => Ordering::Equal,
        (B::Unbounded, _) => Ordering::Less,
        (_, B::Unbounded) => Ordering::Greater,
        (B::Included(x), B::Included(y)) => cmp_tuples(x, y),
        (B::Included(x), B::Excluded(y)) => match cmp_tuples(x, y) {
            Ordering::Equal => Ordering::Less,
            other => other,
        },
        (B::Excluded(x), B::Included(y)) => match cmp_tuples(x, y) {
            Ordering::Equal => Ordering::Greater,
            other => other,
        },
        (B::Excluded(x), B::Excluded(y)) => cmp_tuples(x, y),
    }
}

// First index in `lo..hi` for which `pred` is false; `pred` must be monotone.
fn partition_point<F>(mut lo: usize, mut hi: usize, mut pred: F) -> Result<usize, ReadError>
where
    F: FnMut(usize) -> Result<bool, ReadError>,
{
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if pred(mid)? {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

#[cfg(test)]
mod tests {
    use std::{ops::Bound, sync::Arc};

    use arrow::{
        array::{ArrayRef, Int64Array, StringArray},
        datatypes::DataType,
    };
    use tablet_predicate::ScalarValue;

    use super::{build_seek_ranges, excludes_every_key, KeyRange};
    use crate::{error::ConfigError, schema::Schema};

    fn key(values: &[i64]) -> Vec<ScalarValue> {
        values.iter().map(|v| ScalarValue::from(*v)).collect()
    }

    fn composite_schema() -> Schema {
        Schema::builder()
            .key_column(1, "a", DataType::Int64)
            .key_column(2, "b", DataType::Utf8)
            .column(3, "v", DataType::Int64, true)
            .build()
            .expect("schema")
    }

    #[test]
    fn only_all_empty_ranges_exclude_every_key() {
        let empty = KeyRange::new(Bound::Included(key(&[5])), Bound::Included(key(&[2])));
        assert!(!excludes_every_key(&[]));
        assert!(excludes_every_key(&[empty.clone(), empty.clone()]));
        assert!(!excludes_every_key(&[empty, KeyRange::all()]));
    }

    #[test]
    fn inverted_bounds_make_an_empty_range() {
        let range = KeyRange::new(Bound::Included(key(&[5])), Bound::Included(key(&[2])));
        assert!(range.is_empty());

        let touching = KeyRange::new(Bound::Included(key(&[3])), Bound::Excluded(key(&[3])));
        assert!(touching.is_empty());

        let point = KeyRange::new(Bound::Included(key(&[3])), Bound::Included(key(&[3])));
        assert!(!point.is_empty());

        let prefix = KeyRange::new(Bound::Excluded(key(&[3])), Bound::Included(key(&[3, 1])));
        assert!(!prefix.is_empty(), "different lengths are never flagged");
    }

    #[test]
    fn ranges_are_sorted_but_not_coalesced() {
        let schema = composite_schema();
        let ranges = vec![
            KeyRange::new(Bound::Included(key(&[10])), Bound::Unbounded),
            KeyRange::new(Bound::Excluded(key(&[1])), Bound::Included(key(&[12]))),
            KeyRange::new(Bound::Included(key(&[1])), Bound::Included(key(&[12]))),
            KeyRange::all(),
        ];
        let built = build_seek_ranges(&schema, &ranges).expect("valid ranges");
        assert_eq!(built.len(), 4);
        assert_eq!(built[0], KeyRange::all());
        assert_eq!(built[1].lower(), &Bound::Included(key(&[1])));
        assert_eq!(built[2].lower(), &Bound::Excluded(key(&[1])));
        assert_eq!(built[3].lower(), &Bound::Included(key(&[10])));
    }

    #[test]
    fn malformed_tuples_are_configuration_errors() {
        let schema = composite_schema();
        let too_long = KeyRange::new(Bound::Included(key(&[1, 2, 3])), Bound::Unbounded);
        assert!(matches!(
            build_seek_ranges(&schema, &[too_long]),
            Err(ConfigError::SeekTupleTooLong {
                len: 3,
                key_columns: 2
            })
        ));

        let wrong_type = KeyRange::new(Bound::Unbounded, Bound::Excluded(key(&[1, 2])));
        assert!(matches!(
            build_seek_ranges(&schema, &[wrong_type]),
            Err(ConfigError::SeekTupleType { position: 1, .. })
        ));
    }

    #[test]
    fn row_window_applies_prefix_bounds() {
        let a: ArrayRef = Arc::new(Int64Array::from(vec![1, 2, 2, 2, 3, 4]));
        let b: ArrayRef = Arc::new(StringArray::from(vec!["x", "a", "b", "c", "a", "a"]));
        let columns = [a, b];

        let whole_prefix = KeyRange::prefix(key(&[2]));
        assert_eq!(whole_prefix.row_window(&columns, 6).expect("window"), 1..4);

        let after_prefix = KeyRange::new(Bound::Excluded(key(&[2])), Bound::Unbounded);
        assert_eq!(after_prefix.row_window(&columns, 6).expect("window"), 4..6);

        let composite = KeyRange::new(
            Bound::Included(vec![2i64.into(), "b".into()]),
            Bound::Excluded(key(&[4])),
        );
        assert_eq!(composite.row_window(&columns, 6).expect("window"), 2..5);

        let empty = KeyRange::new(Bound::Included(key(&[4])), Bound::Excluded(key(&[1])));
        assert_eq!(empty.row_window(&columns, 6).expect("window"), 0..0);
    }
}

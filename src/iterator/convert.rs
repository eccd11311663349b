use std::sync::Arc;

use arrow::{
    array::{new_null_array, ArrayRef, BooleanArray},
    compute::{cast, filter},
};
use tablet_predicate::Predicate;

use super::{BatchStatus, ChunkIterator, ScanIterator};
use crate::{
    batch::Batch,
    error::{ConfigError, ReadError},
    eval::RowEvaluator,
    observability::log_debug,
    schema::{conversion_rule, Schema},
    stats::ReaderStatistics,
};

#[derive(Clone, Debug, PartialEq)]
enum ColumnSource {
    /// Physical column at `index`, cast when its type differs.
    Stored { index: usize, cast: bool },
    /// Column added after the segment was written; filled with nulls.
    Missing,
}

/// Adapts a producer written under an older schema to the target schema.
///
/// Columns are matched by id. Stored columns are cast along the conversion
/// table, added columns are filled with nulls. Predicates that referenced
/// added columns run here, after conversion.
pub struct ConvertIterator {
    inner: Box<ScanIterator>,
    target: Schema,
    plan: Vec<ColumnSource>,
    predicates: Vec<Predicate>,
    deletes: Vec<Predicate>,
    scratch: Option<Batch>,
}

impl ConvertIterator {
    /// Plan the conversion from `inner`'s schema to `target`.
    ///
    /// Fails when the key columns differ, when no conversion rule maps a stored
    /// column to its target type, or when a non-nullable target column is not
    /// stored.
    pub fn try_new(
        inner: ScanIterator,
        target: Schema,
        predicates: Vec<Predicate>,
        deletes: Vec<Predicate>,
    ) -> Result<Self, ConfigError> {
        let physical = inner.schema();
        if physical.key_column_ids() != target.key_column_ids() {
            return Err(ConfigError::KeyMismatch {
                expected: target.key_column_ids().to_vec(),
                actual: physical.key_column_ids().to_vec(),
            });
        }

        let mut plan = Vec::with_capacity(target.num_columns());
        for (idx, column) in target.column_ids().iter().enumerate() {
            let to = target.field(idx);
            let source = match physical.index_of(*column) {
                Some(index) => {
                    let from = physical.field(index).data_type();
                    if !conversion_rule(from, to.data_type()) {
                        return Err(ConfigError::MissingConversion {
                            column: *column,
                            from: from.clone(),
                            to: to.data_type().clone(),
                        });
                    }
                    ColumnSource::Stored {
                        index,
                        cast: from != to.data_type(),
                    }
                }
                None if to.is_nullable() => ColumnSource::Missing,
                None => return Err(ConfigError::MissingColumn { column: *column }),
            };
            plan.push(source);
        }

        log_debug!(
            component = "convert",
            event = "schema_conversion",
            producer = inner.producer_id(),
            casts = plan
                .iter()
                .filter(|s| matches!(s, ColumnSource::Stored { cast: true, .. }))
                .count(),
            added = plan.iter().filter(|s| **s == ColumnSource::Missing).count(),
            deferred_predicates = predicates.len() + deletes.len(),
        );

        Ok(Self {
            inner: Box::new(inner),
            target,
            plan,
            predicates,
            deletes,
            scratch: None,
        })
    }

    fn convert(&self, source: &Batch) -> Result<Vec<ArrayRef>, ReadError> {
        let rows = source.num_rows();
        self.plan
            .iter()
            .enumerate()
            .map(|(idx, column)| {
                let to = self.target.field(idx).data_type();
                match column {
                    ColumnSource::Stored { index, cast: false } => source
                        .column(*index)
                        .cloned()
                        .ok_or(ReadError::InvalidState {
                            op: "convert",
                            state: "source batch is missing a column",
                        }),
                    ColumnSource::Stored { index, cast: true } => {
                        let array = source.column(*index).ok_or(ReadError::InvalidState {
                            op: "convert",
                            state: "source batch is missing a column",
                        })?;
                        Ok(cast(array.as_ref(), to)?)
                    }
                    ColumnSource::Missing => Ok(new_null_array(to, rows)),
                }
            })
            .collect()
    }

    // Rows surviving the deferred deletes and predicates, or None when all do.
    fn residual_mask(
        &self,
        columns: &[ArrayRef],
        rows: usize,
        stats: &mut ReaderStatistics,
    ) -> Result<Option<BooleanArray>, ReadError> {
        if self.predicates.is_empty() && self.deletes.is_empty() {
            return Ok(None);
        }
        let mut keep = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut evaluator = RowEvaluator::new(&self.target, columns, row);
            if evaluator.matches_any(&self.deletes)? {
                stats.rows_del_filtered += 1;
                keep.push(false);
            } else if !evaluator.matches_all(&self.predicates)? {
                stats.rows_pred_filtered += 1;
                keep.push(false);
            } else {
                keep.push(true);
            }
        }
        Ok(Some(BooleanArray::from(keep)))
    }
}

impl ChunkIterator for ConvertIterator {
    fn init(&mut self) -> Result<(), ReadError> {
        self.inner.init()
    }

    fn next_batch(
        &mut self,
        batch: &mut Batch,
        stats: &mut ReaderStatistics,
    ) -> Result<BatchStatus, ReadError> {
        let mut scratch = match self.scratch.take() {
            Some(scratch) if scratch.capacity() == batch.capacity() => scratch,
            _ => Batch::new(
                Arc::clone(self.inner.schema().arrow_schema()),
                batch.capacity(),
            ),
        };

        let status = loop {
            scratch.reset();
            if self.inner.next_batch(&mut scratch, stats)? == BatchStatus::EndOfStream {
                batch.reset();
                break BatchStatus::EndOfStream;
            }
            let columns = self.convert(&scratch)?;
            let rows = scratch.num_rows();
            match self.residual_mask(&columns, rows, stats)? {
                None => {
                    batch.fill(columns, rows)?;
                    break BatchStatus::Filled;
                }
                Some(mask) => {
                    let kept = mask.true_count();
                    if kept == 0 {
                        continue;
                    }
                    let columns = columns
                        .iter()
                        .map(|column| filter(column.as_ref(), &mask))
                        .collect::<Result<Vec<_>, _>>()?;
                    batch.fill(columns, kept)?;
                    break BatchStatus::Filled;
                }
            }
        };

        self.scratch = Some(scratch);
        Ok(status)
    }

    fn schema(&self) -> &Schema {
        &self.target
    }

    fn producer_id(&self) -> u64 {
        self.inner.producer_id()
    }

    fn is_lazy_materialization(&self) -> bool {
        self.inner.is_lazy_materialization()
    }

    fn close(&mut self) {
        self.inner.close();
        self.scratch = None;
    }
}

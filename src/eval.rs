//! Predicate evaluation over Arrow columns.
//!
//! Two visitors walk predicate trees here: [`RowEvaluator`] decides a predicate
//! for one row, and [`BlockPruner`] decides from a block's key bounds alone
//! whether any row of the block may match.

use std::{cmp::Ordering, convert::Infallible};

use arrow::{
    array::{Array, ArrayRef, AsArray},
    datatypes::{
        DataType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
        UInt16Type, UInt32Type, UInt64Type, UInt8Type,
    },
};
use tablet_predicate::{
    ColumnId, ComparisonOp, Operand, Predicate, PredicateNode, PredicateVisitor, ScalarValue,
    ScalarValueRef, VisitOutcome,
};

use crate::{
    error::{ConfigError, ReadError},
    schema::Schema,
};

/// Borrow the value of one cell.
pub(crate) fn scalar_at(array: &dyn Array, row: usize) -> Result<ScalarValueRef<'_>, ReadError> {
    if array.is_null(row) {
        return Ok(ScalarValueRef::Null);
    }
    let value = match array.data_type() {
        DataType::Boolean => ScalarValueRef::Boolean(array.as_boolean().value(row)),
        DataType::Int8 => ScalarValueRef::Int64(i64::from(array.as_primitive::<Int8Type>().value(row))),
        DataType::Int16 => {
            ScalarValueRef::Int64(i64::from(array.as_primitive::<Int16Type>().value(row)))
        }
        DataType::Int32 => {
            ScalarValueRef::Int64(i64::from(array.as_primitive::<Int32Type>().value(row)))
        }
        DataType::Int64 => ScalarValueRef::Int64(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => {
            ScalarValueRef::UInt64(u64::from(array.as_primitive::<UInt8Type>().value(row)))
        }
        DataType::UInt16 => {
            ScalarValueRef::UInt64(u64::from(array.as_primitive::<UInt16Type>().value(row)))
        }
        DataType::UInt32 => {
            ScalarValueRef::UInt64(u64::from(array.as_primitive::<UInt32Type>().value(row)))
        }
        DataType::UInt64 => ScalarValueRef::UInt64(array.as_primitive::<UInt64Type>().value(row)),
        DataType::Float32 => {
            ScalarValueRef::Float64(f64::from(array.as_primitive::<Float32Type>().value(row)))
        }
        DataType::Float64 => {
            ScalarValueRef::Float64(array.as_primitive::<Float64Type>().value(row))
        }
        DataType::Utf8 => ScalarValueRef::Utf8(array.as_string::<i32>().value(row)),
        DataType::LargeUtf8 => ScalarValueRef::Utf8(array.as_string::<i64>().value(row)),
        DataType::Binary => ScalarValueRef::Binary(array.as_binary::<i32>().value(row)),
        DataType::LargeBinary => ScalarValueRef::Binary(array.as_binary::<i64>().value(row)),
        DataType::FixedSizeBinary(_) => {
            ScalarValueRef::Binary(array.as_fixed_size_binary().value(row))
        }
        other => {
            return Err(ConfigError::UnsupportedType {
                data_type: other.clone(),
            }
            .into())
        }
    };
    Ok(value)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TypeClass {
    Boolean,
    Integer,
    Float,
    Text,
    Bytes,
}

fn type_class(data_type: &DataType) -> Option<TypeClass> {
    match data_type {
        DataType::Boolean => Some(TypeClass::Boolean),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => Some(TypeClass::Integer),
        DataType::Float32 | DataType::Float64 => Some(TypeClass::Float),
        DataType::Utf8 | DataType::LargeUtf8 => Some(TypeClass::Text),
        DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) => {
            Some(TypeClass::Bytes)
        }
        _ => None,
    }
}

/// Whether a literal can be compared with values of `data_type`.
///
/// `NULL` fits every type; callers reject it where it is meaningless.
pub(crate) fn literal_fits(data_type: &DataType, literal: &ScalarValue) -> bool {
    let Some(class) = type_class(data_type) else {
        return false;
    };
    match literal {
        ScalarValue::Null => true,
        ScalarValue::Boolean(_) => class == TypeClass::Boolean,
        ScalarValue::Int64(_) | ScalarValue::UInt64(_) => {
            matches!(class, TypeClass::Integer | TypeClass::Float)
        }
        ScalarValue::Float64(_) => class == TypeClass::Float,
        ScalarValue::Utf8(_) => matches!(class, TypeClass::Text | TypeClass::Bytes),
        ScalarValue::Binary(_) => class == TypeClass::Bytes,
    }
}

/// Whether two column types can be compared with each other.
pub(crate) fn types_comparable(left: &DataType, right: &DataType) -> bool {
    match (type_class(left), type_class(right)) {
        (Some(l), Some(r)) => {
            l == r
                || matches!(
                    (l, r),
                    (TypeClass::Integer, TypeClass::Float) | (TypeClass::Float, TypeClass::Integer)
                )
        }
        _ => false,
    }
}

/// Whether `data_type` can be evaluated by predicates at all.
pub(crate) fn is_evaluable(data_type: &DataType) -> bool {
    type_class(data_type).is_some()
}

/// Evaluates predicates against one row of a set of columns laid out as `schema`.
pub(crate) struct RowEvaluator<'a> {
    schema: &'a Schema,
    columns: &'a [ArrayRef],
    row: usize,
}

impl<'a> RowEvaluator<'a> {
    pub(crate) fn new(schema: &'a Schema, columns: &'a [ArrayRef], row: usize) -> Self {
        Self {
            schema,
            columns,
            row,
        }
    }

    /// Whether the row satisfies `predicate`.
    pub(crate) fn matches(&mut self, predicate: &Predicate) -> Result<bool, ReadError> {
        let outcome = predicate.accept(self)?;
        Ok(outcome.value.unwrap_or(false))
    }

    /// Whether the row satisfies every predicate.
    pub(crate) fn matches_all(&mut self, predicates: &[Predicate]) -> Result<bool, ReadError> {
        for predicate in predicates {
            if !self.matches(predicate)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether the row satisfies at least one predicate.
    pub(crate) fn matches_any(&mut self, predicates: &[Predicate]) -> Result<bool, ReadError> {
        for predicate in predicates {
            if self.matches(predicate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn require(outcome: VisitOutcome<bool>) -> bool {
        outcome.value.unwrap_or(false)
    }
}

impl<'a> PredicateVisitor for RowEvaluator<'a> {
    type Error = ReadError;
    type Value = bool;

    fn visit_leaf(&mut self, leaf: &PredicateNode) -> Result<VisitOutcome<bool>, ReadError> {
        let result = match leaf {
            PredicateNode::True => true,
            PredicateNode::Compare { left, op, right } => {
                let lhs = resolve_in(self.schema, self.columns, self.row, left)?;
                let rhs = resolve_in(self.schema, self.columns, self.row, right)?;
                match lhs.compare(rhs) {
                    Some(ordering) => op.matches(ordering),
                    None => false,
                }
            }
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => {
                let value = resolve_in(self.schema, self.columns, self.row, expr)?;
                if value.is_null() {
                    false
                } else if *negated {
                    !list.iter().any(ScalarValue::is_null)
                        && !list
                            .iter()
                            .any(|literal| value.compare(literal.as_ref()) == Some(Ordering::Equal))
                } else {
                    list.iter()
                        .any(|literal| value.compare(literal.as_ref()) == Some(Ordering::Equal))
                }
            }
            PredicateNode::IsNull { expr, negated } => {
                let value = resolve_in(self.schema, self.columns, self.row, expr)?;
                value.is_null() != *negated
            }
            PredicateNode::Not(_) | PredicateNode::And(_) | PredicateNode::Or(_) => {
                unreachable!("visit_leaf only handles terminal variants")
            }
        };
        Ok(VisitOutcome::value(result))
    }

    fn combine_not(
        &mut self,
        _original: &Predicate,
        child: VisitOutcome<bool>,
    ) -> Result<VisitOutcome<bool>, ReadError> {
        Ok(VisitOutcome::value(!Self::require(child)))
    }

    fn combine_and(
        &mut self,
        _original: &Predicate,
        children: Vec<VisitOutcome<bool>>,
    ) -> Result<VisitOutcome<bool>, ReadError> {
        Ok(VisitOutcome::value(children.into_iter().all(Self::require)))
    }

    fn combine_or(
        &mut self,
        _original: &Predicate,
        children: Vec<VisitOutcome<bool>>,
    ) -> Result<VisitOutcome<bool>, ReadError> {
        Ok(VisitOutcome::value(children.into_iter().any(Self::require)))
    }
}

fn resolve_in<'v>(
    schema: &Schema,
    columns: &'v [ArrayRef],
    row: usize,
    operand: &'v Operand,
) -> Result<ScalarValueRef<'v>, ReadError> {
    match operand {
        Operand::Literal(literal) => Ok(literal.as_ref()),
        Operand::Column(column) => {
            let array = schema
                .index_of(column.id)
                .and_then(|idx| columns.get(idx))
                .ok_or(ConfigError::UnknownColumn { column: column.id })?;
            scalar_at(array.as_ref(), row)
        }
    }
}

/// Decides whether a block may hold rows matching a predicate, given the
/// smallest and largest value of one sorted column in the block.
pub(crate) struct BlockPruner<'a> {
    column: ColumnId,
    min: ScalarValueRef<'a>,
    max: ScalarValueRef<'a>,
    non_null: bool,
}

impl<'a> BlockPruner<'a> {
    /// `non_null` states that the column holds no `NULL`, as key columns do.
    pub(crate) fn new(
        column: ColumnId,
        min: ScalarValueRef<'a>,
        max: ScalarValueRef<'a>,
        non_null: bool,
    ) -> Self {
        Self {
            column,
            min,
            max,
            non_null,
        }
    }

    /// Whether some row of the block may satisfy `predicate`.
    pub(crate) fn may_match(&mut self, predicate: &Predicate) -> bool {
        match predicate.accept(self) {
            Ok(outcome) => outcome.value.unwrap_or(true),
            Err(never) => match never {},
        }
    }

    fn compare_may_match(&self, op: ComparisonOp, literal: ScalarValueRef<'_>) -> bool {
        let (Some(low), Some(high)) = (self.min.compare(literal), self.max.compare(literal)) else {
            return true;
        };
        match op {
            ComparisonOp::Equal => low != Ordering::Greater && high != Ordering::Less,
            ComparisonOp::NotEqual => !(low == Ordering::Equal && high == Ordering::Equal),
            ComparisonOp::LessThan => low == Ordering::Less,
            ComparisonOp::LessThanOrEqual => low != Ordering::Greater,
            ComparisonOp::GreaterThan => high == Ordering::Greater,
            ComparisonOp::GreaterThanOrEqual => high != Ordering::Less,
        }
    }

    fn targets(&self, operand: &Operand) -> bool {
        operand.column_id() == Some(self.column)
    }
}

impl<'a> PredicateVisitor for BlockPruner<'a> {
    type Error = Infallible;
    type Value = bool;

    fn visit_leaf(&mut self, leaf: &PredicateNode) -> Result<VisitOutcome<bool>, Infallible> {
        let may_match = match leaf {
            PredicateNode::Compare { left, op, right } => {
                match (left, right) {
                    (column, Operand::Literal(literal)) if self.targets(column) => {
                        self.compare_may_match(*op, literal.as_ref())
                    }
                    (Operand::Literal(literal), column) if self.targets(column) => {
                        self.compare_may_match(op.flipped(), literal.as_ref())
                    }
                    _ => true,
                }
            }
            PredicateNode::InList {
                expr,
                list,
                negated,
            } if self.targets(expr) => {
                if *negated {
                    !list.iter().any(ScalarValue::is_null)
                } else {
                    list.iter()
                        .any(|literal| self.compare_may_match(ComparisonOp::Equal, literal.as_ref()))
                }
            }
            PredicateNode::IsNull { expr, negated } if self.targets(expr) && self.non_null => {
                *negated
            }
            _ => true,
        };
        Ok(VisitOutcome::value(may_match))
    }

    fn combine_not(
        &mut self,
        _original: &Predicate,
        _child: VisitOutcome<bool>,
    ) -> Result<VisitOutcome<bool>, Infallible> {
        Ok(VisitOutcome::value(true))
    }

    fn combine_and(
        &mut self,
        _original: &Predicate,
        children: Vec<VisitOutcome<bool>>,
    ) -> Result<VisitOutcome<bool>, Infallible> {
        Ok(VisitOutcome::value(
            children.iter().all(|child| child.value.unwrap_or(true)),
        ))
    }

    fn combine_or(
        &mut self,
        _original: &Predicate,
        children: Vec<VisitOutcome<bool>>,
    ) -> Result<VisitOutcome<bool>, Infallible> {
        Ok(VisitOutcome::value(
            children.iter().any(|child| child.value.unwrap_or(true)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::{
        array::{ArrayRef, FixedSizeBinaryArray, Int32Array, StringArray, UInt8Array},
        datatypes::DataType,
    };
    use tablet_predicate::{ComparisonOp, Predicate, ScalarValue, ScalarValueRef};

    use super::{literal_fits, scalar_at, types_comparable, BlockPruner, RowEvaluator};
    use crate::schema::Schema;

    fn schema() -> Schema {
        Schema::builder()
            .key_column(1, "id", DataType::Int32)
            .column(2, "name", DataType::Utf8, true)
            .column(3, "small", DataType::UInt8, true)
            .build()
            .expect("schema")
    }

    fn columns() -> Vec<ArrayRef> {
        vec![
            Arc::new(Int32Array::from(vec![1, 2, 3])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            Arc::new(UInt8Array::from(vec![Some(10), Some(20), None])),
        ]
    }

    fn eval(predicate: &Predicate, row: usize) -> bool {
        let schema = schema();
        let columns = columns();
        RowEvaluator::new(&schema, &columns, row)
            .matches(predicate)
            .expect("evaluation")
    }

    #[test]
    fn cells_widen_to_scalar_refs() {
        let columns = columns();
        assert_eq!(
            scalar_at(columns[0].as_ref(), 1).expect("cell"),
            ScalarValueRef::Int64(2)
        );
        assert_eq!(
            scalar_at(columns[2].as_ref(), 0).expect("cell"),
            ScalarValueRef::UInt64(10)
        );
        assert!(scalar_at(columns[1].as_ref(), 1).expect("cell").is_null());

        let fixed = FixedSizeBinaryArray::try_from_iter(vec![b"ab".to_vec()].into_iter())
            .expect("fixed");
        assert_eq!(
            scalar_at(&fixed, 0).expect("cell"),
            ScalarValueRef::Binary(b"ab")
        );
    }

    #[test]
    fn comparisons_with_null_never_match() {
        assert!(eval(&Predicate::eq(2, "a"), 0));
        assert!(!eval(&Predicate::eq(2, "a"), 1));
        assert!(!eval(&Predicate::ne(2, "a"), 1));
        assert!(eval(&Predicate::is_null(2), 1));
        assert!(eval(&Predicate::is_not_null(3), 1));
        assert!(eval(&Predicate::gt(3, 15i64), 1));
    }

    #[test]
    fn value_in_set_semantics() {
        let members = Predicate::in_list(1, [3i64, 1]);
        assert!(eval(&members, 0));
        assert!(!eval(&members, 1));

        let excluded = Predicate::not_in_list(1, [3i64]);
        assert!(eval(&excluded, 0));
        assert!(!eval(&excluded, 2));

        let with_null = Predicate::not_in_list(1, [ScalarValue::from(9i64), ScalarValue::Null]);
        assert!(!eval(&with_null, 0));

        assert!(!eval(&Predicate::in_list(2, ["a", "b"]), 1));
    }

    #[test]
    fn boolean_structure_and_column_comparisons() {
        let predicate = Predicate::or([
            Predicate::and([Predicate::ge(1, 2i64), Predicate::is_null(3)]),
            Predicate::eq(2, "a"),
        ]);
        assert!(eval(&predicate, 0));
        assert!(!eval(&predicate, 1));
        assert!(eval(&predicate, 2));
        assert!(eval(&!Predicate::eq(1, 2i64), 0));

        let cross = Predicate::compare_columns(3, ComparisonOp::GreaterThan, 1);
        assert!(eval(&cross, 0));
        assert!(!eval(&cross, 2));
    }

    #[test]
    fn literal_and_column_compatibility() {
        assert!(literal_fits(&DataType::Float32, &ScalarValue::from(1i64)));
        assert!(!literal_fits(&DataType::Int32, &ScalarValue::from(1.5)));
        assert!(!literal_fits(&DataType::Utf8, &ScalarValue::from(1i64)));
        assert!(literal_fits(&DataType::Binary, &ScalarValue::from("x")));
        assert!(!literal_fits(&DataType::Date32, &ScalarValue::from(1i64)));
        assert!(types_comparable(&DataType::UInt8, &DataType::Float64));
        assert!(!types_comparable(&DataType::Utf8, &DataType::Int64));
    }

    #[test]
    fn block_pruning_from_key_bounds() {
        let min = ScalarValueRef::Int64(10);
        let max = ScalarValueRef::Int64(20);
        let mut pruner = BlockPruner::new(1, min, max, true);

        assert!(!pruner.may_match(&Predicate::lt(1, 10i64)));
        assert!(pruner.may_match(&Predicate::le(1, 10i64)));
        assert!(!pruner.may_match(&Predicate::gt(1, 20i64)));
        assert!(!pruner.may_match(&Predicate::eq(1, 25i64)));
        assert!(pruner.may_match(&Predicate::eq(1, 15i64)));
        assert!(!pruner.may_match(&Predicate::in_list(1, [1i64, 30])));
        assert!(pruner.may_match(&Predicate::in_list(1, [1i64, 12])));
        assert!(!pruner.may_match(&Predicate::is_null(1)));
        assert!(pruner.may_match(&Predicate::gt(2, 100i64)), "other columns never prune");
        assert!(!pruner.may_match(&Predicate::and([
            Predicate::gt(1, 0i64),
            Predicate::lt(1, 5i64)
        ])));
        assert!(pruner.may_match(&!Predicate::lt(1, 5i64)));

        let mut single = BlockPruner::new(1, ScalarValueRef::Int64(7), ScalarValueRef::Int64(7), true);
        assert!(!single.may_match(&Predicate::ne(1, 7i64)));
    }
}

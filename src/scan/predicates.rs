//! Column predicate index and per-version delete predicates.
//!
//! Both are validated against the target schema when built, so a malformed
//! predicate fails the scan before any segment is opened.

use std::collections::BTreeMap;

use tablet_predicate::{ColumnId, Operand, Predicate, PredicateNode, ScalarValue};

use super::Version;
use crate::{
    error::ConfigError,
    eval::{is_evaluable, literal_fits, types_comparable},
    schema::Schema,
};

/// Column predicates indexed by the column they constrain.
///
/// Predicates over one column are AND'ed in insertion order. Conjuncts that
/// span several columns are kept apart; they are evaluated after the merge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PredicateIndex {
    by_column: BTreeMap<ColumnId, Vec<Predicate>>,
    multi_column: Vec<Predicate>,
}

impl PredicateIndex {
    /// Split every predicate into conjuncts, validate them and index them.
    pub fn build(schema: &Schema, predicates: &[Predicate]) -> Result<Self, ConfigError> {
        let mut index = PredicateIndex::default();
        for predicate in predicates {
            for conjunct in predicate.clone().into_conjuncts() {
                validate_predicate(schema, &conjunct)?;
                match conjunct.column_id() {
                    Some(column) => index.by_column.entry(column).or_default().push(conjunct),
                    None => index.multi_column.push(conjunct),
                }
            }
        }
        Ok(index)
    }

    /// Predicates on one column.
    pub fn column_predicates(&self, column: ColumnId) -> &[Predicate] {
        self.by_column.get(&column).map_or(&[], Vec::as_slice)
    }

    /// Columns with at least one predicate, ascending.
    pub fn columns(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.by_column.keys().copied()
    }

    /// Single-column predicates grouped by column.
    pub fn iter(&self) -> impl Iterator<Item = (ColumnId, &[Predicate])> + '_ {
        self.by_column
            .iter()
            .map(|(column, predicates)| (*column, predicates.as_slice()))
    }

    /// Conjuncts referencing more than one column, or none.
    pub fn multi_column(&self) -> &[Predicate] {
        &self.multi_column
    }

    /// Total number of conjuncts.
    pub fn len(&self) -> usize {
        self.by_column.values().map(Vec::len).sum::<usize>() + self.multi_column.len()
    }

    /// Whether no predicate was registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Delete statements grouped by the version they were registered against.
///
/// Each entry is one conjunction; a row of version `v` is deleted when it
/// satisfies any conjunction registered for `v`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeletePredicates {
    by_version: BTreeMap<Version, Vec<Predicate>>,
}

impl DeletePredicates {
    /// Validate and group delete statements.
    pub fn build(
        schema: &Schema,
        entries: &[(Version, Predicate)],
    ) -> Result<Self, ConfigError> {
        let mut deletes = DeletePredicates::default();
        for (version, conjunction) in entries {
            validate_predicate(schema, conjunction)?;
            deletes
                .by_version
                .entry(*version)
                .or_default()
                .push(conjunction.clone());
        }
        Ok(deletes)
    }

    /// Conjunctions registered for `version`.
    pub fn for_version(&self, version: Version) -> &[Predicate] {
        self.by_version.get(&version).map_or(&[], Vec::as_slice)
    }

    /// Versions with at least one delete statement.
    pub fn versions(&self) -> impl Iterator<Item = Version> + '_ {
        self.by_version.keys().copied()
    }

    /// Whether no delete statement was registered.
    pub fn is_empty(&self) -> bool {
        self.by_version.is_empty()
    }
}

/// Check every leaf of `predicate` against `schema`.
pub(crate) fn validate_predicate(schema: &Schema, predicate: &Predicate) -> Result<(), ConfigError> {
    match predicate.kind() {
        PredicateNode::True => Ok(()),
        PredicateNode::Compare { left, right, .. } => validate_compare(schema, left, right),
        PredicateNode::InList { expr, list, .. } => {
            let column = column_of(schema, expr)?;
            if list.is_empty() {
                return Err(ConfigError::EmptyInList { column });
            }
            for literal in list {
                check_literal(schema, column, literal)?;
            }
            Ok(())
        }
        PredicateNode::IsNull { expr, .. } => column_of(schema, expr).map(|_| ()),
        PredicateNode::Not(inner) => validate_predicate(schema, inner),
        PredicateNode::And(children) | PredicateNode::Or(children) => children
            .iter()
            .try_for_each(|child| validate_predicate(schema, child)),
    }
}

fn validate_compare(schema: &Schema, left: &Operand, right: &Operand) -> Result<(), ConfigError> {
    match (left, right) {
        (Operand::Column(l), Operand::Column(r)) => {
            let left_type = evaluable_type(schema, l.id)?;
            let right_type = evaluable_type(schema, r.id)?;
            if types_comparable(&left_type, &right_type) {
                Ok(())
            } else {
                Err(ConfigError::IncomparableColumns {
                    left: l.id,
                    left_type,
                    right: r.id,
                    right_type,
                })
            }
        }
        (Operand::Column(column), Operand::Literal(literal))
        | (Operand::Literal(literal), Operand::Column(column)) => {
            if literal.is_null() {
                return Err(ConfigError::NullComparison { column: column.id });
            }
            check_literal(schema, column.id, literal)
        }
        (Operand::Literal(_), Operand::Literal(_)) => Ok(()),
    }
}

fn column_of(schema: &Schema, operand: &Operand) -> Result<ColumnId, ConfigError> {
    match operand {
        Operand::Column(column) => {
            evaluable_type(schema, column.id)?;
            Ok(column.id)
        }
        Operand::Literal(literal) => Err(ConfigError::InvalidSchema(format!(
            "expected a column operand, found literal {literal}"
        ))),
    }
}

fn evaluable_type(
    schema: &Schema,
    column: ColumnId,
) -> Result<arrow::datatypes::DataType, ConfigError> {
    let field = schema
        .field_by_id(column)
        .ok_or(ConfigError::UnknownColumn { column })?;
    if is_evaluable(field.data_type()) {
        Ok(field.data_type().clone())
    } else {
        Err(ConfigError::UnsupportedType {
            data_type: field.data_type().clone(),
        })
    }
}

fn check_literal(schema: &Schema, column: ColumnId, literal: &ScalarValue) -> Result<(), ConfigError> {
    let data_type = evaluable_type(schema, column)?;
    if literal_fits(&data_type, literal) {
        Ok(())
    } else {
        Err(ConfigError::TypeMismatch {
            column,
            data_type,
            literal: literal.clone(),
        })
    }
}

#![deny(missing_docs)]
//! Predicate facade crate for the tablet scan read path.
//!
//! Predicates reference columns by their stable column id rather than by name
//! or position, so the same predicate can be evaluated against a segment's
//! physical schema and against the scan's target schema after schema
//! evolution. Literal values are a small closed set of scalars; evaluation
//! against concrete column data lives with the caller.

mod core;

pub use core::{
    ColumnId, ColumnRef, ComparisonOp, Operand, Predicate, PredicateNode, PredicateVisitor,
    ScalarValue, ScalarValueRef, VisitOutcome,
};

//! Core predicate structures shared by every layer of the read path.

mod node;
mod operand;
mod value;
mod visitor;

pub use node::{ComparisonOp, Predicate, PredicateNode};
pub use operand::{ColumnId, ColumnRef, Operand};
pub use value::{ScalarValue, ScalarValueRef};
pub use visitor::{PredicateVisitor, VisitOutcome};

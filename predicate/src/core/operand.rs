use std::fmt;

use super::ScalarValue;

/// Stable identifier of a column inside a tablet schema.
pub type ColumnId = u32;

/// Reference identifying a column used inside predicates.
///
/// Columns are referenced by their stable id rather than by name or position,
/// so a predicate stays valid across schema evolution: binding the id to a
/// physical array happens when a reader evaluates the predicate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    /// Stable column id.
    pub id: ColumnId,
}

impl ColumnRef {
    /// Creates a new column reference from a column id.
    #[must_use]
    pub fn new(id: ColumnId) -> Self {
        Self { id }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.id)
    }
}

/// Operand used by predicate comparisons.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Reference to a column.
    Column(ColumnRef),
    /// Literal value.
    Literal(ScalarValue),
}

impl Operand {
    /// Returns the referenced column id when the operand is a column.
    #[must_use]
    pub fn column_id(&self) -> Option<ColumnId> {
        match self {
            Operand::Column(column) => Some(column.id),
            Operand::Literal(_) => None,
        }
    }

    /// Returns the literal when the operand is a literal.
    #[must_use]
    pub fn literal(&self) -> Option<&ScalarValue> {
        match self {
            Operand::Column(_) => None,
            Operand::Literal(value) => Some(value),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Column(column) => column.fmt(f),
            Operand::Literal(value) => value.fmt(f),
        }
    }
}

impl From<ColumnRef> for Operand {
    fn from(value: ColumnRef) -> Self {
        Self::Column(value)
    }
}

impl From<ScalarValue> for Operand {
    fn from(value: ScalarValue) -> Self {
        Self::Literal(value)
    }
}

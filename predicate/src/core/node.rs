use std::{cmp::Ordering, collections::BTreeSet, fmt, ops::Not};

use super::{ColumnId, ColumnRef, Operand, PredicateVisitor, ScalarValue, VisitOutcome};

/// Comparison operator used by binary predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    /// Equals (`=`).
    Equal,
    /// Not equals (`!=`).
    NotEqual,
    /// Less than (`<`).
    LessThan,
    /// Less than or equal to (`<=`).
    LessThanOrEqual,
    /// Greater than (`>`).
    GreaterThan,
    /// Greater than or equal to (`>=`).
    GreaterThanOrEqual,
}

impl ComparisonOp {
    /// Returns the operator that swaps the left/right side of the comparison.
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            ComparisonOp::Equal => ComparisonOp::Equal,
            ComparisonOp::NotEqual => ComparisonOp::NotEqual,
            ComparisonOp::LessThan => ComparisonOp::GreaterThan,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::GreaterThan => ComparisonOp::LessThan,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThanOrEqual,
        }
    }

    /// Returns true when `lhs.cmp(rhs) == ordering` satisfies `lhs <op> rhs`.
    #[must_use]
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Equal => ordering == Ordering::Equal,
            ComparisonOp::NotEqual => ordering != Ordering::Equal,
            ComparisonOp::LessThan => ordering == Ordering::Less,
            ComparisonOp::LessThanOrEqual => ordering != Ordering::Greater,
            ComparisonOp::GreaterThan => ordering == Ordering::Greater,
            ComparisonOp::GreaterThanOrEqual => ordering != Ordering::Less,
        }
    }

    fn negated(self) -> Self {
        match self {
            ComparisonOp::Equal => ComparisonOp::NotEqual,
            ComparisonOp::NotEqual => ComparisonOp::Equal,
            ComparisonOp::LessThan => ComparisonOp::GreaterThanOrEqual,
            ComparisonOp::LessThanOrEqual => ComparisonOp::GreaterThan,
            ComparisonOp::GreaterThan => ComparisonOp::LessThanOrEqual,
            ComparisonOp::GreaterThanOrEqual => ComparisonOp::LessThan,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
            ComparisonOp::LessThan => "<",
            ComparisonOp::LessThanOrEqual => "<=",
            ComparisonOp::GreaterThan => ">",
            ComparisonOp::GreaterThanOrEqual => ">=",
        })
    }
}

/// Recursive predicate node; leaf and branch variants coexist.
#[derive(Clone, Debug, PartialEq)]
pub enum PredicateNode {
    /// Always-true literal; matches all rows.
    True,
    /// Binary comparison.
    Compare {
        /// Left operand.
        left: Operand,
        /// Operator.
        op: ComparisonOp,
        /// Right operand.
        right: Operand,
    },
    /// Membership test against a literal list.
    ///
    /// A `NULL` input never matches, and a `NOT IN` list that contains `NULL`
    /// never matches either.
    InList {
        /// Value to test.
        expr: Operand,
        /// Literal candidates.
        list: Vec<ScalarValue>,
        /// True when representing `NOT IN`.
        negated: bool,
    },
    /// Null check (`IS NULL` / `IS NOT NULL`).
    IsNull {
        /// Operand under inspection.
        expr: Operand,
        /// True when representing `IS NOT NULL`.
        negated: bool,
    },
    /// Logical negation.
    Not(Box<Predicate>),
    /// Conjunction over multiple predicates.
    And(Vec<Predicate>),
    /// Disjunction over multiple predicates.
    Or(Vec<Predicate>),
}

impl PredicateNode {
    /// Returns true when the node has no child predicates.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(
            self,
            PredicateNode::True
                | PredicateNode::Compare { .. }
                | PredicateNode::InList { .. }
                | PredicateNode::IsNull { .. }
        )
    }
}

/// Logical predicate over the columns of one tablet.
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    kind: PredicateNode,
}

impl Predicate {
    /// Returns a reference to the underlying node.
    #[must_use]
    pub fn kind(&self) -> &PredicateNode {
        &self.kind
    }

    /// Builds a predicate directly from a single node.
    #[must_use]
    pub fn from_node(node: PredicateNode) -> Self {
        Self::from_kind(node)
    }

    /// Predicate that matches every row.
    #[must_use]
    pub fn always() -> Self {
        Self::from_kind(PredicateNode::True)
    }

    /// Compares a column against a literal.
    #[must_use]
    pub fn compare(column: ColumnId, op: ComparisonOp, value: impl Into<ScalarValue>) -> Self {
        Self::from_kind(PredicateNode::Compare {
            left: Operand::Column(ColumnRef::new(column)),
            op,
            right: Operand::Literal(value.into()),
        })
    }

    /// Compares two columns of the same row.
    #[must_use]
    pub fn compare_columns(left: ColumnId, op: ComparisonOp, right: ColumnId) -> Self {
        Self::from_kind(PredicateNode::Compare {
            left: Operand::Column(ColumnRef::new(left)),
            op,
            right: Operand::Column(ColumnRef::new(right)),
        })
    }

    /// `column = value`.
    #[must_use]
    pub fn eq(column: ColumnId, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::Equal, value)
    }

    /// `column != value`.
    #[must_use]
    pub fn ne(column: ColumnId, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::NotEqual, value)
    }

    /// `column < value`.
    #[must_use]
    pub fn lt(column: ColumnId, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::LessThan, value)
    }

    /// `column <= value`.
    #[must_use]
    pub fn le(column: ColumnId, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::LessThanOrEqual, value)
    }

    /// `column > value`.
    #[must_use]
    pub fn gt(column: ColumnId, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::GreaterThan, value)
    }

    /// `column >= value`.
    #[must_use]
    pub fn ge(column: ColumnId, value: impl Into<ScalarValue>) -> Self {
        Self::compare(column, ComparisonOp::GreaterThanOrEqual, value)
    }

    /// Value-in-set predicate built from a list of literals.
    #[must_use]
    pub fn in_list<I, V>(column: ColumnId, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ScalarValue>,
    {
        Self::set_membership(column, values, false)
    }

    /// Negated value-in-set predicate (`NOT IN`).
    #[must_use]
    pub fn not_in_list<I, V>(column: ColumnId, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ScalarValue>,
    {
        Self::set_membership(column, values, true)
    }

    /// `column IS NULL`.
    #[must_use]
    pub fn is_null(column: ColumnId) -> Self {
        Self::from_kind(PredicateNode::IsNull {
            expr: Operand::Column(ColumnRef::new(column)),
            negated: false,
        })
    }

    /// `column IS NOT NULL`.
    #[must_use]
    pub fn is_not_null(column: ColumnId) -> Self {
        Self::from_kind(PredicateNode::IsNull {
            expr: Operand::Column(ColumnRef::new(column)),
            negated: true,
        })
    }

    /// Builds a conjunction from the supplied clauses.
    ///
    /// Nested conjunctions are flattened and always-true clauses dropped; an
    /// empty conjunction is always true.
    #[must_use]
    pub fn and<I>(clauses: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let mut acc = Vec::new();
        for clause in clauses {
            match clause.into_kind() {
                PredicateNode::And(mut nested) => acc.append(&mut nested),
                PredicateNode::True => {}
                other => acc.push(Predicate::from_kind(other)),
            }
        }
        match acc.len() {
            0 => Self::always(),
            1 => acc.pop().unwrap_or_else(Self::always),
            _ => Self::from_kind(PredicateNode::And(acc)),
        }
    }

    /// Builds a disjunction from the supplied clauses.
    ///
    /// # Panics
    ///
    /// Panics if no clauses are provided.
    #[must_use]
    pub fn or<I>(clauses: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let mut acc = Vec::new();
        for clause in clauses {
            match clause.into_kind() {
                PredicateNode::Or(mut nested) => acc.append(&mut nested),
                PredicateNode::True => return Self::always(),
                other => acc.push(Predicate::from_kind(other)),
            }
        }

        assert!(
            !acc.is_empty(),
            "Predicate::or requires at least one clause"
        );

        if acc.len() == 1 {
            acc.pop().unwrap_or_else(Self::always)
        } else {
            Self::from_kind(PredicateNode::Or(acc))
        }
    }

    /// Applies simple simplification rules to reduce nesting.
    #[must_use]
    pub fn simplify(self) -> Self {
        match self.kind {
            PredicateNode::True
            | PredicateNode::Compare { .. }
            | PredicateNode::InList { .. }
            | PredicateNode::IsNull { .. } => self,
            PredicateNode::Not(inner) => {
                let simplified_child = inner.simplify();
                match simplified_child.into_kind() {
                    PredicateNode::Not(grandchild) => *grandchild,
                    other => Self::from_kind(PredicateNode::Not(Box::new(Self::from_kind(other)))),
                }
            }
            PredicateNode::And(clauses) => {
                Predicate::and(clauses.into_iter().map(Predicate::simplify))
            }
            PredicateNode::Or(clauses) => {
                Predicate::or(clauses.into_iter().map(Predicate::simplify))
            }
        }
    }

    /// Returns the logical negation of this predicate.
    ///
    /// Leaves are negated in place (`=` becomes `!=`, `IN` becomes `NOT IN`)
    /// and branches follow De Morgan.
    #[must_use]
    pub fn negate(self) -> Self {
        let negated = match self.kind {
            PredicateNode::True
            | PredicateNode::Compare { .. }
            | PredicateNode::InList { .. }
            | PredicateNode::IsNull { .. } => Predicate::negate_leaf(self.into_kind()),
            PredicateNode::Not(inner) => *inner,
            PredicateNode::And(children) => {
                Predicate::or(children.into_iter().map(Predicate::negate))
            }
            PredicateNode::Or(children) => {
                Predicate::and(children.into_iter().map(Predicate::negate))
            }
        };
        negated.simplify()
    }

    /// Builds a conjunction from the supplied predicates, if any are provided.
    #[must_use]
    pub fn conjunction(predicates: Vec<Predicate>) -> Option<Predicate> {
        match predicates.len() {
            0 => None,
            1 => predicates.into_iter().next(),
            _ => Some(Predicate::and(predicates).simplify()),
        }
    }

    /// Builds a disjunction from the supplied predicates, if any.
    #[must_use]
    pub fn disjunction(predicates: Vec<Predicate>) -> Option<Predicate> {
        match predicates.len() {
            0 => None,
            1 => predicates.into_iter().next(),
            _ => Some(Predicate::or(predicates).simplify()),
        }
    }

    /// Splits a top-level conjunction into its clauses.
    ///
    /// Always-true predicates produce no clauses.
    #[must_use]
    pub fn into_conjuncts(self) -> Vec<Predicate> {
        match self.kind {
            PredicateNode::And(clauses) => clauses
                .into_iter()
                .flat_map(Predicate::into_conjuncts)
                .collect(),
            PredicateNode::True => Vec::new(),
            other => vec![Predicate::from_kind(other)],
        }
    }

    /// Returns every column id referenced by the predicate.
    #[must_use]
    pub fn column_ids(&self) -> BTreeSet<ColumnId> {
        let mut ids = BTreeSet::new();
        self.collect_columns(&mut ids);
        ids
    }

    /// Returns the referenced column when the predicate touches exactly one column.
    #[must_use]
    pub fn column_id(&self) -> Option<ColumnId> {
        let ids = self.column_ids();
        if ids.len() == 1 {
            ids.into_iter().next()
        } else {
            None
        }
    }

    /// Accepts a visitor that walks the predicate tree bottom-up.
    pub fn accept<V>(&self, visitor: &mut V) -> Result<VisitOutcome<V::Value>, V::Error>
    where
        V: PredicateVisitor + ?Sized,
    {
        visitor.visit_predicate(self)
    }

    fn set_membership<I, V>(column: ColumnId, values: I, negated: bool) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ScalarValue>,
    {
        Self::from_kind(PredicateNode::InList {
            expr: Operand::Column(ColumnRef::new(column)),
            list: values.into_iter().map(Into::into).collect(),
            negated,
        })
    }

    fn collect_columns(&self, ids: &mut BTreeSet<ColumnId>) {
        match &self.kind {
            PredicateNode::True => {}
            PredicateNode::Compare { left, right, .. } => {
                ids.extend(left.column_id());
                ids.extend(right.column_id());
            }
            PredicateNode::InList { expr, .. } | PredicateNode::IsNull { expr, .. } => {
                ids.extend(expr.column_id());
            }
            PredicateNode::Not(inner) => inner.collect_columns(ids),
            PredicateNode::And(children) | PredicateNode::Or(children) => {
                for child in children {
                    child.collect_columns(ids);
                }
            }
        }
    }

    pub(crate) fn from_kind(kind: PredicateNode) -> Self {
        Self { kind }
    }

    fn into_kind(self) -> PredicateNode {
        self.kind
    }

    fn negate_leaf(leaf: PredicateNode) -> Predicate {
        let negated = match leaf {
            PredicateNode::Compare { left, op, right } => PredicateNode::Compare {
                left,
                op: op.negated(),
                right,
            },
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => PredicateNode::InList {
                expr,
                list,
                negated: !negated,
            },
            PredicateNode::IsNull { expr, negated } => PredicateNode::IsNull {
                expr,
                negated: !negated,
            },
            // NOT TRUE has no leaf form
            other => PredicateNode::Not(Box::new(Predicate::from_kind(other))),
        };
        Predicate::from_kind(negated)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    /// Wraps the predicate in a `NOT` node without rewriting it.
    fn not(self) -> Self::Output {
        Predicate::from_kind(PredicateNode::Not(Box::new(self)))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PredicateNode::True => f.write_str("TRUE"),
            PredicateNode::Compare { left, op, right } => write!(f, "{left} {op} {right}"),
            PredicateNode::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                for (idx, value) in list.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            PredicateNode::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            PredicateNode::Not(inner) => write!(f, "NOT ({inner})"),
            PredicateNode::And(children) => write_joined(f, children, " AND "),
            PredicateNode::Or(children) => write_joined(f, children, " OR "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, children: &[Predicate], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, child) in children.iter().enumerate() {
        if idx > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{child}")?;
    }
    f.write_str(")")
}

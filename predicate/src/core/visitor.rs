use super::{Predicate, PredicateNode};

/// Result produced while evaluating parts of a predicate tree.
#[derive(Clone, Debug, Default)]
pub struct VisitOutcome<T> {
    /// Computed value for the evaluated portion, when available.
    pub value: Option<T>,
    /// Residual predicate that still needs evaluation elsewhere.
    pub residual: Option<Predicate>,
}

impl<T> VisitOutcome<T> {
    /// Outcome containing only a computed value.
    pub fn value(value: T) -> Self {
        Self {
            value: Some(value),
            residual: None,
        }
    }

    /// Outcome containing only a residual predicate.
    pub fn residual(residual: Predicate) -> Self {
        Self {
            value: None,
            residual: Some(residual),
        }
    }

    /// Outcome without value or residual.
    pub fn empty() -> Self {
        Self {
            value: None,
            residual: None,
        }
    }
}

/// Visitor that walks predicate trees bottom-up.
///
/// Readers implement it twice: once to evaluate a predicate against a single
/// row, and once to decide whether a block of rows can be skipped from its
/// key bounds alone.
pub trait PredicateVisitor {
    /// Error type used when evaluation fails.
    type Error;
    /// Concrete value type produced while walking the predicate.
    type Value;

    /// Evaluates a leaf predicate and returns its result.
    fn visit_leaf(
        &mut self,
        leaf: &PredicateNode,
    ) -> Result<VisitOutcome<Self::Value>, Self::Error>;

    /// Combines the result of a negated child predicate.
    fn combine_not(
        &mut self,
        original: &Predicate,
        child: VisitOutcome<Self::Value>,
    ) -> Result<VisitOutcome<Self::Value>, Self::Error>;

    /// Combines an `AND` clause from the supplied child results.
    fn combine_and(
        &mut self,
        original: &Predicate,
        children: Vec<VisitOutcome<Self::Value>>,
    ) -> Result<VisitOutcome<Self::Value>, Self::Error>;

    /// Combines an `OR` clause from the supplied child results.
    fn combine_or(
        &mut self,
        original: &Predicate,
        children: Vec<VisitOutcome<Self::Value>>,
    ) -> Result<VisitOutcome<Self::Value>, Self::Error>;

    /// Visits the supplied predicate by walking the expression tree.
    fn visit_predicate(
        &mut self,
        predicate: &Predicate,
    ) -> Result<VisitOutcome<Self::Value>, Self::Error> {
        self.visit_node(predicate.kind(), predicate)
    }

    /// Evaluates a predicate node recursively.
    fn visit_node(
        &mut self,
        node: &PredicateNode,
        original: &Predicate,
    ) -> Result<VisitOutcome<Self::Value>, Self::Error> {
        match node {
            PredicateNode::Not(inner) => {
                let child = self.visit_predicate(inner)?;
                self.combine_not(original, child)
            }
            PredicateNode::And(clauses) => {
                let mut children = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    children.push(self.visit_predicate(clause)?);
                }
                self.combine_and(original, children)
            }
            PredicateNode::Or(clauses) => {
                debug_assert!(!clauses.is_empty(), "Predicate::or enforces one clause");
                let mut children = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    children.push(self.visit_predicate(clause)?);
                }
                self.combine_or(original, children)
            }
            leaf => {
                debug_assert!(leaf.is_leaf(), "non-leaf nodes handled earlier");
                self.visit_leaf(leaf)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::{PredicateVisitor, VisitOutcome};
    use crate::core::{Predicate, PredicateNode};

    /// Counts leaves and reports the tree depth.
    #[derive(Default)]
    struct LeafCounter {
        leaves: usize,
    }

    impl PredicateVisitor for LeafCounter {
        type Error = Infallible;
        type Value = usize;

        fn visit_leaf(&mut self, _leaf: &PredicateNode) -> Result<VisitOutcome<usize>, Infallible> {
            self.leaves += 1;
            Ok(VisitOutcome::value(1))
        }

        fn combine_not(
            &mut self,
            _original: &Predicate,
            child: VisitOutcome<usize>,
        ) -> Result<VisitOutcome<usize>, Infallible> {
            Ok(VisitOutcome::value(child.value.unwrap_or(0) + 1))
        }

        fn combine_and(
            &mut self,
            _original: &Predicate,
            children: Vec<VisitOutcome<usize>>,
        ) -> Result<VisitOutcome<usize>, Infallible> {
            let depth = children.iter().filter_map(|c| c.value).max().unwrap_or(0);
            Ok(VisitOutcome::value(depth + 1))
        }

        fn combine_or(
            &mut self,
            original: &Predicate,
            children: Vec<VisitOutcome<usize>>,
        ) -> Result<VisitOutcome<usize>, Infallible> {
            self.combine_and(original, children)
        }
    }

    #[test]
    fn visitor_walks_every_leaf() {
        let predicate = Predicate::and([
            Predicate::eq(1, 10i64),
            Predicate::or([Predicate::is_null(2), !Predicate::gt(3, 1i64)]),
        ]);
        let mut counter = LeafCounter::default();
        let outcome = predicate.accept(&mut counter).expect("infallible");
        assert_eq!(counter.leaves, 3);
        assert_eq!(outcome.value, Some(4));
        assert!(outcome.residual.is_none());
    }
}

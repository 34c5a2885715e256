use strata::{CmpOp, Result, TransactionId, Tuple, TupleDesc, TupleIterator};

use super::Operator;
use crate::expr::Expr;

/// Yields the child tuples for which `left op right` holds.
pub struct Filter {
    left: Expr,
    op: CmpOp,
    right: Expr,
    child: Box<dyn Operator>,
}

impl Filter {
    pub fn new(left: Expr, op: CmpOp, right: Expr, child: Box<dyn Operator>) -> Self {
        Self {
            left,
            op,
            right,
            child,
        }
    }
}

impl Operator for Filter {
    fn descriptor(&self) -> &TupleDesc {
        self.child.descriptor()
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(FilterIter {
            child: self.child.iterator(tid)?,
            left: self.left.clone(),
            op: self.op,
            right: self.right.clone(),
        }))
    }
}

struct FilterIter {
    child: Box<dyn TupleIterator>,
    left: Expr,
    op: CmpOp,
    right: Expr,
}

impl TupleIterator for FilterIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next()? {
            let left = self.left.eval(&tuple)?;
            let right = self.right.eval(&tuple)?;
            if left.eval_cmp(self.op, &right)? {
                return Ok(Some(tuple));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{drain, people, person};
    use strata::{Error, FieldDef, FieldKind};

    #[test]
    fn keeps_only_matching_tuples() {
        let child = people(&[("josie", 20), ("annie", 17)]);
        let filter = Filter::new(
            Expr::field(FieldDef::new("age", FieldKind::Int)),
            CmpOp::Gt,
            Expr::int(17),
            Box::new(child),
        );
        let out = drain(filter.iterator(TransactionId::fresh()).unwrap());
        assert_eq!(out, vec![person("josie", 20)]);
    }

    #[test]
    fn string_equality_filter() {
        let child = people(&[("josie", 20), ("annie", 17)]);
        let filter = Filter::new(
            Expr::field(FieldDef::new("name", FieldKind::String)),
            CmpOp::Eq,
            Expr::string("annie"),
            Box::new(child),
        );
        let out = drain(filter.iterator(TransactionId::fresh()).unwrap());
        assert_eq!(out, vec![person("annie", 17)]);
    }

    #[test]
    fn cross_kind_comparison_surfaces_the_error() {
        let child = people(&[("josie", 20)]);
        let filter = Filter::new(
            Expr::field(FieldDef::new("name", FieldKind::String)),
            CmpOp::Eq,
            Expr::int(1),
            Box::new(child),
        );
        let mut iter = filter.iterator(TransactionId::fresh()).unwrap();
        assert!(matches!(iter.next(), Err(Error::TypeMismatch(_))));
    }
}

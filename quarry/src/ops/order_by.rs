use std::cmp::Ordering;

use strata::{Error, FieldValue, Result, TransactionId, Tuple, TupleDesc, TupleIterator};

use super::Operator;
use crate::expr::Expr;

/// Blocking sort: drains the child, sorts the buffered tuples
/// lexicographically over the key expressions with per-key direction, then
/// streams them. Ties keep no particular order.
pub struct OrderBy {
    exprs: Vec<Expr>,
    ascending: Vec<bool>,
    child: Box<dyn Operator>,
}

impl OrderBy {
    pub fn new(exprs: Vec<Expr>, ascending: Vec<bool>, child: Box<dyn Operator>) -> Result<Self> {
        if exprs.len() != ascending.len() {
            return Err(Error::Malformed(format!(
                "{} order keys for {} direction flags",
                exprs.len(),
                ascending.len()
            )));
        }
        Ok(Self {
            exprs,
            ascending,
            child,
        })
    }
}

impl Operator for OrderBy {
    fn descriptor(&self) -> &TupleDesc {
        self.child.descriptor()
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        let mut child = self.child.iterator(tid)?;

        // Evaluate the sort keys up front so kind mismatches surface here
        // rather than inside the comparator.
        let mut keyed: Vec<(Vec<FieldValue>, Tuple)> = Vec::new();
        while let Some(tuple) = child.next()? {
            let mut key = Vec::with_capacity(self.exprs.len());
            for (i, expr) in self.exprs.iter().enumerate() {
                let value = expr.eval(&tuple)?;
                if let Some((first, _)) = keyed.first() {
                    if first[i].kind() != value.kind() {
                        return Err(Error::TypeMismatch(format!(
                            "order key {i} mixes {} and {}",
                            first[i].kind(),
                            value.kind()
                        )));
                    }
                }
                key.push(value);
            }
            keyed.push((key, tuple));
        }

        let ascending = self.ascending.clone();
        keyed.sort_unstable_by(|(a, _), (b, _)| {
            for (i, (ka, kb)) in a.iter().zip(b).enumerate() {
                let ord = ka.compare(kb).unwrap_or(Ordering::Equal);
                let ord = if ascending[i] { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        Ok(Box::new(SortedIter(
            keyed.into_iter().map(|(_, t)| t).collect::<Vec<_>>().into_iter(),
        )))
    }
}

struct SortedIter(std::vec::IntoIter<Tuple>);

impl TupleIterator for SortedIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        Ok(self.0.next())
    }
}

use strata::{Result, TransactionId, Tuple, TupleDesc, TupleIterator};

use super::Operator;

/// Yields at most `n` tuples from the child.
pub struct Limit {
    n: usize,
    child: Box<dyn Operator>,
}

impl Limit {
    pub fn new(n: usize, child: Box<dyn Operator>) -> Self {
        Self { n, child }
    }
}

impl Operator for Limit {
    fn descriptor(&self) -> &TupleDesc {
        self.child.descriptor()
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(LimitIter {
            child: self.child.iterator(tid)?,
            remaining: self.n,
        }))
    }
}

struct LimitIter {
    child: Box<dyn TupleIterator>,
    remaining: usize,
}

impl TupleIterator for LimitIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.child.next()? {
            Some(tuple) => {
                self.remaining -= 1;
                Ok(Some(tuple))
            }
            None => Ok(None),
        }
    }
}

use std::collections::HashSet;

use strata::{Error, Result, TransactionId, Tuple, TupleDesc, TupleIterator};

use super::Operator;
use crate::expr::Expr;

/// Yields new tuples holding only the selected expressions, renamed to the
/// requested output names. With `distinct`, duplicate output tuples are
/// suppressed using their serialized form as the key.
pub struct Project {
    select: Vec<Expr>,
    distinct: bool,
    child: Box<dyn Operator>,
    desc: TupleDesc,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("select", &self.select)
            .field("distinct", &self.distinct)
            .field("desc", &self.desc)
            .finish()
    }
}

impl Project {
    pub fn new(
        select: Vec<Expr>,
        output_names: Vec<String>,
        distinct: bool,
        child: Box<dyn Operator>,
    ) -> Result<Self> {
        if select.len() != output_names.len() {
            return Err(Error::Malformed(format!(
                "{} select expressions for {} output names",
                select.len(),
                output_names.len()
            )));
        }
        let fields = select
            .iter()
            .zip(&output_names)
            .map(|(expr, name)| {
                let mut field = expr.out_field();
                field.name = name.clone();
                field
            })
            .collect();
        Ok(Self {
            select,
            distinct,
            child,
            desc: TupleDesc::new(fields),
        })
    }
}

impl Operator for Project {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(ProjectIter {
            child: self.child.iterator(tid)?,
            select: self.select.clone(),
            desc: self.desc.clone(),
            seen: self.distinct.then(HashSet::new),
        }))
    }
}

struct ProjectIter {
    child: Box<dyn TupleIterator>,
    select: Vec<Expr>,
    desc: TupleDesc,
    seen: Option<HashSet<Vec<u8>>>,
}

impl TupleIterator for ProjectIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        while let Some(tuple) = self.child.next()? {
            let mut values = Vec::with_capacity(self.select.len());
            for expr in &self.select {
                values.push(expr.eval(&tuple)?);
            }
            let out = Tuple::new(self.desc.clone(), values);
            if let Some(seen) = &mut self.seen {
                if !seen.insert(out.key_bytes()) {
                    continue;
                }
            }
            return Ok(Some(out));
        }
        Ok(None)
    }
}

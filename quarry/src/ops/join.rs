use std::cmp::Ordering;
use std::collections::VecDeque;

use strata::{Error, FieldValue, Result, TransactionId, Tuple, TupleDesc, TupleIterator};

use super::Operator;
use crate::expr::Expr;

/// Equi-join on one field per side, implemented as a sort-merge: both inputs
/// are buffered and sorted by their join key, then walked in lockstep,
/// emitting the full Cartesian product within each equal-key run. The output
/// descriptor is the merge of the child descriptors.
pub struct Join {
    left: Box<dyn Operator>,
    left_field: Expr,
    right: Box<dyn Operator>,
    right_field: Expr,
    /// Sizing hint for the buffered inputs.
    max_buffer: usize,
    desc: TupleDesc,
}

impl std::fmt::Debug for Join {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Join")
            .field("left_field", &self.left_field)
            .field("right_field", &self.right_field)
            .field("max_buffer", &self.max_buffer)
            .field("desc", &self.desc)
            .finish()
    }
}

impl Join {
    pub fn new(
        left: Box<dyn Operator>,
        left_field: Expr,
        right: Box<dyn Operator>,
        right_field: Expr,
        max_buffer: usize,
    ) -> Result<Self> {
        if left_field.out_field().kind != right_field.out_field().kind {
            return Err(Error::TypeMismatch(format!(
                "join keys have kinds {} and {}",
                left_field.out_field().kind,
                right_field.out_field().kind
            )));
        }
        let desc = left.descriptor().merge(right.descriptor());
        Ok(Self {
            left,
            left_field,
            right,
            right_field,
            max_buffer,
            desc,
        })
    }

    fn drain_sorted(
        iter: &mut dyn TupleIterator,
        key: &Expr,
        capacity: usize,
    ) -> Result<(Vec<FieldValue>, Vec<Tuple>)> {
        let mut keyed: Vec<(FieldValue, Tuple)> = Vec::with_capacity(capacity);
        while let Some(tuple) = iter.next()? {
            keyed.push((key.eval(&tuple)?, tuple));
        }
        keyed.sort_unstable_by(|(a, _), (b, _)| a.compare(b).unwrap_or(Ordering::Equal));
        Ok(keyed.into_iter().unzip())
    }
}

impl Operator for Join {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        let capacity = self.max_buffer.min(4096);
        let (left_keys, left) = Self::drain_sorted(
            self.left.iterator(tid)?.as_mut(),
            &self.left_field,
            capacity,
        )?;
        let (right_keys, right) = Self::drain_sorted(
            self.right.iterator(tid)?.as_mut(),
            &self.right_field,
            capacity,
        )?;

        // Walk both sorted sides once, recording each equal-key run as an
        // index-range pair; the iterator streams the products lazily.
        let mut runs = VecDeque::new();
        let (mut li, mut ri) = (0, 0);
        while li < left.len() && ri < right.len() {
            match left_keys[li].compare(&right_keys[ri])? {
                Ordering::Less => li += 1,
                Ordering::Greater => ri += 1,
                Ordering::Equal => {
                    let mut l_end = li + 1;
                    while l_end < left.len()
                        && left_keys[l_end].compare(&left_keys[li])? == Ordering::Equal
                    {
                        l_end += 1;
                    }
                    let mut r_end = ri + 1;
                    while r_end < right.len()
                        && right_keys[r_end].compare(&right_keys[ri])? == Ordering::Equal
                    {
                        r_end += 1;
                    }
                    runs.push_back(Run {
                        l_start: li,
                        l_end,
                        r_start: ri,
                        r_end,
                    });
                    li = l_end;
                    ri = r_end;
                }
            }
        }

        Ok(Box::new(JoinIter {
            left,
            right,
            runs,
            current: None,
        }))
    }
}

#[derive(Clone, Copy)]
struct Run {
    l_start: usize,
    l_end: usize,
    r_start: usize,
    r_end: usize,
}

struct Cursor {
    run: Run,
    i: usize,
    j: usize,
}

struct JoinIter {
    left: Vec<Tuple>,
    right: Vec<Tuple>,
    runs: VecDeque<Run>,
    current: Option<Cursor>,
}

impl TupleIterator for JoinIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(cursor) = &mut self.current {
                if cursor.i < cursor.run.l_end {
                    let joined = self.left[cursor.i].join(&self.right[cursor.j]);
                    cursor.j += 1;
                    if cursor.j == cursor.run.r_end {
                        cursor.j = cursor.run.r_start;
                        cursor.i += 1;
                    }
                    return Ok(Some(joined));
                }
                self.current = None;
            }
            match self.runs.pop_front() {
                Some(run) => {
                    self.current = Some(Cursor {
                        i: run.l_start,
                        j: run.r_start,
                        run,
                    });
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{drain, people, person};
    use strata::{FieldDef, FieldKind};

    fn age_key() -> Expr {
        Expr::field(FieldDef::new("age", FieldKind::Int))
    }

    #[test]
    fn equal_key_runs_produce_the_cartesian_product() {
        let left = people(&[("josie", 20), ("annie", 17), ("annie2", 17)]);
        let right = people(&[("josie", 20), ("annie", 17), ("annie2", 17)]);
        let join = Join::new(
            Box::new(left),
            age_key(),
            Box::new(right),
            age_key(),
            100,
        )
        .unwrap();

        let out = drain(join.iterator(TransactionId::fresh()).unwrap());
        // One 20-20 pair plus a 2x2 block of 17s.
        assert_eq!(out.len(), 5);
        let j = person("josie", 20).join(&person("josie", 20));
        assert_eq!(out.iter().filter(|t| **t == j).count(), 1);
    }

    #[test]
    fn descriptor_is_the_merge_of_both_sides() {
        let join = Join::new(
            Box::new(people(&[])),
            age_key(),
            Box::new(people(&[])),
            age_key(),
            10,
        )
        .unwrap();
        assert_eq!(join.descriptor().len(), 4);
        assert!(drain(join.iterator(TransactionId::fresh()).unwrap()).is_empty());
    }

    #[test]
    fn mismatched_key_kinds_are_rejected() {
        let err = Join::new(
            Box::new(people(&[])),
            Expr::field(FieldDef::new("name", FieldKind::String)),
            Box::new(people(&[])),
            age_key(),
            10,
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn disjoint_keys_join_to_nothing() {
        let left = people(&[("a", 1), ("b", 2)]);
        let right = people(&[("c", 3), ("d", 4)]);
        let join = Join::new(Box::new(left), age_key(), Box::new(right), age_key(), 10).unwrap();
        assert!(drain(join.iterator(TransactionId::fresh()).unwrap()).is_empty());
    }
}

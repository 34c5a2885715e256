use std::collections::HashMap;

use strata::{
    CmpOp, Error, FieldDef, FieldKind, FieldValue, Result, TransactionId, Tuple, TupleDesc,
    TupleIterator,
};

use super::Operator;
use crate::expr::Expr;

/// One running aggregation. States are cloned per group for GROUP BY.
pub trait AggState: Send + Sync {
    fn add_tuple(&mut self, tuple: &Tuple) -> Result<()>;

    /// The final result as a one-field tuple.
    fn finalize(&self) -> Result<Tuple>;

    fn descriptor(&self) -> TupleDesc;

    fn boxed_clone(&self) -> Box<dyn AggState>;
}

fn int_desc(alias: &str) -> TupleDesc {
    TupleDesc::new(vec![FieldDef::new(alias, FieldKind::Int)])
}

fn int_of(expr: &Expr, tuple: &Tuple, what: &str) -> Result<i64> {
    match expr.eval(tuple)? {
        FieldValue::Int(v) => Ok(v),
        FieldValue::String(_) => Err(Error::TypeMismatch(format!(
            "{what} over a string field"
        ))),
    }
}

#[derive(Clone)]
pub struct CountAgg {
    alias: String,
    count: i64,
}

impl CountAgg {
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            count: 0,
        }
    }
}

impl AggState for CountAgg {
    fn add_tuple(&mut self, _tuple: &Tuple) -> Result<()> {
        self.count += 1;
        Ok(())
    }

    fn finalize(&self) -> Result<Tuple> {
        Ok(Tuple::new(
            self.descriptor(),
            vec![FieldValue::Int(self.count)],
        ))
    }

    fn descriptor(&self) -> TupleDesc {
        int_desc(&self.alias)
    }

    fn boxed_clone(&self) -> Box<dyn AggState> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct SumAgg {
    alias: String,
    expr: Expr,
    sum: i64,
}

impl SumAgg {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
            sum: 0,
        }
    }
}

impl AggState for SumAgg {
    fn add_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        self.sum += int_of(&self.expr, tuple, "SUM")?;
        Ok(())
    }

    fn finalize(&self) -> Result<Tuple> {
        Ok(Tuple::new(
            self.descriptor(),
            vec![FieldValue::Int(self.sum)],
        ))
    }

    fn descriptor(&self) -> TupleDesc {
        int_desc(&self.alias)
    }

    fn boxed_clone(&self) -> Box<dyn AggState> {
        Box::new(self.clone())
    }
}

/// Integer average: sum and count accumulate over every added tuple and
/// divide once at finalize. Averaging zero tuples is an error.
#[derive(Clone)]
pub struct AvgAgg {
    alias: String,
    expr: Expr,
    sum: i64,
    count: i64,
}

impl AvgAgg {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
            sum: 0,
            count: 0,
        }
    }
}

impl AggState for AvgAgg {
    fn add_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        self.sum += int_of(&self.expr, tuple, "AVG")?;
        self.count += 1;
        Ok(())
    }

    fn finalize(&self) -> Result<Tuple> {
        if self.count == 0 {
            return Err(Error::Malformed("AVG over empty input".to_string()));
        }
        Ok(Tuple::new(
            self.descriptor(),
            vec![FieldValue::Int(self.sum / self.count)],
        ))
    }

    fn descriptor(&self) -> TupleDesc {
        int_desc(&self.alias)
    }

    fn boxed_clone(&self) -> Box<dyn AggState> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct MinAgg {
    alias: String,
    expr: Expr,
    best: Option<FieldValue>,
}

impl MinAgg {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
            best: None,
        }
    }
}

impl AggState for MinAgg {
    fn add_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let value = self.expr.eval(tuple)?;
        match &self.best {
            None => self.best = Some(value),
            Some(best) => {
                if value.eval_cmp(CmpOp::Lt, best)? {
                    self.best = Some(value);
                }
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Result<Tuple> {
        let best = self
            .best
            .clone()
            .ok_or_else(|| Error::Malformed("MIN over empty input".to_string()))?;
        Ok(Tuple::new(self.descriptor(), vec![best]))
    }

    fn descriptor(&self) -> TupleDesc {
        TupleDesc::new(vec![FieldDef::new(
            self.alias.clone(),
            self.expr.out_field().kind,
        )])
    }

    fn boxed_clone(&self) -> Box<dyn AggState> {
        Box::new(self.clone())
    }
}

#[derive(Clone)]
pub struct MaxAgg {
    alias: String,
    expr: Expr,
    best: Option<FieldValue>,
}

impl MaxAgg {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
            best: None,
        }
    }
}

impl AggState for MaxAgg {
    fn add_tuple(&mut self, tuple: &Tuple) -> Result<()> {
        let value = self.expr.eval(tuple)?;
        match &self.best {
            None => self.best = Some(value),
            Some(best) => {
                if value.eval_cmp(CmpOp::Gt, best)? {
                    self.best = Some(value);
                }
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Result<Tuple> {
        let best = self
            .best
            .clone()
            .ok_or_else(|| Error::Malformed("MAX over empty input".to_string()))?;
        Ok(Tuple::new(self.descriptor(), vec![best]))
    }

    fn descriptor(&self) -> TupleDesc {
        TupleDesc::new(vec![FieldDef::new(
            self.alias.clone(),
            self.expr.out_field().kind,
        )])
    }

    fn boxed_clone(&self) -> Box<dyn AggState> {
        Box::new(self.clone())
    }
}

/// Blocking aggregation, with optional GROUP BY. Without grouping it yields
/// one tuple of the finalized states; with grouping it yields one tuple per
/// group, the group values followed by the finalized aggregates.
pub struct Aggregate {
    group_by: Vec<Expr>,
    states: Vec<Box<dyn AggState>>,
    child: Box<dyn Operator>,
    group_desc: TupleDesc,
    desc: TupleDesc,
}

impl Aggregate {
    pub fn new(
        group_by: Vec<Expr>,
        states: Vec<Box<dyn AggState>>,
        child: Box<dyn Operator>,
    ) -> Result<Self> {
        if states.is_empty() {
            return Err(Error::Malformed("no aggregate states".to_string()));
        }
        let group_desc = TupleDesc::new(group_by.iter().map(Expr::out_field).collect());
        let mut desc = group_desc.clone();
        for state in &states {
            desc = desc.merge(&state.descriptor());
        }
        Ok(Self {
            group_by,
            states,
            child,
            group_desc,
            desc,
        })
    }

    fn fresh_states(&self) -> Vec<Box<dyn AggState>> {
        self.states.iter().map(|s| s.boxed_clone()).collect()
    }

    fn finalize_row(&self, prefix: Option<Tuple>, states: &[Box<dyn AggState>]) -> Result<Tuple> {
        let mut out = prefix;
        for state in states {
            let finalized = state.finalize()?;
            out = Some(match out {
                None => finalized,
                Some(acc) => acc.join(&finalized),
            });
        }
        out.ok_or_else(|| Error::Malformed("no aggregate states".to_string()))
    }
}

impl Operator for Aggregate {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        let mut child = self.child.iterator(tid)?;

        let rows: Vec<Tuple> = if self.group_by.is_empty() {
            let mut states = self.fresh_states();
            while let Some(tuple) = child.next()? {
                for state in &mut states {
                    state.add_tuple(&tuple)?;
                }
            }
            vec![self.finalize_row(None, &states)?]
        } else {
            struct Group {
                values: Vec<FieldValue>,
                states: Vec<Box<dyn AggState>>,
            }
            let mut groups: HashMap<Vec<u8>, Group> = HashMap::new();
            // First-seen order keeps the output deterministic.
            let mut order: Vec<Vec<u8>> = Vec::new();

            while let Some(tuple) = child.next()? {
                let mut values = Vec::with_capacity(self.group_by.len());
                for expr in &self.group_by {
                    values.push(expr.eval(&tuple)?);
                }
                let key = Tuple::new(self.group_desc.clone(), values.clone()).key_bytes();
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                    groups.insert(
                        key.clone(),
                        Group {
                            values,
                            states: self.fresh_states(),
                        },
                    );
                }
                let group = groups
                    .get_mut(&key)
                    .ok_or_else(|| Error::Malformed("aggregate group vanished".to_string()))?;
                for state in &mut group.states {
                    state.add_tuple(&tuple)?;
                }
            }

            let mut rows = Vec::with_capacity(order.len());
            for key in &order {
                let group = groups.remove(key).ok_or_else(|| {
                    Error::Malformed("aggregate group vanished".to_string())
                })?;
                let prefix = Tuple::new(self.group_desc.clone(), group.values);
                rows.push(self.finalize_row(Some(prefix), &group.states)?);
            }
            rows
        };

        Ok(Box::new(RowsIter(rows.into_iter())))
    }
}

struct RowsIter(std::vec::IntoIter<Tuple>);

impl TupleIterator for RowsIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        Ok(self.0.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{drain, people};

    fn age_expr() -> Expr {
        Expr::field(FieldDef::new("age", FieldKind::Int))
    }

    fn name_expr() -> Expr {
        Expr::field(FieldDef::new("name", FieldKind::String))
    }

    #[test]
    fn ungrouped_aggregates_yield_one_row() {
        let child = people(&[("josie", 20), ("annie", 17), ("rosie", 29)]);
        let agg = Aggregate::new(
            vec![],
            vec![
                Box::new(CountAgg::new("n")),
                Box::new(SumAgg::new("total", age_expr())),
                Box::new(AvgAgg::new("avg", age_expr())),
                Box::new(MinAgg::new("youngest", age_expr())),
                Box::new(MaxAgg::new("oldest", age_expr())),
            ],
            Box::new(child),
        )
        .unwrap();

        let out = drain(agg.iterator(TransactionId::fresh()).unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].values,
            vec![
                FieldValue::Int(3),
                FieldValue::Int(66),
                FieldValue::Int(22),
                FieldValue::Int(17),
                FieldValue::Int(29),
            ]
        );
    }

    #[test]
    fn avg_uses_integer_division_over_all_tuples() {
        let child = people(&[("a", 20), ("b", 17)]);
        let agg = Aggregate::new(
            vec![],
            vec![Box::new(AvgAgg::new("avg", age_expr()))],
            Box::new(child),
        )
        .unwrap();
        let out = drain(agg.iterator(TransactionId::fresh()).unwrap());
        // (20 + 17) / 2 = 18 in integer arithmetic.
        assert_eq!(out[0].values, vec![FieldValue::Int(18)]);
    }

    #[test]
    fn avg_over_empty_input_is_an_error() {
        let child = people(&[]);
        let agg = Aggregate::new(
            vec![],
            vec![Box::new(AvgAgg::new("avg", age_expr()))],
            Box::new(child),
        )
        .unwrap();
        let mut iter = agg.iterator(TransactionId::fresh()).unwrap();
        assert!(iter.next().is_err());
    }

    #[test]
    fn min_works_on_strings() {
        let child = people(&[("josie", 20), ("annie", 17)]);
        let agg = Aggregate::new(
            vec![],
            vec![Box::new(MinAgg::new("first", name_expr()))],
            Box::new(child),
        )
        .unwrap();
        let out = drain(agg.iterator(TransactionId::fresh()).unwrap());
        assert_eq!(
            out[0].values,
            vec![FieldValue::String("annie".to_string())]
        );
        assert_eq!(out[0].desc.fields[0].kind, FieldKind::String);
    }

    #[test]
    fn group_by_keys_states_per_group() {
        let child = people(&[("annie", 10), ("josie", 20), ("annie", 30), ("josie", 2)]);
        let agg = Aggregate::new(
            vec![name_expr()],
            vec![
                Box::new(CountAgg::new("n")),
                Box::new(SumAgg::new("total", age_expr())),
            ],
            Box::new(child),
        )
        .unwrap();

        let out = drain(agg.iterator(TransactionId::fresh()).unwrap());
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].values,
            vec![
                FieldValue::String("annie".to_string()),
                FieldValue::Int(2),
                FieldValue::Int(40),
            ]
        );
        assert_eq!(
            out[1].values,
            vec![
                FieldValue::String("josie".to_string()),
                FieldValue::Int(2),
                FieldValue::Int(22),
            ]
        );
    }

    #[test]
    fn sum_over_strings_is_a_type_mismatch() {
        let child = people(&[("josie", 20)]);
        let agg = Aggregate::new(
            vec![],
            vec![Box::new(SumAgg::new("total", name_expr()))],
            Box::new(child),
        )
        .unwrap();
        let mut iter = agg.iterator(TransactionId::fresh()).unwrap();
        assert!(matches!(iter.next(), Err(Error::TypeMismatch(_))));
    }
}

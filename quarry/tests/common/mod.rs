#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use quarry::ops::Operator;
use strata::{
    BufferPool, ColumnFile, DbFile, FieldDef, FieldKind, FieldValue, HeapFile, Result,
    TransactionId, Tuple, TupleDesc, TupleIterator,
};

pub fn people_desc() -> TupleDesc {
    TupleDesc::new(vec![
        FieldDef::new("name", FieldKind::String),
        FieldDef::new("age", FieldKind::Int),
    ])
}

pub fn person(name: &str, age: i64) -> Tuple {
    Tuple::new(
        people_desc(),
        vec![FieldValue::String(name.to_string()), FieldValue::Int(age)],
    )
}

pub fn t1() -> Tuple {
    person("josie", 20)
}

pub fn t2() -> Tuple {
    person("annie", 17)
}

pub fn heap_file(dir: &Path, pool: &Arc<BufferPool>, name: &str) -> Arc<HeapFile> {
    HeapFile::open(dir.join(format!("{name}.dat")), people_desc(), Arc::clone(pool)).unwrap()
}

pub fn column_file(dir: &Path, pool: &Arc<BufferPool>, name: &str) -> Arc<ColumnFile> {
    ColumnFile::open(
        vec![
            dir.join(format!("{name}_name.dat")),
            dir.join(format!("{name}_age.dat")),
        ],
        people_desc(),
        Arc::clone(pool),
    )
    .unwrap()
}

pub fn insert_all(file: &Arc<dyn DbFile>, tuples: &[Tuple], tid: TransactionId) {
    for t in tuples {
        Arc::clone(file).insert_tuple(t, tid).unwrap();
    }
}

pub fn drain(mut iter: Box<dyn TupleIterator>) -> Vec<Tuple> {
    let mut out = Vec::new();
    while let Some(t) = iter.next().unwrap() {
        out.push(t);
    }
    out
}

pub fn scan(file: &Arc<dyn DbFile>, tid: TransactionId) -> Vec<Tuple> {
    drain(Arc::clone(file).iter(tid).unwrap())
}

/// A leaf operator over fixed in-memory tuples, for driving Insert and
/// Delete in tests.
pub struct Values {
    desc: TupleDesc,
    rows: Vec<Tuple>,
}

impl Values {
    pub fn new(desc: TupleDesc, rows: Vec<Tuple>) -> Self {
        Self { desc, rows }
    }

    pub fn people(rows: &[Tuple]) -> Self {
        Self::new(people_desc(), rows.to_vec())
    }
}

impl Operator for Values {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn iterator(&self, _tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(ValuesIter(self.rows.clone().into_iter())))
    }
}

struct ValuesIter(std::vec::IntoIter<Tuple>);

impl TupleIterator for ValuesIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        Ok(self.0.next())
    }
}

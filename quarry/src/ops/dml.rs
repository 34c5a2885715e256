use std::sync::Arc;

use strata::{
    DbFile, FieldDef, FieldKind, FieldValue, Result, TransactionId, Tuple, TupleDesc,
    TupleIterator,
};

use super::Operator;

fn count_desc() -> TupleDesc {
    TupleDesc::new(vec![FieldDef::new("count", FieldKind::Int)])
}

fn count_tuple(desc: &TupleDesc, count: i64) -> Tuple {
    Tuple::new(desc.clone(), vec![FieldValue::Int(count)])
}

/// Drains the child into the target file and yields a single `{count}`
/// tuple with the number of tuples inserted.
pub struct InsertOp {
    file: Arc<dyn DbFile>,
    child: Box<dyn Operator>,
    desc: TupleDesc,
}

impl InsertOp {
    pub fn new(file: Arc<dyn DbFile>, child: Box<dyn Operator>) -> Self {
        Self {
            file,
            child,
            desc: count_desc(),
        }
    }
}

impl Operator for InsertOp {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(DmlIter {
            file: Arc::clone(&self.file),
            child: self.child.iterator(tid)?,
            desc: self.desc.clone(),
            tid,
            delete: false,
            done: false,
        }))
    }
}

/// Drains the child and deletes each tuple from the target file by its
/// record id, yielding a single `{count}` tuple.
pub struct DeleteOp {
    file: Arc<dyn DbFile>,
    child: Box<dyn Operator>,
    desc: TupleDesc,
}

impl DeleteOp {
    pub fn new(file: Arc<dyn DbFile>, child: Box<dyn Operator>) -> Self {
        Self {
            file,
            child,
            desc: count_desc(),
        }
    }
}

impl Operator for DeleteOp {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(DmlIter {
            file: Arc::clone(&self.file),
            child: self.child.iterator(tid)?,
            desc: self.desc.clone(),
            tid,
            delete: true,
            done: false,
        }))
    }
}

struct DmlIter {
    file: Arc<dyn DbFile>,
    child: Box<dyn TupleIterator>,
    desc: TupleDesc,
    tid: TransactionId,
    delete: bool,
    done: bool,
}

impl TupleIterator for DmlIter {
    fn next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        let mut count = 0;
        while let Some(tuple) = self.child.next()? {
            if self.delete {
                Arc::clone(&self.file).delete_tuple(&tuple, self.tid)?;
            } else {
                Arc::clone(&self.file).insert_tuple(&tuple, self.tid)?;
            }
            count += 1;
        }
        crate::quarry_debug_log!(
            "[DmlIter] {} {count} tuples in tx {}",
            if self.delete { "deleted" } else { "inserted" },
            self.tid
        );
        self.done = true;
        Ok(Some(count_tuple(&self.desc, count)))
    }
}

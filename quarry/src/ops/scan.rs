use std::sync::Arc;

use strata::{ColumnFile, DbFile, Result, TransactionId, TupleDesc, TupleIterator};

use super::Operator;

/// Leaf operator: a full scan of any file layout.
pub struct SeqScan {
    file: Arc<dyn DbFile>,
}

impl SeqScan {
    pub fn new(file: Arc<dyn DbFile>) -> Self {
        Self { file }
    }
}

impl Operator for SeqScan {
    fn descriptor(&self) -> &TupleDesc {
        self.file.descriptor()
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Arc::clone(&self.file).iter(tid)
    }
}

/// Leaf operator over the column-store fast path: reads only the selected
/// columns' pages. The descriptor is the projection of the selected fields.
pub struct ColumnScan {
    file: Arc<ColumnFile>,
    columns: Vec<usize>,
    desc: TupleDesc,
}

impl ColumnScan {
    pub fn new(file: Arc<ColumnFile>, columns: Vec<usize>) -> Result<Self> {
        let mut fields = Vec::with_capacity(columns.len());
        for &col in &columns {
            fields.extend(file.descriptor().single(col)?.fields);
        }
        Ok(Self {
            file,
            columns,
            desc: TupleDesc::new(fields),
        })
    }
}

impl Operator for ColumnScan {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        self.file.iter_columns(&self.columns, tid)
    }
}

//! The operator protocol. Every relational operator exposes its output
//! descriptor and, given a transaction, a pull-based tuple iterator. One
//! tuple per pull; `None` terminates; an error terminates the pull.

pub mod agg;
pub mod dml;
pub mod filter;
pub mod join;
pub mod limit;
pub mod order_by;
pub mod project;
pub mod scan;

use strata::{Result, TransactionId, TupleDesc, TupleIterator};

pub trait Operator: Send + Sync {
    fn descriptor(&self) -> &TupleDesc;

    /// Open the operator for one transaction. Blocking operators (order-by,
    /// join, aggregate) materialize their input here or on the first pull.
    fn iterator(&self, tid: TransactionId) -> Result<Box<dyn TupleIterator>>;
}

pub use agg::{Aggregate, AggState, AvgAgg, CountAgg, MaxAgg, MinAgg, SumAgg};
pub use dml::{DeleteOp, InsertOp};
pub use filter::Filter;
pub use join::Join;
pub use limit::Limit;
pub use order_by::OrderBy;
pub use project::Project;
pub use scan::{ColumnScan, SeqScan};

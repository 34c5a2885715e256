use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer_pool::{BufferPool, TransactionId};
use crate::error::Result;
use crate::page::DbPage;
use crate::tuple::{RecordId, Tuple, TupleDesc};

/// Shared handle to a cached page. The buffer pool owns the cache entry;
/// whoever holds the page's transactional lock may read or write through it.
pub type PageRef = Arc<RwLock<Box<dyn DbPage>>>;

/// Cache key for a page: the backing file it lives in plus its page number.
/// Distinguishes pages across files and, for column files, across columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub path: PathBuf,
    pub page_no: usize,
}

/// The pull protocol shared by file scans and query operators: one tuple per
/// call, `None` when exhausted, an error terminates the sequence.
pub trait TupleIterator: Send {
    fn next(&mut self) -> Result<Option<Tuple>>;
}

/// The contract every physical file layout satisfies. Methods that must hand
/// the file to the buffer pool take an `Arc` receiver.
pub trait DbFile: Send + Sync {
    fn descriptor(&self) -> &TupleDesc;

    fn buffer_pool(&self) -> &Arc<BufferPool>;

    /// Number of logical pages currently in the file.
    fn num_pages(&self) -> usize;

    fn page_key(&self, page_no: usize) -> PageKey;

    /// Read one page from disk. Called by the buffer pool on a cache miss.
    fn read_page(&self, page_no: usize) -> Result<Box<dyn DbPage>>;

    /// Write one page back to its on-disk location and clear its dirty bit.
    fn flush_page(&self, page: &mut dyn DbPage) -> Result<()>;

    /// Store a tuple, returning the record id of its new location.
    fn insert_tuple(self: Arc<Self>, tuple: &Tuple, tid: TransactionId) -> Result<RecordId>;

    /// Remove the tuple identified by `tuple`'s record id. A tuple without a
    /// record id is an error.
    fn delete_tuple(self: Arc<Self>, tuple: &Tuple, tid: TransactionId) -> Result<()>;

    /// Scan every tuple in the file under read permission. Yielded tuples
    /// carry the file's descriptor and their record id.
    fn iter(self: Arc<Self>, tid: TransactionId) -> Result<Box<dyn TupleIterator>>;
}

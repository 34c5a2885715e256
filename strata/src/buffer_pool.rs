//! The buffer pool: a fixed-capacity page cache that doubles as the engine's
//! only synchronization point. It hands out pages under page-level
//! transactional locks, detects deadlocks through a wait-for graph, and
//! enforces the FORCE / NO-STEAL durability discipline: dirty pages are
//! flushed at commit and never before.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::file::{DbFile, PageKey, PageRef};
use crate::page::DbPage;

/// How long a blocked `get_page` sleeps between conflict re-checks.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// A transaction identifier, vended from a process-wide counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TransactionId(NEXT.fetch_add(1, Ordering::SeqCst))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Page lock modes. Shared locks are compatible with each other; an
/// exclusive lock is compatible with nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

struct Frame {
    page: PageRef,
    file: Arc<dyn DbFile>,
}

#[derive(Default)]
struct TxnLocks {
    reads: HashSet<PageKey>,
    writes: HashSet<PageKey>,
}

#[derive(Default)]
struct PoolState {
    pages: HashMap<PageKey, Frame>,
    txns: HashMap<TransactionId, TxnLocks>,
    /// Edge `t -> t'` means t is blocked on a lock t' holds.
    waits_for: HashMap<TransactionId, HashSet<TransactionId>>,
}

impl PoolState {
    /// Recompute `tid`'s wait-for edges against the current holders of
    /// conflicting locks on `key`. The set is rebuilt every round so edges
    /// from earlier rounds cannot linger and fabricate cycles.
    fn record_conflicts(&mut self, tid: TransactionId, key: &PageKey, mode: LockMode) -> bool {
        let mut holders = HashSet::new();
        for (&other, locks) in &self.txns {
            if other == tid {
                continue;
            }
            let conflicts = match mode {
                LockMode::Shared => locks.writes.contains(key),
                LockMode::Exclusive => {
                    locks.writes.contains(key) || locks.reads.contains(key)
                }
            };
            if conflicts {
                holders.insert(other);
            }
        }
        let conflicted = !holders.is_empty();
        self.waits_for.insert(tid, holders);
        conflicted
    }

    /// True if the wait-for graph contains a cycle through `start`, i.e.
    /// `start` is reachable from one of its own successors.
    fn cycle_involving(&self, start: TransactionId) -> bool {
        let mut stack: Vec<TransactionId> = self
            .waits_for
            .get(&start)
            .into_iter()
            .flatten()
            .copied()
            .collect();
        let mut visited = HashSet::new();
        while let Some(t) = stack.pop() {
            if t == start {
                return true;
            }
            if visited.insert(t) {
                stack.extend(self.waits_for.get(&t).into_iter().flatten().copied());
            }
        }
        false
    }

    fn prune_waits_for(&mut self, tid: TransactionId) {
        self.waits_for.remove(&tid);
        for edges in self.waits_for.values_mut() {
            edges.remove(&tid);
        }
    }

    /// Drop `tid`'s locks, discarding any page it dirtied (NO-STEAL keeps
    /// the on-disk copy pristine, so dropping the cache entry is the whole
    /// rollback).
    fn abort_txn(&mut self, tid: TransactionId) {
        if let Some(locks) = self.txns.remove(&tid) {
            for key in &locks.writes {
                let dirty = self
                    .pages
                    .get(key)
                    .is_some_and(|frame| frame.page.read().is_dirty());
                if dirty {
                    self.pages.remove(key);
                }
            }
        }
        self.prune_waits_for(tid);
    }

    /// Evict one page that is neither dirty nor under any active lock.
    fn evict_one(&mut self) -> Result<()> {
        let locked: HashSet<&PageKey> = self
            .txns
            .values()
            .flat_map(|locks| locks.reads.iter().chain(locks.writes.iter()))
            .collect();
        let victim = self
            .pages
            .iter()
            .find(|(key, frame)| !locked.contains(*key) && !frame.page.read().is_dirty())
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                crate::strata_debug_log!("[BufferPool] evicting page {key:?}");
                self.pages.remove(&key);
                Ok(())
            }
            None => Err(Error::BufferPoolFull),
        }
    }
}

/// The process-wide page cache and lock table.
pub struct BufferPool {
    capacity: usize,
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// A pool that caches at most `capacity` pages.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: Mutex::new(PoolState::default()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Register a new transaction. Beginning a transaction twice is an error.
    pub fn begin(&self, tid: TransactionId) -> Result<()> {
        let mut st = self.state.lock();
        if st.txns.contains_key(&tid) {
            return Err(Error::InvalidTransaction(tid));
        }
        st.txns.insert(tid, TxnLocks::default());
        crate::strata_debug_log!("[BufferPool::begin] tx {tid} active");
        Ok(())
    }

    pub fn is_active(&self, tid: TransactionId) -> bool {
        self.state.lock().txns.contains_key(&tid)
    }

    /// Number of pages currently cached. Testing aid.
    pub fn cached_pages(&self) -> usize {
        self.state.lock().pages.len()
    }

    /// Commit: write every page the transaction dirtied through to its file
    /// (FORCE), then release all locks.
    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        let mut st = self.state.lock();
        if !st.txns.contains_key(&tid) {
            return Err(Error::InvalidTransaction(tid));
        }
        let write_keys: Vec<PageKey> = st
            .txns
            .get(&tid)
            .map(|locks| locks.writes.iter().cloned().collect())
            .unwrap_or_default();
        for key in write_keys {
            if let Some(frame) = st.pages.get(&key) {
                let mut page = frame.page.write();
                if page.is_dirty() {
                    frame.file.flush_page(&mut **page)?;
                }
            }
        }
        st.txns.remove(&tid);
        st.prune_waits_for(tid);
        crate::strata_debug_log!("[BufferPool::commit] tx {tid} committed");
        Ok(())
    }

    /// Abort: discard the transaction's dirty pages from the cache and
    /// release its locks. Aborting a transaction that is no longer active
    /// (e.g. one already aborted as a deadlock victim) is a no-op.
    pub fn abort(&self, tid: TransactionId) {
        let mut st = self.state.lock();
        st.abort_txn(tid);
        crate::strata_debug_log!("[BufferPool::abort] tx {tid} rolled back");
    }

    /// Fetch a page on behalf of `tid` under the requested lock mode. Blocks
    /// (polling) while another transaction holds a conflicting lock; if the
    /// wait would close a cycle in the wait-for graph, `tid` is aborted and
    /// the call fails with `Deadlock`. On a cache miss the page is read from
    /// its file, evicting a clean unlocked page if the cache is full.
    pub fn get_page(
        &self,
        file: &Arc<dyn DbFile>,
        page_no: usize,
        tid: TransactionId,
        mode: LockMode,
    ) -> Result<PageRef> {
        let key = file.page_key(page_no);
        loop {
            let mut st = self.state.lock();
            if !st.txns.contains_key(&tid) {
                return Err(Error::InvalidTransaction(tid));
            }

            if st.record_conflicts(tid, &key, mode) {
                if st.cycle_involving(tid) {
                    crate::strata_debug_log!(
                        "[BufferPool::get_page] deadlock on {key:?}, aborting tx {tid}"
                    );
                    st.abort_txn(tid);
                    return Err(Error::Deadlock(tid));
                }
                drop(st);
                thread::sleep(LOCK_RETRY_INTERVAL);
                continue;
            }

            // No conflicts remain: take the lock and resolve the page.
            st.waits_for.remove(&tid);
            match st.txns.get_mut(&tid) {
                Some(locks) => match mode {
                    LockMode::Shared => {
                        locks.reads.insert(key.clone());
                    }
                    LockMode::Exclusive => {
                        locks.writes.insert(key.clone());
                    }
                },
                None => return Err(Error::InvalidTransaction(tid)),
            }

            if let Some(frame) = st.pages.get(&key) {
                return Ok(frame.page.clone());
            }
            if st.pages.len() >= self.capacity {
                st.evict_one()?;
            }
            let page = file.read_page(page_no)?;
            let page_ref: PageRef = Arc::new(RwLock::new(page));
            st.pages.insert(
                key,
                Frame {
                    page: page_ref.clone(),
                    file: Arc::clone(file),
                },
            );
            return Ok(page_ref);
        }
    }

    /// Slot a freshly flushed (clean) page into the cache if capacity
    /// permits. Used by the file-growth paths; takes no locks on the page.
    pub(crate) fn pin_clean_page(&self, file: &Arc<dyn DbFile>, page: Box<dyn DbPage>) {
        let mut st = self.state.lock();
        let key = file.page_key(page.page_no());
        if st.pages.len() < self.capacity && !st.pages.contains_key(&key) {
            st.pages.insert(
                key,
                Frame {
                    page: Arc::new(RwLock::new(page)),
                    file: Arc::clone(file),
                },
            );
        }
    }

    /// Flush every dirty cached page and clear its dirty bit. Testing aid;
    /// not transaction-safe.
    pub fn flush_all_pages(&self) -> Result<()> {
        let st = self.state.lock();
        for frame in st.pages.values() {
            let mut page = frame.page.write();
            if page.is_dirty() {
                frame.file.flush_page(&mut **page)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap_file::HeapFile;
    use crate::tuple::{FieldDef, FieldKind, FieldValue, Tuple, TupleDesc};
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn people_desc() -> TupleDesc {
        TupleDesc::new(vec![
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("age", FieldKind::Int),
        ])
    }

    fn person(name: &str, age: i64) -> Tuple {
        Tuple::new(
            people_desc(),
            vec![FieldValue::String(name.to_string()), FieldValue::Int(age)],
        )
    }

    /// A heap file with `pages` full pages on disk and nothing cached in
    /// `pool`. The data is written through a scratch pool so the test pool
    /// can be arbitrarily small.
    fn file_with_pages(
        dir: &std::path::Path,
        pool: &Arc<BufferPool>,
        pages: usize,
    ) -> Arc<dyn DbFile> {
        let path = dir.join("t.dat");
        let per_page = (crate::PAGE_SIZE - 8) / people_desc().bytes_per_tuple();
        {
            let build_pool = BufferPool::new(64);
            let file: Arc<dyn DbFile> =
                HeapFile::open(&path, people_desc(), Arc::clone(&build_pool)).unwrap();
            let tid = TransactionId::fresh();
            build_pool.begin(tid).unwrap();
            for i in 0..(pages * per_page) {
                Arc::clone(&file)
                    .insert_tuple(&person("p", i as i64), tid)
                    .unwrap();
            }
            build_pool.commit(tid).unwrap();
        }
        let file: Arc<dyn DbFile> =
            HeapFile::open(&path, people_desc(), Arc::clone(pool)).unwrap();
        assert_eq!(file.num_pages(), pages);
        file
    }

    #[test]
    fn begin_twice_fails() {
        let pool = BufferPool::new(10);
        let tid = TransactionId::fresh();
        pool.begin(tid).unwrap();
        assert!(matches!(
            pool.begin(tid),
            Err(Error::InvalidTransaction(_))
        ));
    }

    #[test]
    fn get_page_requires_active_transaction() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        let file = file_with_pages(dir.path(), &pool, 1);
        let ghost = TransactionId::fresh();
        assert!(matches!(
            pool.get_page(&file, 0, ghost, LockMode::Shared),
            Err(Error::InvalidTransaction(_))
        ));
    }

    #[test]
    fn readers_share_a_page() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        let file = file_with_pages(dir.path(), &pool, 1);

        let t1 = TransactionId::fresh();
        let t2 = TransactionId::fresh();
        pool.begin(t1).unwrap();
        pool.begin(t2).unwrap();
        pool.get_page(&file, 0, t1, LockMode::Shared).unwrap();
        pool.get_page(&file, 0, t2, LockMode::Shared).unwrap();
        pool.commit(t1).unwrap();
        pool.commit(t2).unwrap();
    }

    #[test]
    fn writer_blocks_until_holder_commits() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        let file = file_with_pages(dir.path(), &pool, 1);

        let holder = TransactionId::fresh();
        pool.begin(holder).unwrap();
        pool.get_page(&file, 0, holder, LockMode::Exclusive).unwrap();

        let (tx, rx) = mpsc::channel();
        let pool2 = Arc::clone(&pool);
        let file2 = Arc::clone(&file);
        let waiter = std::thread::spawn(move || {
            let tid = TransactionId::fresh();
            pool2.begin(tid).unwrap();
            let page = pool2.get_page(&file2, 0, tid, LockMode::Exclusive);
            tx.send(()).unwrap();
            page.map(|_| ()).and_then(|_| pool2.commit(tid))
        });

        // The waiter should still be polling while the lock is held.
        assert!(rx
            .recv_timeout(Duration::from_millis(100))
            .is_err());
        pool.commit(holder).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn deadlock_aborts_exactly_one_victim() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        let file = file_with_pages(dir.path(), &pool, 2);

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let run = |first: usize, second: usize| {
            let pool = Arc::clone(&pool);
            let file = Arc::clone(&file);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                let tid = TransactionId::fresh();
                pool.begin(tid).unwrap();
                pool.get_page(&file, first, tid, LockMode::Exclusive)
                    .unwrap();
                // Both transactions hold their first page before either
                // requests its second.
                barrier.wait();
                match pool.get_page(&file, second, tid, LockMode::Exclusive) {
                    Ok(_) => {
                        pool.commit(tid).unwrap();
                        (tid, false)
                    }
                    Err(Error::Deadlock(victim)) => {
                        assert_eq!(victim, tid);
                        assert!(!pool.is_active(tid));
                        (tid, true)
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                }
            })
        };

        let a = run(0, 1);
        let b = run(1, 0);
        let (tid_a, aborted_a) = a.join().unwrap();
        let (tid_b, aborted_b) = b.join().unwrap();

        assert!(
            aborted_a ^ aborted_b,
            "exactly one of the two transactions must be the victim"
        );
        assert!(!pool.is_active(tid_a));
        assert!(!pool.is_active(tid_b));

        // Neither page is left locked: a fresh transaction can write both.
        let tid = TransactionId::fresh();
        pool.begin(tid).unwrap();
        pool.get_page(&file, 0, tid, LockMode::Exclusive).unwrap();
        pool.get_page(&file, 1, tid, LockMode::Exclusive).unwrap();
        pool.commit(tid).unwrap();
    }

    #[test]
    fn dirty_pages_are_never_evicted() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(1);
        let file = file_with_pages(dir.path(), &pool, 2);

        let tid = TransactionId::fresh();
        pool.begin(tid).unwrap();
        let page = pool.get_page(&file, 0, tid, LockMode::Exclusive).unwrap();
        page.write().set_dirty(true);

        // The only frame is dirty (and locked): the pool must refuse.
        assert!(matches!(
            pool.get_page(&file, 1, tid, LockMode::Exclusive),
            Err(Error::BufferPoolFull)
        ));
        pool.abort(tid);

        // After the abort the dirty page is gone and page 1 fits.
        let tid = TransactionId::fresh();
        pool.begin(tid).unwrap();
        pool.get_page(&file, 1, tid, LockMode::Shared).unwrap();
        pool.commit(tid).unwrap();
    }

    #[test]
    fn clean_pages_are_evicted_when_full() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(1);
        let file = file_with_pages(dir.path(), &pool, 3);

        // Reading page after page keeps working because each commit leaves
        // the previous page clean and evictable.
        for page_no in 0..3 {
            let tid = TransactionId::fresh();
            pool.begin(tid).unwrap();
            pool.get_page(&file, page_no, tid, LockMode::Shared).unwrap();
            pool.commit(tid).unwrap();
        }
        assert_eq!(pool.cached_pages(), 1);
    }

    #[test]
    fn flush_all_pages_clears_dirty_bits() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(10);
        let file = file_with_pages(dir.path(), &pool, 1);

        let tid = TransactionId::fresh();
        pool.begin(tid).unwrap();
        let page = pool.get_page(&file, 0, tid, LockMode::Exclusive).unwrap();
        page.write().set_dirty(true);
        pool.flush_all_pages().unwrap();
        assert!(!page.read().is_dirty());
        pool.commit(tid).unwrap();
    }
}

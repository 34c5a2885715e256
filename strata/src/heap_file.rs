use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, LockMode, TransactionId};
use crate::error::{Error, Result};
use crate::file::{DbFile, PageKey, TupleIterator};
use crate::page::{DbPage, RowPage};
use crate::tuple::{RecordId, Tuple, TupleDesc};
use crate::PAGE_SIZE;

struct HeapFileState {
    num_pages: usize,
    /// One entry per page: true if the page *may* have a free slot. A hint,
    /// not authoritative; cleared when a page is observed full.
    available: Vec<bool>,
}

/// An unordered collection of tuples stored as row pages in one backing
/// file. All page access goes through the buffer pool so that page-level
/// locking applies.
pub struct HeapFile {
    path: PathBuf,
    desc: TupleDesc,
    pool: Arc<BufferPool>,
    state: Mutex<HeapFileState>,
}

fn open_backing_file(path: &Path) -> Result<std::fs::File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Fill `buf` from the current position, zero-padding past end of file.
fn read_page_bytes(file: &mut std::fs::File, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf[filled..].fill(0);
    Ok(())
}

impl HeapFile {
    /// Open (or create empty) a heap file. A partial trailing page counts as
    /// a full final page.
    pub fn open(
        path: impl AsRef<Path>,
        desc: TupleDesc,
        pool: Arc<BufferPool>,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = open_backing_file(&path)?;
        let size = file.metadata()?.len() as usize;
        let num_pages = (size + PAGE_SIZE - 1) / PAGE_SIZE;
        crate::strata_debug_log!(
            "[HeapFile::open] {path:?}: {size} bytes, {num_pages} pages"
        );
        Ok(Arc::new(Self {
            path,
            desc,
            pool,
            state: Mutex::new(HeapFileState {
                num_pages,
                available: vec![true; num_pages],
            }),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn as_dyn(self: &Arc<Self>) -> Arc<dyn DbFile> {
        Arc::clone(self) as Arc<dyn DbFile>
    }

    fn write_page_bytes(&self, page_no: usize, bytes: &[u8]) -> Result<()> {
        let mut file = open_backing_file(&self.path)?;
        file.seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    /// All pages are full: build a fresh page holding the tuple, flush it to
    /// grow the file, and slot the now-clean page into the pool. Serialized
    /// on the file state lock.
    fn grow_with_tuple(self: &Arc<Self>, tuple: &Tuple) -> Result<RecordId> {
        let mut st = self.state.lock();
        let page_no = st.num_pages;
        crate::strata_debug_log!("[HeapFile] growing {:?} to page {page_no}", self.path);
        let mut page = RowPage::new(self.desc.clone(), page_no)?;
        let rid = page.insert(tuple)?;
        self.write_page_bytes(page_no, &page.serialize()?)?;
        page.set_dirty(false);
        self.pool.pin_clean_page(&self.as_dyn(), Box::new(page));
        st.available.push(true);
        st.num_pages += 1;
        Ok(rid)
    }
}

impl DbFile for HeapFile {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn num_pages(&self) -> usize {
        self.state.lock().num_pages
    }

    fn page_key(&self, page_no: usize) -> PageKey {
        PageKey {
            path: self.path.clone(),
            page_no,
        }
    }

    fn read_page(&self, page_no: usize) -> Result<Box<dyn DbPage>> {
        let mut file = open_backing_file(&self.path)?;
        file.seek(SeekFrom::Start((page_no * PAGE_SIZE) as u64))?;
        let mut data = vec![0u8; PAGE_SIZE];
        read_page_bytes(&mut file, &mut data)?;
        Ok(Box::new(RowPage::deserialize(
            self.desc.clone(),
            page_no,
            &data,
        )?))
    }

    fn flush_page(&self, page: &mut dyn DbPage) -> Result<()> {
        let bytes = page.serialize()?;
        self.write_page_bytes(page.page_no(), &bytes)?;
        page.set_dirty(false);
        Ok(())
    }

    fn insert_tuple(self: Arc<Self>, tuple: &Tuple, tid: TransactionId) -> Result<RecordId> {
        if tuple.values.len() != self.desc.len() {
            return Err(Error::Malformed(format!(
                "tuple has {} values for a {}-field file",
                tuple.values.len(),
                self.desc.len()
            )));
        }

        let candidates: Vec<usize> = {
            let st = self.state.lock();
            st.available
                .iter()
                .enumerate()
                .filter(|&(_, &open)| open)
                .map(|(page_no, _)| page_no)
                .collect()
        };

        for page_no in candidates {
            let page_ref = self
                .pool
                .get_page(&self.as_dyn(), page_no, tid, LockMode::Exclusive)?;
            let mut guard = page_ref.write();
            let page = guard
                .as_any_mut()
                .downcast_mut::<RowPage>()
                .ok_or_else(|| Error::Malformed("cached page is not a row page".to_string()))?;
            if page.num_used_slots() < page.num_slots() {
                return page.insert(tuple);
            }
            drop(guard);
            // The hint was stale: remember the page is full.
            let mut st = self.state.lock();
            if let Some(open) = st.available.get_mut(page_no) {
                *open = false;
            }
        }

        self.grow_with_tuple(tuple)
    }

    fn delete_tuple(self: Arc<Self>, tuple: &Tuple, tid: TransactionId) -> Result<()> {
        let rid = tuple
            .rid
            .ok_or_else(|| Error::NotFound("tuple carries no record id".to_string()))?;
        let RecordId::Row { page_no, .. } = rid else {
            return Err(Error::Malformed(format!(
                "{rid:?} is not a heap record id"
            )));
        };
        let page_ref = self
            .pool
            .get_page(&self.as_dyn(), page_no, tid, LockMode::Exclusive)?;
        let mut guard = page_ref.write();
        let page = guard
            .as_any_mut()
            .downcast_mut::<RowPage>()
            .ok_or_else(|| Error::Malformed("cached page is not a row page".to_string()))?;
        page.delete(rid)?;
        drop(guard);

        let mut st = self.state.lock();
        if let Some(open) = st.available.get_mut(page_no) {
            *open = true;
        }
        Ok(())
    }

    fn iter(self: Arc<Self>, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        Ok(Box::new(HeapScan {
            file: self,
            tid,
            next_page: 0,
            current: VecDeque::new(),
        }))
    }
}

/// Pull-based scan over every page of a heap file, read-locking each page as
/// it is reached.
struct HeapScan {
    file: Arc<HeapFile>,
    tid: TransactionId,
    next_page: usize,
    current: VecDeque<Tuple>,
}

impl TupleIterator for HeapScan {
    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(tuple) = self.current.pop_front() {
                return Ok(Some(tuple));
            }
            if self.next_page >= self.file.num_pages() {
                return Ok(None);
            }
            let page_ref = self.file.pool.get_page(
                &self.file.as_dyn(),
                self.next_page,
                self.tid,
                LockMode::Shared,
            )?;
            let guard = page_ref.read();
            let page = guard
                .as_any()
                .downcast_ref::<RowPage>()
                .ok_or_else(|| Error::Malformed("cached page is not a row page".to_string()))?;
            self.current = page
                .iter()
                .map(|t| {
                    let mut t = t.clone();
                    t.desc = self.file.desc.clone();
                    t
                })
                .collect();
            self.next_page += 1;
        }
    }
}

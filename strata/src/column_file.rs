use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer_pool::{BufferPool, LockMode, TransactionId};
use crate::column_page::ColumnPage;
use crate::error::{Error, Result};
use crate::file::{DbFile, PageKey, TupleIterator};
use crate::page::{DbPage, PAGE_HEADER_SIZE};
use crate::tuple::{RecordId, Tuple, TupleDesc};
use crate::PAGE_SIZE;

struct ColumnFileState {
    pages_per_column: usize,
}

/// A column-oriented table: one backing file per attribute. Logical page
/// number `p` maps to column `p % num_columns`, page `p / num_columns`
/// within that column's file. Tuples occupy the same slot across all peer
/// column pages of a strip; every operation that touches one column of a
/// tuple touches its peers in the same transaction.
pub struct ColumnFile {
    paths: Vec<PathBuf>,
    desc: TupleDesc,
    pool: Arc<BufferPool>,
    /// Rows that fit in one strip: the minimum slot count over all peer
    /// columns, so no column can run out of slots before the others.
    strip_capacity: usize,
    state: Mutex<ColumnFileState>,
}

impl std::fmt::Debug for ColumnFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnFile")
            .field("paths", &self.paths)
            .field("desc", &self.desc)
            .field("strip_capacity", &self.strip_capacity)
            .finish()
    }
}

fn open_backing_file(path: &Path) -> Result<std::fs::File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

impl ColumnFile {
    /// Open (or create) a column file with one backing path per attribute.
    /// The page count per column is trusted from the first backing file.
    pub fn open(
        paths: Vec<PathBuf>,
        desc: TupleDesc,
        pool: Arc<BufferPool>,
    ) -> Result<Arc<Self>> {
        if paths.len() != desc.len() || paths.is_empty() {
            return Err(Error::Malformed(format!(
                "{} backing files for {} columns",
                paths.len(),
                desc.len()
            )));
        }
        let mut pages_per_column = 0;
        for (i, path) in paths.iter().enumerate() {
            let file = open_backing_file(path)?;
            if i == 0 {
                let size = file.metadata()?.len() as usize;
                pages_per_column = (size + PAGE_SIZE - 1) / PAGE_SIZE;
            }
        }
        let strip_capacity = desc
            .fields
            .iter()
            .map(|f| (PAGE_SIZE - PAGE_HEADER_SIZE) / f.kind.size())
            .min()
            .unwrap_or(0);
        crate::strata_debug_log!(
            "[ColumnFile::open] {} columns, {pages_per_column} pages each",
            paths.len()
        );
        Ok(Arc::new(Self {
            paths,
            desc,
            pool,
            strip_capacity,
            state: Mutex::new(ColumnFileState { pages_per_column }),
        }))
    }

    pub fn num_columns(&self) -> usize {
        self.paths.len()
    }

    pub fn pages_per_column(&self) -> usize {
        self.state.lock().pages_per_column
    }

    fn as_dyn(self: &Arc<Self>) -> Arc<dyn DbFile> {
        Arc::clone(self) as Arc<dyn DbFile>
    }

    fn write_page_bytes(&self, column: usize, page_in_column: usize, bytes: &[u8]) -> Result<()> {
        let mut file = open_backing_file(&self.paths[column])?;
        file.seek(SeekFrom::Start((page_in_column * PAGE_SIZE) as u64))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn locked_column_page<'a>(
        guard: &'a mut Box<dyn DbPage>,
    ) -> Result<&'a mut ColumnPage> {
        guard
            .as_any_mut()
            .downcast_mut::<ColumnPage>()
            .ok_or_else(|| Error::Malformed("cached page is not a column page".to_string()))
    }

    /// Try one strip: insert into the primary (column 0) page, then mirror
    /// the value into every peer at the same slot. Returns `None` when the
    /// strip is at capacity.
    fn try_insert_into_strip(
        self: &Arc<Self>,
        tuple: &Tuple,
        tid: TransactionId,
        strip: usize,
    ) -> Result<Option<RecordId>> {
        let base = strip * self.num_columns();
        let page_ref = self
            .pool
            .get_page(&self.as_dyn(), base, tid, LockMode::Exclusive)?;
        let mut guard = page_ref.write();
        let page = Self::locked_column_page(&mut guard)?;
        if page.num_used_slots() >= self.strip_capacity {
            return Ok(None);
        }
        let slot = page.insert(tuple)?;
        drop(guard);

        for col in 1..self.num_columns() {
            let peer_ref = self
                .pool
                .get_page(&self.as_dyn(), base + col, tid, LockMode::Exclusive)?;
            let mut peer_guard = peer_ref.write();
            let peer = Self::locked_column_page(&mut peer_guard)?;
            let peer_slot = peer.insert(tuple)?;
            if peer_slot != slot {
                return Err(Error::Malformed(format!(
                    "column pages out of step: slot {peer_slot} in column {col}, expected {slot}"
                )));
            }
        }
        Ok(Some(RecordId::Column {
            base_page: base,
            slot,
        }))
    }

    /// Every strip is full: grow all columns by exactly one page. The empty
    /// pages are written to disk first so the backing files never disagree
    /// on length, then the tuple is inserted through the pool under write
    /// locks. Serialized on the file state lock; `pages_per_column` is
    /// incremented only once the strip is complete.
    fn grow_and_insert(self: &Arc<Self>, tuple: &Tuple, tid: TransactionId) -> Result<RecordId> {
        let mut st = self.state.lock();
        let strip = st.pages_per_column;
        let ncols = self.num_columns();
        let base = strip * ncols;
        crate::strata_debug_log!("[ColumnFile] growing to strip {strip}");

        for col in 0..ncols {
            let mut page = ColumnPage::new(&self.desc, col, base + col)?;
            self.write_page_bytes(col, strip, &page.serialize()?)?;
            page.set_dirty(false);
        }

        let mut first_slot = None;
        for col in 0..ncols {
            let page_ref =
                self.pool
                    .get_page(&self.as_dyn(), base + col, tid, LockMode::Exclusive)?;
            let mut guard = page_ref.write();
            let page = Self::locked_column_page(&mut guard)?;
            let slot = page.insert(tuple)?;
            match first_slot {
                None => first_slot = Some(slot),
                Some(expected) if expected != slot => {
                    return Err(Error::Malformed(format!(
                        "column pages out of step: slot {slot} in column {col}, expected {expected}"
                    )));
                }
                Some(_) => {}
            }
        }
        st.pages_per_column += 1;

        let slot = first_slot.ok_or_else(|| {
            Error::Malformed("column file has no columns".to_string())
        })?;
        Ok(RecordId::Column {
            base_page: base,
            slot,
        })
    }

    /// The column-store fast path: scan only the selected columns,
    /// assembling row tuples strip by strip. The output descriptor is the
    /// projection of the selected fields in the order given.
    pub fn iter_columns(
        self: &Arc<Self>,
        columns: &[usize],
        tid: TransactionId,
    ) -> Result<Box<dyn TupleIterator>> {
        if columns.is_empty() {
            return Err(Error::Malformed("no columns selected".to_string()));
        }
        let mut fields = Vec::with_capacity(columns.len());
        for &col in columns {
            let single = self.desc.single(col)?;
            fields.extend(single.fields);
        }
        Ok(Box::new(ColumnFileScan {
            file: Arc::clone(self),
            tid,
            columns: columns.to_vec(),
            desc: TupleDesc::new(fields),
            strip: 0,
            current: VecDeque::new(),
        }))
    }
}

impl DbFile for ColumnFile {
    fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn num_pages(&self) -> usize {
        self.state.lock().pages_per_column * self.num_columns()
    }

    fn page_key(&self, page_no: usize) -> PageKey {
        PageKey {
            path: self.paths[page_no % self.num_columns()].clone(),
            page_no,
        }
    }

    fn read_page(&self, page_no: usize) -> Result<Box<dyn DbPage>> {
        let column = page_no % self.num_columns();
        let mut file = open_backing_file(&self.paths[column])?;
        file.seek(SeekFrom::Start(
            ((page_no / self.num_columns()) * PAGE_SIZE) as u64,
        ))?;
        let mut data = vec![0u8; PAGE_SIZE];
        let mut filled = 0;
        while filled < data.len() {
            let n = file.read(&mut data[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data[filled..].fill(0);
        Ok(Box::new(ColumnPage::deserialize(
            &self.desc, column, page_no, &data,
        )?))
    }

    fn flush_page(&self, page: &mut dyn DbPage) -> Result<()> {
        let bytes = page.serialize()?;
        let column = page.page_no() % self.num_columns();
        let page_in_column = page.page_no() / self.num_columns();
        self.write_page_bytes(column, page_in_column, &bytes)?;
        page.set_dirty(false);
        Ok(())
    }

    fn insert_tuple(self: Arc<Self>, tuple: &Tuple, tid: TransactionId) -> Result<RecordId> {
        if tuple.values.len() != self.desc.len() {
            return Err(Error::Malformed(format!(
                "tuple has {} values for a {}-column file",
                tuple.values.len(),
                self.desc.len()
            )));
        }
        let strips = self.state.lock().pages_per_column;
        for strip in 0..strips {
            if let Some(rid) = self.try_insert_into_strip(tuple, tid, strip)? {
                return Ok(rid);
            }
        }
        self.grow_and_insert(tuple, tid)
    }

    fn delete_tuple(self: Arc<Self>, tuple: &Tuple, tid: TransactionId) -> Result<()> {
        let rid = tuple
            .rid
            .ok_or_else(|| Error::NotFound("tuple carries no record id".to_string()))?;
        let RecordId::Column { base_page, slot } = rid else {
            return Err(Error::Malformed(format!(
                "{rid:?} is not a column record id"
            )));
        };
        if base_page % self.num_columns() != 0 {
            return Err(Error::Malformed(format!(
                "base page {base_page} is not a primary column page"
            )));
        }
        for col in 0..self.num_columns() {
            let page_ref =
                self.pool
                    .get_page(&self.as_dyn(), base_page + col, tid, LockMode::Exclusive)?;
            let mut guard = page_ref.write();
            let page = Self::locked_column_page(&mut guard)?;
            page.delete(slot)?;
        }
        Ok(())
    }

    fn iter(self: Arc<Self>, tid: TransactionId) -> Result<Box<dyn TupleIterator>> {
        let columns: Vec<usize> = (0..self.num_columns()).collect();
        self.iter_columns(&columns, tid)
    }
}

/// Strip-by-strip scan of the selected columns, pulling the peer pages in
/// lockstep and re-assembling row tuples. Verifies the co-slot invariant as
/// it goes.
struct ColumnFileScan {
    file: Arc<ColumnFile>,
    tid: TransactionId,
    columns: Vec<usize>,
    desc: TupleDesc,
    strip: usize,
    current: VecDeque<Tuple>,
}

impl TupleIterator for ColumnFileScan {
    fn next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if let Some(tuple) = self.current.pop_front() {
                return Ok(Some(tuple));
            }
            if self.strip >= self.file.pages_per_column() {
                return Ok(None);
            }
            let ncols = self.file.num_columns();
            let base = self.strip * ncols;

            let mut per_column: Vec<Vec<(usize, Tuple)>> = Vec::with_capacity(self.columns.len());
            for &col in &self.columns {
                let page_ref = self.file.pool.get_page(
                    &self.file.as_dyn(),
                    base + col,
                    self.tid,
                    LockMode::Shared,
                )?;
                let guard = page_ref.read();
                let page = guard
                    .as_any()
                    .downcast_ref::<ColumnPage>()
                    .ok_or_else(|| {
                        Error::Malformed("cached page is not a column page".to_string())
                    })?;
                per_column.push(page.iter().map(|(slot, t)| (slot, t.clone())).collect());
            }

            let occupied: Vec<usize> = per_column[0].iter().map(|(slot, _)| *slot).collect();
            let mut rows = VecDeque::with_capacity(occupied.len());
            for (row, &slot) in occupied.iter().enumerate() {
                let mut values = Vec::with_capacity(self.columns.len());
                for column_values in &per_column {
                    let (peer_slot, tuple) = column_values.get(row).ok_or_else(|| {
                        Error::Malformed("column pages out of step".to_string())
                    })?;
                    if *peer_slot != slot {
                        return Err(Error::Malformed(
                            "column pages out of step".to_string(),
                        ));
                    }
                    values.push(tuple.values[0].clone());
                }
                let mut tuple = Tuple::new(self.desc.clone(), values);
                tuple.rid = Some(RecordId::Column {
                    base_page: base,
                    slot,
                });
                rows.push_back(tuple);
            }
            self.current = rows;
            self.strip += 1;
        }
    }
}

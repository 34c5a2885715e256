use std::any::Any;

use crate::error::{Error, Result};
use crate::page::{DbPage, PAGE_HEADER_SIZE};
use crate::tuple::{Tuple, TupleDesc};
use crate::PAGE_SIZE;

/// A page holding the values of a single attribute. Slots are aligned with
/// the peer pages of the other columns in the same strip: the value at slot
/// `s` here belongs to the same logical tuple as slot `s` everywhere else.
pub struct ColumnPage {
    /// Logical page number within the column file's combined numbering.
    page_no: usize,
    /// Which attribute of the file descriptor this page stores.
    column: usize,
    desc: TupleDesc,
    num_slots: usize,
    num_used: usize,
    slots: Vec<Option<Tuple>>,
    dirty: bool,
}

impl ColumnPage {
    /// An empty page for column `column` of `file_desc`. The slot count
    /// depends on that attribute's width alone.
    pub fn new(file_desc: &TupleDesc, column: usize, page_no: usize) -> Result<Self> {
        let desc = file_desc.single(column)?;
        let field_size = desc.fields[0].kind.size();
        let num_slots = (PAGE_SIZE - PAGE_HEADER_SIZE) / field_size;
        Ok(Self {
            page_no,
            column,
            desc,
            num_slots,
            num_used: 0,
            slots: vec![None; num_slots],
            dirty: false,
        })
    }

    pub fn column(&self) -> usize {
        self.column
    }

    /// The one-field projection this page stores.
    pub fn descriptor(&self) -> &TupleDesc {
        &self.desc
    }

    /// Project the tuple down to this page's column and store it in the
    /// first free slot, returning the slot index. The caller combines the
    /// slot with the strip's base page number into a tuple-level record id.
    pub fn insert(&mut self, tuple: &Tuple) -> Result<usize> {
        if self.num_used >= self.num_slots {
            return Err(Error::PageFull);
        }
        let projected = tuple.project(&self.desc.fields)?;
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::PageFull)?;
        self.slots[slot] = Some(projected);
        self.num_used += 1;
        self.dirty = true;
        Ok(slot)
    }

    /// Clear one slot. Out of range or already empty is `NotFound`.
    pub fn delete(&mut self, slot: usize) -> Result<()> {
        if slot >= self.num_slots || self.slots[slot].is_none() {
            return Err(Error::NotFound(format!(
                "no value in slot {slot} of column page {}",
                self.page_no
            )));
        }
        self.slots[slot] = None;
        self.num_used -= 1;
        self.dirty = true;
        Ok(())
    }

    /// Occupied slots in slot order, paired with their slot index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Tuple)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, t)| t.as_ref().map(|t| (slot, t)))
    }

    /// Rebuild from the on-disk form. Used values land in slots `[0, used)`;
    /// because peer columns always share one occupancy pattern, the same
    /// compaction happens to every peer and slots stay aligned.
    pub fn deserialize(
        file_desc: &TupleDesc,
        column: usize,
        page_no: usize,
        data: &[u8],
    ) -> Result<Self> {
        let mut page = ColumnPage::new(file_desc, column, page_no)?;
        let mut buf = data;
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(Error::Malformed("page shorter than its header".to_string()));
        }
        let num_slots = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let used = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        buf = &buf[PAGE_HEADER_SIZE..];
        if used > num_slots || num_slots > page.num_slots {
            return Err(Error::Malformed(format!(
                "column page header claims {used} used of {num_slots} slots"
            )));
        }
        for slot in 0..used {
            let tuple = Tuple::read_from(&mut buf, &page.desc)?;
            page.slots[slot] = Some(tuple);
        }
        page.num_used = used;
        Ok(page)
    }
}

impl DbPage for ColumnPage {
    fn page_no(&self) -> usize {
        self.page_no
    }

    fn num_slots(&self) -> usize {
        self.num_slots
    }

    fn num_used_slots(&self) -> usize {
        self.num_used
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        crate::page::serialize_slots(self.num_slots, self.iter().map(|(_, t)| t), self.num_used)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

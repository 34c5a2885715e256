use std::any::Any;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::tuple::{RecordId, Tuple, TupleDesc};
use crate::PAGE_SIZE;

/// Bytes taken by the two `u32` header words: `num_slots`, `num_used_slots`.
pub const PAGE_HEADER_SIZE: usize = 8;

/// Capability contract for a cached page: identity, slot accounting, the
/// dirty bit, and serialization to exactly `PAGE_SIZE` bytes. The `Any`
/// hooks let each file layout recover its concrete page type.
pub trait DbPage: Send + Sync {
    fn page_no(&self) -> usize;

    fn num_slots(&self) -> usize;

    fn num_used_slots(&self) -> usize;

    fn is_dirty(&self) -> bool;

    fn set_dirty(&mut self, dirty: bool);

    fn serialize(&self) -> Result<Vec<u8>>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Writes the common page header and pads the serialized body out to
/// `PAGE_SIZE`, failing if the tuples overran the page.
pub(crate) fn serialize_slots<'a>(
    num_slots: usize,
    tuples: impl Iterator<Item = &'a Tuple>,
    used: usize,
) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(PAGE_SIZE);
    buf.put_u32_le(num_slots as u32);
    buf.put_u32_le(used as u32);
    for tuple in tuples {
        tuple.write_to(&mut buf)?;
    }
    if buf.len() > PAGE_SIZE {
        return Err(Error::Malformed(format!(
            "serialized page is {} bytes",
            buf.len()
        )));
    }
    buf.resize(PAGE_SIZE, 0);
    Ok(buf.to_vec())
}

fn read_header(buf: &mut impl Buf) -> Result<(usize, usize)> {
    if buf.remaining() < PAGE_HEADER_SIZE {
        return Err(Error::Malformed("page shorter than its header".to_string()));
    }
    let num_slots = buf.get_u32_le() as usize;
    let used = buf.get_u32_le() as usize;
    if used > num_slots {
        return Err(Error::Malformed(format!(
            "page header claims {used} used of {num_slots} slots"
        )));
    }
    Ok((num_slots, used))
}

/// A heap page: a fixed array of whole-row slots.
pub struct RowPage {
    page_no: usize,
    desc: TupleDesc,
    num_slots: usize,
    num_used: usize,
    slots: Vec<Option<Tuple>>,
    dirty: bool,
}

impl RowPage {
    /// An empty page for the given schema. The slot count follows from the
    /// fixed tuple width: `(PAGE_SIZE - header) / bytes_per_tuple`.
    pub fn new(desc: TupleDesc, page_no: usize) -> Result<Self> {
        let per_tuple = desc.bytes_per_tuple();
        if per_tuple == 0 {
            return Err(Error::Malformed("empty tuple descriptor".to_string()));
        }
        let num_slots = (PAGE_SIZE - PAGE_HEADER_SIZE) / per_tuple;
        Ok(Self {
            page_no,
            desc,
            num_slots,
            num_used: 0,
            slots: vec![None; num_slots],
            dirty: false,
        })
    }

    /// Store a copy of the tuple in the first free slot and return its
    /// record id. Fails with `PageFull` when no slot is free.
    pub fn insert(&mut self, tuple: &Tuple) -> Result<RecordId> {
        if self.num_used >= self.num_slots {
            return Err(Error::PageFull);
        }
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(Error::PageFull)?;
        let rid = RecordId::Row {
            page_no: self.page_no,
            slot,
        };
        self.slots[slot] = Some(Tuple {
            desc: self.desc.clone(),
            values: tuple.values.clone(),
            rid: Some(rid),
        });
        self.num_used += 1;
        self.dirty = true;
        Ok(rid)
    }

    /// Clear the slot named by `rid`. A non-row rid is malformed; an out of
    /// range or empty slot is `NotFound`.
    pub fn delete(&mut self, rid: RecordId) -> Result<()> {
        let RecordId::Row { slot, .. } = rid else {
            return Err(Error::Malformed(format!("{rid:?} is not a row record id")));
        };
        if slot >= self.num_slots || self.slots[slot].is_none() {
            return Err(Error::NotFound(format!(
                "no tuple in slot {slot} of page {}",
                self.page_no
            )));
        }
        self.slots[slot] = None;
        self.num_used -= 1;
        self.dirty = true;
        Ok(())
    }

    /// Occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.slots.iter().flatten()
    }

    /// Rebuild a page from its on-disk form. The used tuples land in slots
    /// `[0, used)`, so record ids are reassigned relative to the reload.
    pub fn deserialize(desc: TupleDesc, page_no: usize, data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let (num_slots, used) = read_header(&mut buf)?;
        let per_tuple = desc.bytes_per_tuple();
        if per_tuple == 0 {
            return Err(Error::Malformed("empty tuple descriptor".to_string()));
        }
        if num_slots * per_tuple + PAGE_HEADER_SIZE > PAGE_SIZE {
            return Err(Error::Malformed(format!(
                "page header claims {num_slots} slots of {per_tuple} bytes"
            )));
        }
        let mut slots = vec![None; num_slots];
        for (slot, entry) in slots.iter_mut().enumerate().take(used) {
            let mut tuple = Tuple::read_from(&mut buf, &desc)?;
            tuple.rid = Some(RecordId::Row { page_no, slot });
            *entry = Some(tuple);
        }
        Ok(Self {
            page_no,
            desc,
            num_slots,
            num_used: used,
            slots,
            dirty: false,
        })
    }
}

impl DbPage for RowPage {
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
        serialize_slots(self.num_slots, self.iter(), self.num_used)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

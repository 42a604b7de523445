//! Host-side map bookkeeping
//!
//! Every region the processor manager maps is recorded here with the
//! address spaces currently backing it, so later unmap and translate
//! calls can find it again. The table has a fixed number of slots and is
//! scanned linearly; its capacity is a few tens of entries.

use corelink_api::error::Result;
use corelink_api::{AddrInfo, AddressSpaceKind, Error, MapMask, Size, VirtAddr};

/// One recorded mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedMemEntry {
    /// Addresses of the region in every space it is known in
    pub info: AddrInfo,
    /// Address space the caller named the region in
    pub src_kind: AddressSpaceKind,
    /// Spaces currently backing the region
    pub map_mask: MapMask,
}

impl MappedMemEntry {
    /// Address of the region in its source space
    pub fn src_addr(&self) -> Option<usize> {
        self.info.addr(self.src_kind)
    }

    /// Drops `mask` from the entry, forgetting the addresses it backed
    pub fn clear(&mut self, mask: MapMask) {
        self.map_mask.remove(mask);
        if mask.contains(MapMask::HOST_KERNEL_VIRTUAL) {
            self.info.clear_addr(AddressSpaceKind::MasterKernelVirtual);
        }
        if mask.contains(MapMask::SLAVE_VIRTUAL) {
            self.info.clear_addr(AddressSpaceKind::SlaveVirtual);
        }
    }
}

/// Fixed-capacity table of [`MappedMemEntry`] slots
#[derive(Debug, Clone)]
pub struct MappedMemTable {
    slots: Vec<Option<MappedMemEntry>>,
}

impl MappedMemTable {
    /// Creates a table with `capacity` free slots
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots in use
    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Entry in slot `index`
    pub fn get(&self, index: usize) -> Option<&MappedMemEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Mutable entry in slot `index`
    pub fn get_mut(&mut self, index: usize) -> Option<&mut MappedMemEntry> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Every slot in use, with its index
    pub fn iter(&self) -> impl Iterator<Item = (usize, &MappedMemEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (index, entry)))
    }

    /// Stores `entry` in the first free slot
    pub fn insert(&mut self, entry: MappedMemEntry) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or_else(|| Error::TableFull(format!("all {} mapped-entry slots in use", self.slots.len())))?;
        self.slots[index] = Some(entry);
        Ok(index)
    }

    /// Frees slot `index`, returning what it held
    pub fn free(&mut self, index: usize) -> Option<MappedMemEntry> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Slot recorded for exactly this source, size and mask.
    ///
    /// When several slots qualify, one whose addresses agree with `hint`
    /// is preferred.
    pub fn find_exact(
        &self,
        src_kind: AddressSpaceKind,
        src_addr: usize,
        size: Size,
        mask: MapMask,
        hint: &AddrInfo,
    ) -> Option<usize> {
        self.pick(hint, |entry| {
            entry.src_kind == src_kind
                && entry.src_addr() == Some(src_addr)
                && entry.info.size == size
                && entry.map_mask == mask
        })
    }

    /// Slot recorded for this source address and size that is backed by any space in `mask`
    pub fn find_partial(
        &self,
        src_kind: AddressSpaceKind,
        src_addr: usize,
        size: Size,
        mask: MapMask,
        hint: &AddrInfo,
    ) -> Option<usize> {
        self.pick(hint, |entry| {
            entry.info.size == size && entry.info.addr(src_kind) == Some(src_addr) && entry.map_mask.intersects(mask)
        })
    }

    fn pick<F>(&self, hint: &AddrInfo, matches: F) -> Option<usize>
    where
        F: Fn(&MappedMemEntry) -> bool,
    {
        let mut first = None;
        for (index, entry) in self.iter().filter(|(_, entry)| matches(entry)) {
            if agrees(&entry.info, hint) {
                return Some(index);
            }
            if first.is_none() {
                first = Some(index);
            }
        }
        first
    }

    /// Translates `addr` through the first entry covering it in `src` that is backed in `dst`
    pub fn translate(&self, addr: usize, src: AddressSpaceKind, dst: AddressSpaceKind) -> Option<usize> {
        let required = MapMask::from_kind(dst);
        self.iter()
            .filter(|(_, entry)| !dst.is_virtual() || entry.map_mask.contains(required))
            .find_map(|(_, entry)| entry.info.translate(src, addr, dst))
    }

    /// Host kernel address of `[slave_addr, slave_addr + len)`, which must lie in one entry
    pub fn host_window(&self, slave_addr: VirtAddr, len: Size) -> Option<VirtAddr> {
        self.iter()
            .filter(|(_, entry)| {
                entry
                    .map_mask
                    .contains(MapMask::HOST_KERNEL_VIRTUAL | MapMask::SLAVE_VIRTUAL)
            })
            .find(|(_, entry)| entry.info.contains_range(AddressSpaceKind::SlaveVirtual, slave_addr, len))
            .and_then(|(_, entry)| {
                entry.info.translate(
                    AddressSpaceKind::SlaveVirtual,
                    slave_addr,
                    AddressSpaceKind::MasterKernelVirtual,
                )
            })
    }
}

/// True if no space has a different address in `stored` and `hint`
fn agrees(stored: &AddrInfo, hint: &AddrInfo) -> bool {
    AddressSpaceKind::ALL
        .iter()
        .all(|&kind| match (stored.addr(kind), hint.addr(kind)) {
            (Some(stored), Some(hinted)) => stored == hinted,
            _ => true,
        })
}

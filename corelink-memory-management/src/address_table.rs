//! Slave address translation table
//!
//! One table per backend. The first `static_count` slots hold boot-time
//! regions (and regions folded in at attach); they are read-only and never
//! reference counted. Slots from `static_count` up to the table length are
//! dynamic: born on the first map that misses the table, counted on every
//! further map of a covered range, and vacated when the last reference is
//! released. Slots are never reordered, so indices handed out stay valid
//! for the whole map/unmap operation that produced them.

use alloc::format;
use alloc::vec::Vec;

use corelink_api::error::{self, Error, FirstError, Result};
use corelink_api::{PhysAddr, Size, VirtAddr};

use crate::layout::{page_offset, page_round_down, page_round_up, MemoryRegion};
use crate::mmu::{split_into_pages, MmuEntry, MmuProgrammer};
use crate::translation::{EntryOrigin, TranslationEntry};

/// Outcome of [`AddressTable::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// The range lies inside a static entry; nothing was counted
    Static(usize),
    /// The range lies inside a live dynamic entry whose count was raised
    Shared(usize),
    /// A new dynamic entry was created; the slave MMU has not seen it yet
    Created(usize),
}

impl Acquired {
    /// Slot index of the entry covering the range
    pub fn index(self) -> usize {
        match self {
            Acquired::Static(index) | Acquired::Shared(index) | Acquired::Created(index) => index,
        }
    }
}

/// Outcome of [`AddressTable::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// No live dynamic entry contains the address
    NotFound,
    /// A reference was dropped; the entry is still live
    Shared {
        /// Slot index
        index: usize,
        /// References left
        ref_count: u32,
    },
    /// The last reference was dropped and the slot vacated
    Freed {
        /// Slot index
        index: usize,
        /// The entry as it was before it was vacated
        entry: TranslationEntry,
    },
}

/// Fixed-capacity slave-virtual to host-physical translation table
#[derive(Debug, Clone)]
pub struct AddressTable {
    entries: Vec<TranslationEntry>,
    capacity: usize,
    boot_count: usize,
    static_count: usize,
    mmu_enabled: bool,
}

impl AddressTable {
    /// Creates a table holding `boot_regions` as its immutable boot-time entries
    pub fn new(capacity: usize, boot_regions: &[MemoryRegion]) -> Result<Self> {
        if capacity == 0 {
            return Err(error::invalid_argument("address table capacity must be non-zero"));
        }
        if boot_regions.len() > capacity {
            return Err(error::table_full("boot regions exceed address table capacity"));
        }

        let mut entries = Vec::with_capacity(capacity);
        for region in boot_regions {
            Self::check_region(region)?;
            entries.push(TranslationEntry::fixed(
                region.slave_virt,
                region.master_phys,
                region.size,
                region.is_cached,
                EntryOrigin::Boot,
            ));
        }

        let boot_count = entries.len();
        Ok(Self {
            entries,
            capacity,
            boot_count,
            static_count: boot_count,
            mmu_enabled: false,
        })
    }

    fn check_region(region: &MemoryRegion) -> Result<()> {
        if region.size == 0 {
            return Err(error::invalid_argument("zero-sized region"));
        }
        if region.slave_virt.checked_add(region.size).is_none()
            || region.master_phys.checked_add(region.size).is_none()
        {
            return Err(error::invalid_argument("region wraps the address space"));
        }
        Ok(())
    }

    /// Folds a resource-descriptor region into the static part of the table.
    ///
    /// Only legal while no dynamic entry exists.
    pub fn add_static(&mut self, region: &MemoryRegion) -> Result<usize> {
        Self::check_region(region)?;
        if self.entries.len() != self.static_count {
            return Err(error::invalid_state("dynamic entries already present"));
        }
        if self.entries.len() >= self.capacity {
            return Err(error::table_full("address table"));
        }

        let index = self.entries.len();
        self.entries.push(TranslationEntry::fixed(
            region.slave_virt,
            region.master_phys,
            region.size,
            region.is_cached,
            EntryOrigin::Attach,
        ));
        self.static_count += 1;
        log::debug!(
            "address table: static region {} slave {:#x} -> phys {:#x} size {:#x}",
            region.name,
            region.slave_virt,
            region.master_phys,
            region.size
        );
        Ok(index)
    }

    /// Translates a slave virtual address to a host physical address.
    ///
    /// Falls back to the identity mapping when the slave MMU is disabled.
    pub fn lookup(&self, addr: VirtAddr) -> Result<PhysAddr> {
        if let Some(phys) = self.entries.iter().find_map(|entry| entry.to_master_phys(addr)) {
            return Ok(phys);
        }
        if !self.mmu_enabled {
            return Ok(addr);
        }
        Err(Error::AddressTranslationFailed(format!("slave address {:#x} is not mapped", addr)))
    }

    /// Takes a reference on the slave range `[slave_virt, slave_virt + size)`.
    ///
    /// Does not touch the slave MMU; see [`AddressTable::map_with`].
    pub fn acquire(&mut self, slave_virt: VirtAddr, size: Size, master_phys: PhysAddr, is_cached: bool) -> Result<Acquired> {
        if size == 0 {
            return Err(error::invalid_argument("zero-sized mapping"));
        }
        if slave_virt.checked_add(size).is_none() || master_phys.checked_add(size).is_none() {
            return Err(error::invalid_argument("mapping wraps the address space"));
        }

        if let Some(index) = self.find_static(slave_virt, size) {
            return Ok(Acquired::Static(index));
        }

        let dynamic = self.static_count..self.entries.len();
        if let Some(index) = dynamic.clone().find(|&i| self.entries[i].covers(slave_virt, size)) {
            let entry = &mut self.entries[index];
            entry.ref_count = entry
                .ref_count
                .checked_add(1)
                .ok_or_else(|| error::invalid_state("translation entry reference count overflow"))?;
            return Ok(Acquired::Shared(index));
        }

        let entry = TranslationEntry::dynamic(slave_virt, master_phys, size, is_cached);
        let index = match dynamic.clone().find(|&i| !self.entries[i].is_mapped) {
            Some(index) => {
                self.entries[index] = entry;
                index
            }
            None if self.entries.len() < self.capacity => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
            None => return Err(error::table_full("address table")),
        };
        log::debug!(
            "address table: new entry {} slave {:#x} -> phys {:#x} size {:#x}",
            index,
            slave_virt,
            master_phys,
            size
        );
        Ok(Acquired::Created(index))
    }

    /// Drops a reference on the dynamic entry containing `slave_virt`.
    ///
    /// An address no live dynamic entry contains is not an error.
    pub fn release(&mut self, slave_virt: VirtAddr) -> Released {
        let found = (self.static_count..self.entries.len()).find(|&i| self.entries[i].contains(slave_virt));
        let Some(index) = found else {
            log::debug!("address table: release of unmapped slave address {:#x} ignored", slave_virt);
            return Released::NotFound;
        };

        let entry = &mut self.entries[index];
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count > 0 {
            return Released::Shared {
                index,
                ref_count: entry.ref_count,
            };
        }

        let freed = *entry;
        *entry = TranslationEntry::vacant();
        log::debug!("address table: entry {} released", index);
        Released::Freed { index, entry: freed }
    }

    /// Acquires a range and, for a newly created entry, programs the slave MMU.
    ///
    /// With the MMU enabled, dynamic entries are widened to whole pages.
    /// If programming fails the entry is vacated again.
    pub fn map_with<M>(
        &mut self,
        mmu: &mut M,
        slave_virt: VirtAddr,
        size: Size,
        master_phys: PhysAddr,
        is_cached: bool,
    ) -> Result<Acquired>
    where
        M: MmuProgrammer + ?Sized,
    {
        if size != 0 {
            if let Some(index) = self.find_static(slave_virt, size) {
                return Ok(Acquired::Static(index));
            }
        }

        let (slave_base, phys_base, span) = if self.mmu_enabled {
            Self::page_span(slave_virt, master_phys, size)?
        } else {
            (slave_virt, master_phys, size)
        };

        let acquired = self.acquire(slave_base, span, phys_base, is_cached)?;
        if let Acquired::Created(index) = acquired {
            if self.mmu_enabled {
                let entry = self.entries[index];
                if let Err(err) = Self::program(mmu, &entry) {
                    self.entries[index] = TranslationEntry::vacant();
                    return Err(err);
                }
            }
        }
        Ok(acquired)
    }

    /// Releases a range and, when its entry is freed, removes it from the slave MMU
    pub fn unmap_with<M>(&mut self, mmu: &mut M, slave_virt: VirtAddr) -> Result<Released>
    where
        M: MmuProgrammer + ?Sized,
    {
        let released = self.release(slave_virt);
        if let Released::Freed { entry, .. } = &released {
            if self.mmu_enabled {
                Self::unprogram(mmu, entry)?;
            }
        }
        Ok(released)
    }

    /// MMU entries for every live region, in table order
    pub fn mmu_context(&self) -> Result<Vec<MmuEntry>> {
        let mut context = Vec::new();
        for entry in self.entries.iter().filter(|entry| entry.is_mapped) {
            context.extend(Self::pages(entry)?);
        }
        Ok(context)
    }

    /// Drops every dynamic and attach-time entry, keeping the boot-time ones
    pub fn reset(&mut self) {
        self.entries.truncate(self.boot_count);
        self.static_count = self.boot_count;
    }

    fn find_static(&self, slave_virt: VirtAddr, size: Size) -> Option<usize> {
        self.entries[..self.static_count]
            .iter()
            .position(|entry| entry.covers(slave_virt, size))
    }

    fn page_span(slave_virt: VirtAddr, master_phys: PhysAddr, size: Size) -> Result<(VirtAddr, PhysAddr, Size)> {
        if page_offset(slave_virt) != page_offset(master_phys) {
            return Err(error::invalid_argument("slave and physical addresses differ within a page"));
        }
        let end = slave_virt
            .checked_add(size)
            .filter(|end| end.checked_add(crate::layout::PAGE_SIZE - 1).is_some())
            .ok_or_else(|| error::invalid_argument("mapping wraps the address space"))?;
        let slave_base = page_round_down(slave_virt);
        Ok((slave_base, page_round_down(master_phys), page_round_up(end) - slave_base))
    }

    fn pages(entry: &TranslationEntry) -> Result<Vec<MmuEntry>> {
        let (Some(slave_virt), Some(master_phys)) = (entry.slave_virt(), entry.master_phys()) else {
            return Ok(Vec::new());
        };
        let (slave_base, phys_base, span) = Self::page_span(slave_virt, master_phys, entry.size())?;
        split_into_pages(phys_base, slave_base, span)
    }

    fn program<M: MmuProgrammer + ?Sized>(mmu: &mut M, entry: &TranslationEntry) -> Result<()> {
        let pages = Self::pages(entry)?;
        for (programmed, page) in pages.iter().enumerate() {
            if let Err(err) = mmu.add_entry(page) {
                for added in &pages[..programmed] {
                    if let Err(rollback) = mmu.delete_entry(added.slave_virt, added.size) {
                        log::warn!(
                            "address table: rollback of MMU entry {:#x} failed: {}",
                            added.slave_virt,
                            rollback
                        );
                    }
                }
                return Err(Error::MapFailed(format!(
                    "slave MMU add entry {:#x} size {:#x}: {}",
                    page.slave_virt, page.size, err
                )));
            }
        }
        Ok(())
    }

    fn unprogram<M: MmuProgrammer + ?Sized>(mmu: &mut M, entry: &TranslationEntry) -> Result<()> {
        let mut teardown = FirstError::new();
        for page in Self::pages(entry)? {
            teardown.record(mmu.delete_entry(page.slave_virt, page.size).map_err(|err| {
                Error::UnmapFailed(format!("slave MMU delete entry {:#x}: {}", page.slave_virt, err))
            }));
        }
        teardown.finish()
    }

    /// Looks up the live entry containing `slave_virt`
    pub fn find(&self, slave_virt: VirtAddr) -> Option<&TranslationEntry> {
        self.entries.iter().find(|entry| entry.contains(slave_virt))
    }

    /// All slots, static first
    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    /// Slot at `index`
    pub fn entry(&self, index: usize) -> Option<&TranslationEntry> {
        self.entries.get(index)
    }

    /// Number of static slots (boot plus attach-time)
    pub fn static_count(&self) -> usize {
        self.static_count
    }

    /// Number of boot-time slots
    pub fn boot_count(&self) -> usize {
        self.boot_count
    }

    /// Number of slots in use, static plus dynamic (live or vacant)
    pub fn dynamic_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of live dynamic entries
    pub fn live_dynamic(&self) -> usize {
        self.entries[self.static_count..].iter().filter(|entry| entry.is_mapped).count()
    }

    /// Maximum number of slots
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the slave MMU is enabled
    pub fn mmu_enabled(&self) -> bool {
        self.mmu_enabled
    }

    /// Records whether the slave MMU is enabled
    pub fn set_mmu_enabled(&mut self, enabled: bool) {
        self.mmu_enabled = enabled;
    }
}

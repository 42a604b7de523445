//! Translation table entries

use corelink_api::{AddrInfo, AddressSpaceKind, MapMask, PhysAddr, Size, VirtAddr};

/// How an entry came to be in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Fixed at table creation, never removed
    Boot,
    /// Folded in from the resource descriptor at attach, removed on reset
    Attach,
    /// Created by a map call, reference counted
    Dynamic,
}

/// One slave-virtual to host-physical translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    /// Addresses of the region in each known space
    pub info: AddrInfo,
    /// Whether the region is currently backed
    pub is_mapped: bool,
    /// Spaces currently backing the region
    pub map_mask: MapMask,
    /// Outstanding map references (dynamic entries only)
    pub ref_count: u32,
    /// Where the entry came from
    pub origin: EntryOrigin,
}

impl TranslationEntry {
    /// Creates a static entry (boot or attach time)
    pub fn fixed(slave_virt: VirtAddr, master_phys: PhysAddr, size: Size, is_cached: bool, origin: EntryOrigin) -> Self {
        Self {
            info: Self::region(slave_virt, master_phys, size, is_cached),
            is_mapped: true,
            map_mask: MapMask::SLAVE_VIRTUAL,
            ref_count: 0,
            origin,
        }
    }

    /// Creates a dynamic entry holding one reference
    pub fn dynamic(slave_virt: VirtAddr, master_phys: PhysAddr, size: Size, is_cached: bool) -> Self {
        Self {
            info: Self::region(slave_virt, master_phys, size, is_cached),
            is_mapped: true,
            map_mask: MapMask::SLAVE_VIRTUAL,
            ref_count: 1,
            origin: EntryOrigin::Dynamic,
        }
    }

    /// A dynamic slot whose region has been released
    pub fn vacant() -> Self {
        Self {
            info: AddrInfo::default(),
            is_mapped: false,
            map_mask: MapMask::empty(),
            ref_count: 0,
            origin: EntryOrigin::Dynamic,
        }
    }

    fn region(slave_virt: VirtAddr, master_phys: PhysAddr, size: Size, is_cached: bool) -> AddrInfo {
        AddrInfo::new(size, is_cached)
            .with(AddressSpaceKind::SlaveVirtual, slave_virt)
            .with(AddressSpaceKind::MasterPhysical, master_phys)
    }

    /// Returns true for boot and attach entries
    pub fn is_static(&self) -> bool {
        self.origin != EntryOrigin::Dynamic
    }

    /// Slave virtual base address, if the entry is live
    pub fn slave_virt(&self) -> Option<VirtAddr> {
        self.info.addr(AddressSpaceKind::SlaveVirtual)
    }

    /// Host physical base address, if the entry is live
    pub fn master_phys(&self) -> Option<PhysAddr> {
        self.info.addr(AddressSpaceKind::MasterPhysical)
    }

    /// Region size
    pub fn size(&self) -> Size {
        self.info.size
    }

    /// Returns true if the live entry contains slave address `addr`
    pub fn contains(&self, addr: VirtAddr) -> bool {
        self.is_mapped && self.info.contains(AddressSpaceKind::SlaveVirtual, addr)
    }

    /// Returns true if the live entry covers the whole slave range `[addr, addr + size)`
    pub fn covers(&self, addr: VirtAddr, size: Size) -> bool {
        self.is_mapped && self.info.contains_range(AddressSpaceKind::SlaveVirtual, addr, size)
    }

    /// Translates a contained slave address to host physical
    pub fn to_master_phys(&self, addr: VirtAddr) -> Option<PhysAddr> {
        if !self.is_mapped {
            return None;
        }
        self.info.translate(AddressSpaceKind::SlaveVirtual, addr, AddressSpaceKind::MasterPhysical)
    }
}

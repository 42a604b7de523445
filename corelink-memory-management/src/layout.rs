//! Slave memory layout helpers
//!
//! Page constants used when handing regions to the slave MMU, and the
//! resource-descriptor region type consumed at attach time.

use alloc::string::String;
use corelink_api::{PhysAddr, Size, VirtAddr};

/// Smallest slave MMU page size (4KB)
pub const PAGE_SIZE: usize = 4096;
/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

/// Align address down to page boundary
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Offset of `addr` within its page
#[inline]
pub const fn page_offset(addr: usize) -> usize {
    addr & (PAGE_SIZE - 1)
}

/// Checks if the address is page-aligned
#[inline]
pub const fn is_page_aligned(addr: usize) -> bool {
    page_offset(addr) == 0
}

/// One entry of a resource descriptor.
///
/// Regions with `map == false` go straight into the backend's translation
/// table; regions with `map == true` are handed back to the processor
/// manager, which maps them on the host side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Name for diagnostics
    pub name: String,
    /// Slave virtual address of the region
    pub slave_virt: VirtAddr,
    /// Host physical address backing the region
    pub master_phys: PhysAddr,
    /// Region size in bytes
    pub size: Size,
    /// Whether the region is cacheable
    pub is_cached: bool,
    /// Whether the host must map the region
    pub map: bool,
}

impl MemoryRegion {
    /// Creates a region that is folded into the translation table only
    pub fn new(name: &str, slave_virt: VirtAddr, master_phys: PhysAddr, size: Size) -> Self {
        Self {
            name: String::from(name),
            slave_virt,
            master_phys,
            size,
            is_cached: false,
            map: false,
        }
    }

    /// Marks the region as needing a host-side mapping
    pub fn host_mapped(mut self) -> Self {
        self.map = true;
        self
    }

    /// Marks the region as cacheable
    pub fn cached(mut self) -> Self {
        self.is_cached = true;
        self
    }

    /// Returns true if the slave range `[addr, addr + len)` overlaps this region
    pub fn overlaps(&self, addr: VirtAddr, len: Size) -> bool {
        addr < self.slave_virt.saturating_add(self.size) && self.slave_virt < addr.saturating_add(len)
    }
}

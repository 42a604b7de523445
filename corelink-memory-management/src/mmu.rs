//! Slave MMU entry model
//!
//! The slave MMU is programmed with explicit TLB-style entries. A region is
//! broken into the largest naturally aligned pages the MMU supports; each
//! page carries the same fixed attribute policy.

use alloc::vec::Vec;
use corelink_api::error::{self, Result};
use corelink_api::{PhysAddr, Size, VirtAddr};

use crate::layout::PAGE_SIZE;

/// 16MB supersection
pub const SIZE_16M: Size = 0x0100_0000;
/// 1MB section
pub const SIZE_1M: Size = 0x0010_0000;
/// 64KB large page
pub const SIZE_64K: Size = 0x0001_0000;
/// 4KB small page
pub const SIZE_4K: Size = PAGE_SIZE;

/// Page sizes supported by the slave MMU, largest first
pub const MMU_PAGE_SIZES: [Size; 4] = [SIZE_16M, SIZE_1M, SIZE_64K, SIZE_4K];

/// Access element size applied to a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSize {
    /// 8-bit accesses
    Bits8,
    /// 16-bit accesses
    Bits16,
    /// 32-bit accesses
    Bits32,
    /// No element-size translation
    NoTranslation,
}

/// Endianness applied to a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Little endian
    Little,
    /// Big endian
    Big,
}

/// Which side's attributes apply when page sizes are mixed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixedSize {
    /// TLB entry attributes win
    Tlb,
    /// CPU attributes win
    Cpu,
}

/// Element size used for every entry
pub const ELEMENT_SIZE: ElementSize = ElementSize::Bits16;
/// Endianness used for every entry
pub const ENDIANNESS: Endianness = Endianness::Little;
/// Mixed-size policy used for every entry
pub const MIXED_SIZE: MixedSize = MixedSize::Tlb;

/// One slave MMU entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmuEntry {
    /// Host physical address of the page
    pub master_phys: PhysAddr,
    /// Slave virtual address of the page
    pub slave_virt: VirtAddr,
    /// Page size in bytes
    pub size: Size,
    /// Access element size
    pub element_size: ElementSize,
    /// Page endianness
    pub endianness: Endianness,
    /// Mixed-size policy
    pub mixed_size: MixedSize,
}

impl MmuEntry {
    /// Creates an entry with the fixed attribute policy
    pub const fn new(master_phys: PhysAddr, slave_virt: VirtAddr, size: Size) -> Self {
        Self {
            master_phys,
            slave_virt,
            size,
            element_size: ELEMENT_SIZE,
            endianness: ENDIANNESS,
            mixed_size: MIXED_SIZE,
        }
    }
}

/// Backend-specific slave MMU programming calls.
///
/// The address table is generic over this trait; each SoC backend
/// supplies the register-level implementation.
pub trait MmuProgrammer {
    /// Adds one entry to the slave MMU
    fn add_entry(&mut self, entry: &MmuEntry) -> Result<()>;

    /// Removes the entry covering `slave_virt`
    fn delete_entry(&mut self, slave_virt: VirtAddr, size: Size) -> Result<()>;
}

/// Splits a region into MMU pages, largest naturally aligned page first.
///
/// Both addresses and the size must be 4KB aligned.
pub fn split_into_pages(master_phys: PhysAddr, slave_virt: VirtAddr, size: Size) -> Result<Vec<MmuEntry>> {
    if size == 0 {
        return Err(error::invalid_argument("zero-sized MMU region"));
    }
    if master_phys % SIZE_4K != 0 || slave_virt % SIZE_4K != 0 || size % SIZE_4K != 0 {
        return Err(error::invalid_argument("MMU region is not 4KB aligned"));
    }

    let mut pages = Vec::new();
    let mut phys = master_phys;
    let mut virt = slave_virt;
    let mut remaining = size;
    while remaining > 0 {
        let page = MMU_PAGE_SIZES
            .iter()
            .copied()
            .find(|&page| page <= remaining && phys % page == 0 && virt % page == 0)
            .unwrap_or(SIZE_4K);
        pages.push(MmuEntry::new(phys, virt, page));
        phys += page;
        virt += page;
        remaining -= page;
    }
    Ok(pages)
}

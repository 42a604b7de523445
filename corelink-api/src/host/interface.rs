//! Host memory mapping interface

use crate::core::types::{PhysAddr, Size, VirtAddr};
use crate::error::Result;

/// Host-side page mapper (the OS `Memory_map`/`Memory_unmap` primitives).
///
/// # Safety
///
/// Implementors guarantee that a virtual address returned by `map` stays
/// valid for reads and writes of `size` bytes until the matching `unmap`,
/// and that `virt_to_phys` only answers for addresses it actually mapped
/// or otherwise knows to be backed. The processor manager dereferences
/// these addresses when copying to and from slave memory.
pub unsafe trait HostMemory: Send {
    /// Maps `size` bytes of host physical memory, returning a host kernel virtual address
    fn map(&mut self, phys: PhysAddr, size: Size, cached: bool) -> Result<VirtAddr>;

    /// Removes a mapping created by `map`
    fn unmap(&mut self, virt: VirtAddr, size: Size) -> Result<()>;

    /// Resolves a host virtual address to the physical address backing it
    fn virt_to_phys(&self, virt: VirtAddr) -> Result<PhysAddr>;
}

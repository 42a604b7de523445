//! Cross-address-space operations of one processor instance
//!
//! `AddressSpaces` borrows the pieces of an instance that map, translate
//! and copy memory (the backend, the host mapper and the mapped-entry
//! table) so the loader bridge can drive them while the instance lock is
//! held.

use corelink_api::error::{self, ErrorContext, FirstError, Result};
use corelink_api::{AddrInfo, AddressSpaceKind, Error, HostMemory, MapMask, PhysAddr, ProcId, Size, VirtAddr};

use super::mapped::{MappedMemEntry, MappedMemTable};
use crate::processor::{MemSegment, ProcessorBackend};

/// Mutable view over the address spaces of one instance
pub struct AddressSpaces<'a> {
    proc_id: ProcId,
    backend: &'a mut dyn ProcessorBackend,
    host: &'a mut dyn HostMemory,
    mapped: &'a mut MappedMemTable,
}

impl<'a> AddressSpaces<'a> {
    pub(crate) fn new(
        backend: &'a mut dyn ProcessorBackend,
        host: &'a mut dyn HostMemory,
        mapped: &'a mut MappedMemTable,
    ) -> Self {
        Self {
            proc_id: backend.proc_id(),
            backend,
            host,
            mapped,
        }
    }

    /// Processor these spaces belong to
    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    /// Maps the region described by `info` into every space in `map_type`.
    ///
    /// On success `info` carries the new addresses and the mapping is
    /// recorded for later [`unmap`](Self::unmap) and translation.
    pub fn map(&mut self, map_type: MapMask, info: &mut AddrInfo, src: AddressSpaceKind) -> Result<()> {
        if map_type.is_empty() {
            return Err(error::invalid_argument("empty map type"));
        }
        if info.size == 0 {
            return Err(error::invalid_argument("zero-sized mapping"));
        }
        let src_addr = info
            .addr(src)
            .ok_or_else(|| Error::InvalidArgument(format!("no {:?} source address", src)))?;
        log::debug!("{}: map {:?} {:#x}+{:#x} as {:?}", self.proc_id, src, src_addr, info.size, map_type);

        let mut done = MapMask::empty();
        if map_type.contains(MapMask::HOST_KERNEL_VIRTUAL) {
            if src != AddressSpaceKind::MasterPhysical {
                return Err(Error::InvalidArgument(format!(
                    "host kernel mapping needs a physical source, got {:?}",
                    src
                )));
            }
            let virt = self
                .host
                .map(src_addr, info.size, info.is_cached)
                .map_err(|err| Error::MapFailed(format!("host map {:#x}: {}", src_addr, err)))?;
            info.set_addr(AddressSpaceKind::MasterKernelVirtual, virt);
            done |= MapMask::HOST_KERNEL_VIRTUAL;
        }

        if map_type.contains(MapMask::SLAVE_VIRTUAL) {
            if let Err(err) = self.map_slave(info, src, src_addr) {
                self.undo(done, info);
                return Err(err);
            }
            done |= MapMask::SLAVE_VIRTUAL;
        }

        if let Err(err) = self.record(*info, src, done) {
            log::error!("{}: map of {:#x} not recorded: {}", self.proc_id, src_addr, err);
            self.undo(done, info);
            return Err(err);
        }
        Ok(())
    }

    fn map_slave(&mut self, info: &mut AddrInfo, src: AddressSpaceKind, src_addr: usize) -> Result<()> {
        let phys: PhysAddr = match src {
            AddressSpaceKind::MasterPhysical => src_addr,
            AddressSpaceKind::MasterKernelVirtual | AddressSpaceKind::MasterUserVirtual => {
                self.host.virt_to_phys(src_addr).context("slave map source")?
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "slave mapping cannot start from {:?}",
                    other
                )));
            }
        };
        let dst = info
            .addr(AddressSpaceKind::SlaveVirtual)
            .ok_or_else(|| error::invalid_argument("no slave virtual destination"))?;

        let segment = MemSegment {
            master_phys: phys,
            size: info.size,
            is_cached: info.is_cached,
        };
        let slave = self.backend.map(dst, &[segment])?;
        info.set_addr(AddressSpaceKind::SlaveVirtual, slave);
        info.set_addr(AddressSpaceKind::MasterPhysical, phys);
        Ok(())
    }

    /// Every successful map gets a slot of its own, so each later unmap
    /// drops exactly one host mapping and one backend reference.
    fn record(&mut self, info: AddrInfo, src: AddressSpaceKind, done: MapMask) -> Result<()> {
        self.mapped
            .insert(MappedMemEntry {
                info,
                src_kind: src,
                map_mask: done,
            })
            .map(|_| ())
    }

    fn undo(&mut self, done: MapMask, info: &AddrInfo) {
        if done.contains(MapMask::SLAVE_VIRTUAL) {
            if let Some(slave) = info.addr(AddressSpaceKind::SlaveVirtual) {
                if let Err(err) = self.backend.unmap(slave, info.size) {
                    log::warn!("{}: map rollback: {}", self.proc_id, err);
                }
            }
        }
        if done.contains(MapMask::HOST_KERNEL_VIRTUAL) {
            if let Some(virt) = info.addr(AddressSpaceKind::MasterKernelVirtual) {
                if let Err(err) = self.host.unmap(virt, info.size) {
                    log::warn!("{}: map rollback: {}", self.proc_id, err);
                }
            }
        }
    }

    /// Removes the spaces in `map_type` from the mapping recorded for `info`.
    ///
    /// Slots are matched on source, size and mask first, then on source
    /// and size alone; among equal candidates the one whose addresses
    /// agree with `info` wins. A slot is freed once no space backs it any
    /// more. Spaces recorded in separate slots are removed from each.
    pub fn unmap(&mut self, map_type: MapMask, info: &AddrInfo, src: AddressSpaceKind) -> Result<()> {
        if map_type.is_empty() {
            return Err(error::invalid_argument("empty map type"));
        }
        let src_addr = info
            .addr(src)
            .ok_or_else(|| Error::InvalidArgument(format!("no {:?} source address", src)))?;
        log::debug!("{}: unmap {:?} {:#x}+{:#x} as {:?}", self.proc_id, src, src_addr, info.size, map_type);

        let mut pending = map_type;
        let mut matched = false;
        let mut teardown = FirstError::new();
        while !pending.is_empty() {
            let found = self
                .mapped
                .find_exact(src, src_addr, info.size, pending, info)
                .or_else(|| self.mapped.find_partial(src, src_addr, info.size, pending, info));
            let Some((index, entry)) = found.and_then(|index| self.mapped.get(index).map(|entry| (index, *entry)))
            else {
                break;
            };
            matched = true;

            let clearing = pending & entry.map_mask;
            if clearing.contains(MapMask::HOST_KERNEL_VIRTUAL) {
                if let Some(virt) = entry.info.addr(AddressSpaceKind::MasterKernelVirtual) {
                    teardown.record(
                        self.host
                            .unmap(virt, entry.info.size)
                            .map_err(|err| Error::UnmapFailed(format!("host unmap {:#x}: {}", virt, err))),
                    );
                }
            }
            if clearing.contains(MapMask::SLAVE_VIRTUAL) {
                if let Some(slave) = entry.info.addr(AddressSpaceKind::SlaveVirtual) {
                    teardown.record(self.backend.unmap(slave, entry.info.size));
                }
            }

            if (entry.map_mask - clearing).is_empty() {
                self.mapped.free(index);
            } else if let Some(stored) = self.mapped.get_mut(index) {
                stored.clear(clearing);
            }
            pending -= clearing;
        }

        if !matched {
            return Err(Error::InvalidArgument(format!("{:#x} was never mapped", src_addr)));
        }
        if !pending.is_empty() {
            log::debug!("{}: {:#x} had no {:?} mapping", self.proc_id, src_addr, pending);
        }
        teardown.finish()
    }

    /// Unmaps every recorded mapping, continuing past failures
    pub fn unmap_all(&mut self) -> Result<()> {
        let entries: Vec<MappedMemEntry> = self.mapped.iter().map(|(_, entry)| *entry).collect();
        let mut teardown = FirstError::new();
        for entry in entries {
            let result = self.unmap(entry.map_mask, &entry.info, entry.src_kind);
            if let Err(err) = &result {
                log::warn!("{}: unmap during teardown: {}", self.proc_id, err);
            }
            teardown.record(result);
        }
        teardown.finish()
    }

    /// Translates `addr` from `src` to `dst`.
    ///
    /// Recorded mappings are searched first; a slave virtual to physical
    /// request falls back to the backend's translation table.
    pub fn translate(&self, addr: usize, src: AddressSpaceKind, dst: AddressSpaceKind) -> Result<usize> {
        if src == dst {
            return Ok(addr);
        }
        if let Some(translated) = self.mapped.translate(addr, src, dst) {
            return Ok(translated);
        }
        if src == AddressSpaceKind::SlaveVirtual && dst == AddressSpaceKind::MasterPhysical {
            return self.backend.translate_addr(addr);
        }
        Err(Error::AddressTranslationFailed(format!(
            "{:#x} from {:?} to {:?}",
            addr, src, dst
        )))
    }

    fn host_window(&self, slave_addr: VirtAddr, len: Size) -> Result<VirtAddr> {
        if len == 0 {
            return Err(error::invalid_argument("zero-length access"));
        }
        self.mapped.host_window(slave_addr, len).ok_or_else(|| {
            Error::AddressTranslationFailed(format!(
                "{:#x}+{:#x} is not host mapped",
                slave_addr, len
            ))
        })
    }

    /// Reads slave memory at `slave_addr` into `buf`
    pub fn read(&mut self, slave_addr: VirtAddr, buf: &mut [u8]) -> Result<usize> {
        let host = self.host_window(slave_addr, buf.len())?;
        // SAFETY: `host_window` only answers for ranges inside a live host mapping.
        unsafe { self.backend.read(host, buf) }
    }

    /// Writes `data` to slave memory at `slave_addr`
    pub fn write(&mut self, slave_addr: VirtAddr, data: &[u8]) -> Result<usize> {
        let host = self.host_window(slave_addr, data.len())?;
        // SAFETY: `host_window` only answers for ranges inside a live host mapping.
        unsafe { self.backend.write(host, data) }
    }

    /// The backend these spaces map through
    pub fn backend(&self) -> &dyn ProcessorBackend {
        &*self.backend
    }
}

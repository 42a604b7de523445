//! Software models of the hardware collaborators
//!
//! `SimHal` records what a real HAL would write to the SoC's registers,
//! `SimHostMemory` backs "physical" memory with a host allocation and hands
//! out real pointers into it, and `SimPowerManager` counts attach/detach
//! calls. Each model exposes a probe that stays valid after the model has
//! been moved into a backend or instance, so tests and bring-up tools can
//! inspect the hardware side while the processor manager owns it.

use std::collections::BTreeMap;
use std::ptr;
use std::sync::Arc;

use corelink_api::error::{self, Result};
use corelink_api::sync::{AtomicU32, Mutex, Ordering};
use corelink_api::{Error, HostMemory, PhysAddr, PowerManager, ProcId, Size, VirtAddr};
use corelink_memory_management::{MmuEntry, MmuProgrammer};

use crate::processor::hal::{ProcessorHal, ResetLine};
use crate::processor::profile::SocProfile;

/// HAL calls that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HalOp {
    /// `init`
    Init,
    /// `deinit`
    Deinit,
    /// `reset_assert`
    ResetAssert,
    /// `reset_release`
    ResetRelease,
    /// `mmu_enable`
    MmuEnable,
    /// `mmu_disable`
    MmuDisable,
    /// `add_entry`
    AddEntry,
    /// `delete_entry`
    DeleteEntry,
    /// `set_boot_address`
    SetBootAddress,
}

/// Register-level state of the modelled slave core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimHalState {
    /// Whether `init` has run without a matching `deinit`
    pub initialized: bool,
    /// Core reset line asserted
    pub core_in_reset: bool,
    /// MMU reset line asserted
    pub mmu_in_reset: bool,
    /// MMU enabled
    pub mmu_enabled: bool,
    /// Programmed MMU entries, keyed by slave virtual address
    pub tlb: BTreeMap<VirtAddr, MmuEntry>,
    /// Last boot address written
    pub boot_address: Option<u32>,
    /// Number of `add_entry` calls
    pub entries_added: usize,
    /// Number of `delete_entry` calls
    pub entries_deleted: usize,
    /// Calls that fail until cleared
    pub failing: Vec<HalOp>,
}

/// Shared view of a [`SimHal`]'s register state
#[derive(Debug, Clone, Default)]
pub struct SimHalProbe(Arc<Mutex<SimHalState>>);

impl SimHalProbe {
    /// Snapshot of the register state
    pub fn state(&self) -> SimHalState {
        self.0.lock().clone()
    }

    /// Makes `op` fail until [`SimHalProbe::clear_failures`]
    pub fn fail(&self, op: HalOp) {
        self.0.lock().failing.push(op);
    }

    /// Clears every injected failure
    pub fn clear_failures(&self) {
        self.0.lock().failing.clear();
    }
}

/// Software model of a slave core's control registers
#[derive(Debug, Default)]
pub struct SimHal {
    state: Arc<Mutex<SimHalState>>,
}

impl SimHal {
    /// Creates a powered-down core model
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a probe onto this model's state
    pub fn probe(&self) -> SimHalProbe {
        SimHalProbe(Arc::clone(&self.state))
    }

    fn step<F>(&mut self, op: HalOp, apply: F) -> Result<()>
    where
        F: FnOnce(&mut SimHalState),
    {
        let mut state = self.state.lock();
        if state.failing.contains(&op) {
            return Err(Error::BackendOperationFailed(format!("{:?} failed", op)));
        }
        apply(&mut *state);
        Ok(())
    }
}

impl MmuProgrammer for SimHal {
    fn add_entry(&mut self, entry: &MmuEntry) -> Result<()> {
        self.step(HalOp::AddEntry, |state| {
            state.tlb.insert(entry.slave_virt, *entry);
            state.entries_added += 1;
        })
    }

    fn delete_entry(&mut self, slave_virt: VirtAddr, _size: Size) -> Result<()> {
        self.step(HalOp::DeleteEntry, |state| {
            state.tlb.remove(&slave_virt);
            state.entries_deleted += 1;
        })
    }
}

impl ProcessorHal for SimHal {
    fn init(&mut self, proc_id: ProcId, profile: &SocProfile) -> Result<()> {
        log::trace!("sim: init {} as {}", proc_id, profile.name);
        self.step(HalOp::Init, |state| state.initialized = true)
    }

    fn deinit(&mut self) -> Result<()> {
        self.step(HalOp::Deinit, |state| {
            state.initialized = false;
            state.tlb.clear();
        })
    }

    fn reset_assert(&mut self, line: ResetLine) -> Result<()> {
        self.step(HalOp::ResetAssert, |state| match line {
            ResetLine::Core => state.core_in_reset = true,
            ResetLine::Mmu => state.mmu_in_reset = true,
        })
    }

    fn reset_release(&mut self, line: ResetLine) -> Result<()> {
        self.step(HalOp::ResetRelease, |state| match line {
            ResetLine::Core => state.core_in_reset = false,
            ResetLine::Mmu => state.mmu_in_reset = false,
        })
    }

    fn mmu_enable(&mut self) -> Result<()> {
        self.step(HalOp::MmuEnable, |state| state.mmu_enabled = true)
    }

    fn mmu_disable(&mut self) -> Result<()> {
        self.step(HalOp::MmuDisable, |state| state.mmu_enabled = false)
    }

    fn set_boot_address(&mut self, entry_point: u32) -> Result<()> {
        self.step(HalOp::SetBootAddress, |state| state.boot_address = Some(entry_point))
    }

    fn save_mmu_context(&mut self) -> Result<Vec<MmuEntry>> {
        let mut state = self.state.lock();
        let context = state.tlb.values().copied().collect();
        state.tlb.clear();
        Ok(context)
    }
}

/// Host allocation standing in for the physical memory shared with the slave
struct SimArena {
    base: PhysAddr,
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the arena is a plain byte buffer; concurrent access is the
// caller's responsibility exactly as it is for real shared memory.
unsafe impl Send for SimArena {}
unsafe impl Sync for SimArena {}

impl SimArena {
    fn new(base: PhysAddr, len: usize) -> Self {
        let buffer = vec![0u8; len].into_boxed_slice();
        let ptr = Box::into_raw(buffer) as *mut u8;
        Self { base, ptr, len }
    }

    fn offset(&self, phys: PhysAddr, len: Size) -> Option<usize> {
        let offset = phys.checked_sub(self.base)?;
        let end = offset.checked_add(len)?;
        (end <= self.len).then_some(offset)
    }
}

impl Drop for SimArena {
    fn drop(&mut self) {
        // SAFETY: `ptr` and `len` come from the boxed slice leaked in `new`.
        unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.ptr, self.len))) };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SimMapping {
    virt: VirtAddr,
    phys: PhysAddr,
    size: Size,
}

/// Shared view of a [`SimHostMemory`]
#[derive(Clone)]
pub struct SimHostProbe {
    arena: Arc<SimArena>,
    mappings: Arc<Mutex<Vec<SimMapping>>>,
}

impl SimHostProbe {
    /// Reads modelled physical memory
    pub fn read_phys(&self, phys: PhysAddr, len: Size) -> Result<Vec<u8>> {
        let offset = self
            .arena
            .offset(phys, len)
            .ok_or_else(|| Error::InvalidArgument(format!("{:#x} outside simulated memory", phys)))?;
        let mut bytes = vec![0u8; len];
        // SAFETY: `offset + len` was checked against the arena length.
        unsafe { ptr::copy_nonoverlapping(self.arena.ptr.add(offset), bytes.as_mut_ptr(), len) };
        Ok(bytes)
    }

    /// Writes modelled physical memory
    pub fn write_phys(&self, phys: PhysAddr, data: &[u8]) -> Result<()> {
        let offset = self
            .arena
            .offset(phys, data.len())
            .ok_or_else(|| Error::InvalidArgument(format!("{:#x} outside simulated memory", phys)))?;
        // SAFETY: `offset + data.len()` was checked against the arena length.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.arena.ptr.add(offset), data.len()) };
        Ok(())
    }

    /// Number of live host mappings
    pub fn live_mappings(&self) -> usize {
        self.mappings.lock().len()
    }
}

/// Host page mapper over a simulated physical window
pub struct SimHostMemory {
    arena: Arc<SimArena>,
    mappings: Arc<Mutex<Vec<SimMapping>>>,
}

impl SimHostMemory {
    /// Simulates `size` bytes of physical memory starting at `phys_base`
    pub fn new(phys_base: PhysAddr, size: Size) -> Self {
        Self {
            arena: Arc::new(SimArena::new(phys_base, size)),
            mappings: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns a probe onto the simulated memory
    pub fn probe(&self) -> SimHostProbe {
        SimHostProbe {
            arena: Arc::clone(&self.arena),
            mappings: Arc::clone(&self.mappings),
        }
    }
}

// SAFETY: every address handed out points into the arena, which lives as
// long as this mapper, and `virt_to_phys` only answers for such addresses.
unsafe impl HostMemory for SimHostMemory {
    fn map(&mut self, phys: PhysAddr, size: Size, _cached: bool) -> Result<VirtAddr> {
        if size == 0 {
            return Err(error::invalid_argument("zero-sized host mapping"));
        }
        let offset = self
            .arena
            .offset(phys, size)
            .ok_or_else(|| Error::MapFailed(format!("{:#x}+{:#x} outside simulated memory", phys, size)))?;
        let virt = self.arena.ptr as usize + offset;
        self.mappings.lock().push(SimMapping { virt, phys, size });
        Ok(virt)
    }

    fn unmap(&mut self, virt: VirtAddr, size: Size) -> Result<()> {
        let mut mappings = self.mappings.lock();
        let position = mappings
            .iter()
            .position(|mapping| mapping.virt == virt && mapping.size == size)
            .ok_or_else(|| Error::UnmapFailed(format!("{:#x} is not mapped", virt)))?;
        mappings.remove(position);
        Ok(())
    }

    fn virt_to_phys(&self, virt: VirtAddr) -> Result<PhysAddr> {
        self.mappings
            .lock()
            .iter()
            .find(|mapping| virt >= mapping.virt && virt - mapping.virt < mapping.size)
            .map(|mapping| mapping.phys + (virt - mapping.virt))
            .ok_or_else(|| Error::AddressTranslationFailed(format!("{:#x} is not host mapped", virt)))
    }
}

/// Counters of a [`SimPowerManager`]
#[derive(Debug, Clone, Default)]
pub struct SimPowerProbe {
    attaches: Arc<AtomicU32>,
    detaches: Arc<AtomicU32>,
}

impl SimPowerProbe {
    /// Number of successful `attach` calls
    pub fn attaches(&self) -> u32 {
        self.attaches.load(Ordering::Acquire)
    }

    /// Number of successful `detach` calls
    pub fn detaches(&self) -> u32 {
        self.detaches.load(Ordering::Acquire)
    }
}

/// Power manager that only counts calls
#[derive(Debug, Default)]
pub struct SimPowerManager {
    probe: SimPowerProbe,
    fail_attach: bool,
}

impl SimPowerManager {
    /// Creates a power manager that accepts every call
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a power manager whose `attach` always fails
    pub fn failing() -> Self {
        Self {
            fail_attach: true,
            ..Self::default()
        }
    }

    /// Returns a probe onto the call counters
    pub fn probe(&self) -> SimPowerProbe {
        self.probe.clone()
    }
}

impl PowerManager for SimPowerManager {
    fn attach(&mut self, proc_id: ProcId) -> Result<()> {
        if self.fail_attach {
            return Err(Error::BackendOperationFailed(format!("{} power domain unavailable", proc_id)));
        }
        self.probe.attaches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn detach(&mut self, _proc_id: ProcId) -> Result<()> {
        self.probe.detaches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

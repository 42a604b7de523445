//! Processor backends
//!
//! A [`ProcessorBackend`] drives one slave core: its reset lines, its MMU
//! and its translation table. [`Processor`] is the generic implementation,
//! parameterized by a [`ProcessorHal`] for register access and a
//! [`SocProfile`] for the variant's fixed memory map.

pub mod backend;
pub mod hal;
pub mod notify;
pub mod profile;

use std::time::{Duration, Instant};

use corelink_api::error::Result;
use corelink_api::{BootMode, Error, PhysAddr, ProcId, ProcState, Size, VirtAddr};
use corelink_memory_management::{AddressTable, MemoryRegion};

pub use backend::Processor;
pub use hal::{ProcessorHal, ResetLine};
pub use notify::{ListenerId, NotifyCallback, NotifyEvent, NotifyRegistry, NotifyStatus};
pub use profile::SocProfile;

/// Parameters of an attach
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachParams {
    /// How much of the slave's life the host owns
    pub boot_mode: BootMode,
    /// Resource-descriptor regions, in order
    pub resources: Vec<MemoryRegion>,
    /// Overrides the profile's MMU default when set
    pub mmu_enabled: Option<bool>,
}

impl AttachParams {
    /// Creates attach parameters for `boot_mode` with no extra resources
    pub fn new(boot_mode: BootMode) -> Self {
        Self {
            boot_mode,
            ..Self::default()
        }
    }

    /// Appends a resource-descriptor region
    pub fn with_resource(mut self, region: MemoryRegion) -> Self {
        self.resources.push(region);
        self
    }

    /// Overrides the profile's MMU default
    pub fn with_mmu(mut self, enabled: bool) -> Self {
        self.mmu_enabled = Some(enabled);
        self
    }
}

/// Profile defaults merged with one attach's overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendConfig {
    /// Boot mode in force for this attach
    pub boot_mode: BootMode,
    /// Whether the slave MMU is used
    pub mmu_enabled: bool,
    /// Whether the MMU is enabled only while the core runs
    pub mmu_follows_execution: bool,
}

impl BackendConfig {
    /// Validates `params` against `profile` and merges them
    pub fn merge(profile: &SocProfile, params: &AttachParams) -> Result<Self> {
        for region in &params.resources {
            if region.size == 0 {
                return Err(Error::InvalidArgument(format!(
                    "resource region {} is empty",
                    region.name
                )));
            }
            if let Some(fixed) = profile.static_overlap(region.slave_virt, region.size) {
                return Err(Error::InvalidArgument(format!(
                    "resource region {} overlaps static region {}",
                    region.name, fixed.name
                )));
            }
        }

        Ok(Self {
            boot_mode: params.boot_mode,
            mmu_enabled: params.mmu_enabled.unwrap_or(profile.mmu_enabled),
            mmu_follows_execution: profile.mmu_follows_execution,
        })
    }
}

/// What an attach hands back to the processor manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAttachInfo {
    /// Regions the processor manager must map on the host side
    pub regions_to_map: Vec<MemoryRegion>,
    /// Whether the slave MMU is in use for this attach
    pub mmu_enabled: bool,
}

/// One element of a scatter list handed to [`ProcessorBackend::map`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemSegment {
    /// Host physical address of the segment
    pub master_phys: PhysAddr,
    /// Segment size in bytes
    pub size: Size,
    /// Whether the segment is mapped cacheable
    pub is_cached: bool,
}

/// Backend control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Save the MMU context and hold a running core in reset
    Suspend,
    /// Restore the MMU context and release a suspended core
    Resume,
    /// Variant-specific command forwarded to the HAL
    Custom {
        /// Command code
        cmd: u32,
        /// Command argument
        arg: usize,
    },
}

/// Operations every slave-core backend provides
pub trait ProcessorBackend: Send {
    /// Processor this backend drives
    fn proc_id(&self) -> ProcId;

    /// Current lifecycle state
    fn state(&self) -> ProcState;

    /// Boot mode of the current attach, `None` while detached
    fn boot_mode(&self) -> Option<BootMode>;

    /// Negotiates the memory map and brings the hardware to its boot-mode state
    fn attach(&mut self, params: &AttachParams) -> Result<BackendAttachInfo>;

    /// Best-effort teardown of everything `attach` set up
    fn detach(&mut self) -> Result<()>;

    /// Programs the entry point and releases the core from reset
    fn start(&mut self, entry_point: VirtAddr) -> Result<()>;

    /// Holds the core in reset
    fn stop(&mut self) -> Result<()>;

    /// Copies slave memory at host virtual address `host_addr` into `buf`
    ///
    /// # Safety
    ///
    /// `host_addr..host_addr + buf.len()` must be a live host mapping.
    unsafe fn read(&mut self, host_addr: VirtAddr, buf: &mut [u8]) -> Result<usize>;

    /// Copies `data` to slave memory at host virtual address `host_addr`
    ///
    /// # Safety
    ///
    /// `host_addr..host_addr + data.len()` must be a live host mapping.
    unsafe fn write(&mut self, host_addr: VirtAddr, data: &[u8]) -> Result<usize>;

    /// Runs a control command
    fn control(&mut self, command: ControlCommand) -> Result<usize>;

    /// Maps a scatter list contiguously at slave address `dst_addr`
    fn map(&mut self, dst_addr: VirtAddr, segments: &[MemSegment]) -> Result<VirtAddr>;

    /// Drops one reference to the mapping at `addr`
    fn unmap(&mut self, addr: VirtAddr, size: Size) -> Result<()>;

    /// Translates a slave virtual address to a host physical address
    fn translate_addr(&self, slave_virt: VirtAddr) -> Result<PhysAddr>;

    /// Records that an image was loaded into, or unloaded from, the core
    fn set_loaded(&mut self, loaded: bool) -> Result<()>;

    /// Registers a one-shot state-change listener
    fn register_notify(
        &mut self,
        states: &[ProcState],
        timeout: Option<Duration>,
        callback: NotifyCallback,
    ) -> Result<ListenerId>;

    /// Removes a listener without firing it
    fn unregister_notify(&mut self, id: ListenerId) -> Result<()>;

    /// Fires `Timeout` for every listener whose deadline has passed
    fn poll_timeouts(&mut self, now: Instant) -> usize;

    /// Fires `Canceled` for every outstanding listener
    fn cancel_listeners(&mut self) -> usize;

    /// The backend's translation table
    fn address_table(&self) -> &AddressTable;
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelink_api::ErrorKind;

    #[test]
    fn test_merge_applies_override() {
        let profile = SocProfile::dsp();
        let params = AttachParams::new(BootMode::Boot).with_mmu(false);
        let config = BackendConfig::merge(&profile, &params).unwrap();
        assert!(!config.mmu_enabled);

        let config = BackendConfig::merge(&profile, &AttachParams::default()).unwrap();
        assert!(config.mmu_enabled);
    }

    #[test]
    fn test_merge_rejects_static_overlap() {
        let profile = SocProfile::dsp();
        let params = AttachParams::new(BootMode::Boot)
            .with_resource(MemoryRegion::new("clash", 0x0080_1000, 0x9000_0000, 0x1000));
        let err = BackendConfig::merge(&profile, &params).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
}

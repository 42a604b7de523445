//! Generic slave-core backend
//!
//! `Processor` owns the translation table, the listener set and the HAL of
//! one slave core, and implements the lifecycle state machine:
//!
//! ```text
//! Unknown --attach--> Reset --load--> Loaded --start--> Running <--> Suspended
//!    ^                  ^                                  |
//!    |                  +--------------stop----------------+
//!    +-----------------------------detach------------------+
//! ```

use std::ptr;
use std::time::{Duration, Instant};

use corelink_api::error::{self, ErrorContext, FirstError, Result};
use corelink_api::{BootMode, Error, PhysAddr, ProcId, ProcState, Size, VirtAddr};
use corelink_memory_management::{AddressTable, MmuEntry};

use super::hal::{hal_failed, ProcessorHal, ResetLine};
use super::notify::{ListenerId, NotifyCallback, NotifyRegistry};
use super::profile::SocProfile;
use super::{AttachParams, BackendAttachInfo, BackendConfig, ControlCommand, MemSegment, ProcessorBackend};
use crate::config::ProcMgrConfig;

/// Slave-core backend driven through a [`ProcessorHal`]
#[derive(Debug)]
pub struct Processor<H: ProcessorHal> {
    proc_id: ProcId,
    profile: SocProfile,
    hal: H,
    table: AddressTable,
    state: ProcState,
    config: Option<BackendConfig>,
    listeners: NotifyRegistry,
    saved_context: Vec<MmuEntry>,
    mmu_live: bool,
    register_write_fixup: bool,
}

impl<H: ProcessorHal> Processor<H> {
    /// Creates a detached backend for `proc_id` on the variant described by `profile`
    pub fn new(proc_id: ProcId, profile: SocProfile, hal: H, config: &ProcMgrConfig) -> Result<Self> {
        if !profile.supports(proc_id) {
            return Err(Error::InvalidArgument(format!(
                "{} is not a {} core",
                proc_id, profile.name
            )));
        }

        let table = AddressTable::new(config.address_table_capacity, &profile.static_map)?;
        log::debug!(
            "{}: {} backend created with {} static regions",
            proc_id,
            profile.name,
            profile.static_map.len()
        );

        Ok(Self {
            proc_id,
            profile,
            hal,
            table,
            state: ProcState::Unknown,
            config: None,
            listeners: NotifyRegistry::new(config.max_listeners),
            saved_context: Vec::new(),
            mmu_live: false,
            register_write_fixup: config.register_write_fixup,
        })
    }

    /// The variant profile
    pub fn profile(&self) -> &SocProfile {
        &self.profile
    }

    /// The hardware-abstraction object
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// Merged configuration of the current attach
    pub fn config(&self) -> Option<&BackendConfig> {
        self.config.as_ref()
    }

    /// Number of outstanding listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn set_state(&mut self, state: ProcState) {
        if self.state == state {
            return;
        }
        log::info!("{}: {} -> {}", self.proc_id, self.state, state);
        self.state = state;
        let fired = self.listeners.state_changed(self.proc_id, state);
        if fired > 0 {
            log::debug!("{}: {} listeners notified", self.proc_id, fired);
        }
    }

    fn attached(&self) -> Result<BackendConfig> {
        self.config
            .ok_or_else(|| Error::InvalidState(format!("{} is not attached", self.proc_id)))
    }

    fn owning_execution(&self) -> Result<BackendConfig> {
        let config = self.attached()?;
        if !config.boot_mode.owns_execution() {
            return Err(Error::InvalidState(format!(
                "{} execution is owned elsewhere ({:?})",
                self.proc_id, config.boot_mode
            )));
        }
        Ok(config)
    }

    fn enable_mmu(&mut self) -> Result<()> {
        self.hal.mmu_enable().map_err(|err| hal_failed("mmu enable", err))?;
        self.mmu_live = true;
        Ok(())
    }

    fn disable_mmu(&mut self) -> Result<()> {
        self.mmu_live = false;
        self.hal.mmu_disable().map_err(|err| hal_failed("mmu disable", err))
    }

    fn program_context(&mut self) -> Result<()> {
        for entry in self.table.mmu_context()? {
            self.hal
                .add_entry(&entry)
                .map_err(|err| Error::MapFailed(format!("{:#x}: {}", entry.slave_virt, err)))?;
        }
        Ok(())
    }

    /// Hardware bring-up part of attach; undone by `abort_attach` on failure
    fn bring_up(&mut self, config: &BackendConfig) -> Result<()> {
        self.hal
            .init(self.proc_id, &self.profile)
            .map_err(|err| hal_failed("init", err))?;

        if matches!(config.boot_mode, BootMode::Boot | BootMode::NoLoadPwr) {
            self.hal
                .reset_assert(ResetLine::Core)
                .map_err(|err| hal_failed("core reset", err))?;
        }

        if config.mmu_enabled && config.boot_mode != BootMode::NoBoot {
            self.program_context().context("static MMU context")?;
            if !config.mmu_follows_execution {
                self.enable_mmu()?;
            }
        }
        Ok(())
    }

    fn abort_attach(&mut self) {
        if self.mmu_live {
            if let Err(err) = self.disable_mmu() {
                log::warn!("{}: attach rollback: {}", self.proc_id, err);
            }
        }
        if let Err(err) = self.hal.deinit() {
            log::warn!("{}: attach rollback: {}", self.proc_id, err);
        }
        self.table.reset();
        self.table.set_mmu_enabled(false);
    }

    fn suspend(&mut self) -> Result<()> {
        let config = self.owning_execution()?;
        if self.state != ProcState::Running {
            return Err(Error::InvalidState(format!("cannot suspend {} while {}", self.proc_id, self.state)));
        }

        if config.mmu_enabled {
            self.saved_context = self
                .hal
                .save_mmu_context()
                .map_err(|err| hal_failed("save mmu context", err))?;
        }
        self.hal
            .reset_assert(ResetLine::Core)
            .map_err(|err| hal_failed("core reset", err))?;
        if config.mmu_enabled {
            self.hal
                .reset_assert(ResetLine::Mmu)
                .map_err(|err| hal_failed("mmu reset", err))?;
        }
        self.set_state(ProcState::Suspended);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        let config = self.owning_execution()?;
        if self.state != ProcState::Suspended {
            return Err(Error::InvalidState(format!("cannot resume {} while {}", self.proc_id, self.state)));
        }

        if config.mmu_enabled {
            self.hal
                .reset_release(ResetLine::Mmu)
                .map_err(|err| hal_failed("mmu reset release", err))?;
            self.hal
                .restore_mmu_context(&self.saved_context)
                .map_err(|err| hal_failed("restore mmu context", err))?;
            self.saved_context.clear();
        }
        self.hal
            .reset_release(ResetLine::Core)
            .map_err(|err| hal_failed("core reset release", err))?;
        self.set_state(ProcState::Running);
        Ok(())
    }
}

impl<H: ProcessorHal> ProcessorBackend for Processor<H> {
    fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    fn state(&self) -> ProcState {
        self.state
    }

    fn boot_mode(&self) -> Option<BootMode> {
        self.config.map(|config| config.boot_mode)
    }

    fn attach(&mut self, params: &AttachParams) -> Result<BackendAttachInfo> {
        log::debug!("{}: backend attach {:?}", self.proc_id, params.boot_mode);
        if self.config.is_some() {
            return Err(Error::InvalidState(format!("{} is already attached", self.proc_id)));
        }

        let config = BackendConfig::merge(&self.profile, params)?;
        let mut regions_to_map = Vec::new();
        for region in &params.resources {
            if region.map {
                regions_to_map.push(region.clone());
            } else if let Err(err) = self.table.add_static(region) {
                self.table.reset();
                return Err(err);
            }
        }

        self.table.set_mmu_enabled(config.mmu_enabled);
        if let Err(err) = self.bring_up(&config) {
            log::error!("{}: backend attach failed: {}", self.proc_id, err);
            self.abort_attach();
            return Err(err);
        }

        self.config = Some(config);
        let state = if config.boot_mode == BootMode::NoBoot {
            ProcState::Running
        } else {
            ProcState::Reset
        };
        self.set_state(state);

        Ok(BackendAttachInfo {
            regions_to_map,
            mmu_enabled: config.mmu_enabled,
        })
    }

    fn detach(&mut self) -> Result<()> {
        let config = self.attached()?;
        log::debug!("{}: backend detach", self.proc_id);

        let mut teardown = FirstError::new();
        if self.mmu_live {
            teardown.record(self.disable_mmu());
        }
        self.table.reset();
        self.table.set_mmu_enabled(false);
        if config.boot_mode.owns_execution() {
            teardown.record(
                self.hal
                    .reset_assert(ResetLine::Core)
                    .map_err(|err| hal_failed("core reset", err)),
            );
        }
        teardown.record(self.hal.deinit().map_err(|err| hal_failed("deinit", err)));

        self.config = None;
        self.saved_context.clear();
        self.set_state(ProcState::Unknown);

        if !teardown.is_ok() {
            log::warn!("{}: {} detach steps failed", self.proc_id, teardown.failures());
        }
        teardown.finish()
    }

    fn start(&mut self, entry_point: VirtAddr) -> Result<()> {
        log::debug!("{}: start at {:#x}", self.proc_id, entry_point);
        let config = self.owning_execution()?;
        let ready = match config.boot_mode {
            BootMode::Boot => self.state == ProcState::Loaded,
            _ => matches!(self.state, ProcState::Reset | ProcState::Loaded),
        };
        if !ready {
            return Err(Error::InvalidState(format!("cannot start {} while {}", self.proc_id, self.state)));
        }

        let entry = u32::try_from(entry_point)
            .map_err(|_| Error::InvalidArgument(format!("entry point {:#x} out of range", entry_point)))?;
        self.hal
            .set_boot_address(entry)
            .map_err(|err| hal_failed("boot address", err))?;
        if config.mmu_enabled && config.mmu_follows_execution {
            self.enable_mmu()?;
        }
        if let Err(err) = self.hal.reset_release(ResetLine::Core) {
            if config.mmu_follows_execution && self.mmu_live {
                if let Err(rollback) = self.disable_mmu() {
                    log::warn!("{}: start rollback: {}", self.proc_id, rollback);
                }
            }
            return Err(hal_failed("core reset release", err));
        }

        self.set_state(ProcState::Running);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        log::debug!("{}: stop", self.proc_id);
        let config = self.owning_execution()?;
        if !matches!(self.state, ProcState::Running | ProcState::Suspended) {
            return Err(Error::InvalidState(format!("cannot stop {} while {}", self.proc_id, self.state)));
        }

        self.hal
            .reset_assert(ResetLine::Core)
            .map_err(|err| hal_failed("core reset", err))?;
        if config.mmu_follows_execution && self.mmu_live {
            self.disable_mmu()?;
        }
        self.saved_context.clear();
        self.set_state(ProcState::Reset);
        Ok(())
    }

    unsafe fn read(&mut self, host_addr: VirtAddr, buf: &mut [u8]) -> Result<usize> {
        if host_addr == 0 {
            return Err(error::invalid_argument("null host address"));
        }
        // SAFETY: the caller guarantees the source range is a live host mapping.
        unsafe { ptr::copy_nonoverlapping(host_addr as *const u8, buf.as_mut_ptr(), buf.len()) };
        Ok(buf.len())
    }

    unsafe fn write(&mut self, host_addr: VirtAddr, data: &[u8]) -> Result<usize> {
        if host_addr == 0 {
            return Err(error::invalid_argument("null host address"));
        }
        if self.register_write_fixup && data.len() == 4 && host_addr % 4 == 0 {
            let word = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
            // SAFETY: aligned, and the caller guarantees the word is mapped.
            unsafe { ptr::write_volatile(host_addr as *mut u32, word) };
        } else {
            // SAFETY: the caller guarantees the destination range is a live host mapping.
            unsafe { ptr::copy_nonoverlapping(data.as_ptr(), host_addr as *mut u8, data.len()) };
        }
        Ok(data.len())
    }

    fn control(&mut self, command: ControlCommand) -> Result<usize> {
        log::debug!("{}: control {:?}", self.proc_id, command);
        match command {
            ControlCommand::Suspend => self.suspend().map(|_| 0),
            ControlCommand::Resume => self.resume().map(|_| 0),
            ControlCommand::Custom { cmd, arg } => {
                self.attached()?;
                self.hal.control(cmd, arg)
            }
        }
    }

    fn map(&mut self, dst_addr: VirtAddr, segments: &[MemSegment]) -> Result<VirtAddr> {
        self.attached()?;
        if segments.is_empty() {
            return Err(error::invalid_argument("empty scatter list"));
        }

        let mut slave = dst_addr;
        let mut mapped = Vec::with_capacity(segments.len());
        for segment in segments {
            let result = self
                .table
                .map_with(&mut self.hal, slave, segment.size, segment.master_phys, segment.is_cached)
                .and_then(|acquired| {
                    log::trace!("{}: map {:#x} -> {:?}", self.proc_id, slave, acquired);
                    slave
                        .checked_add(segment.size)
                        .ok_or_else(|| error::invalid_argument("scatter list wraps the address space"))
                });
            match result {
                Ok(next) => {
                    mapped.push(slave);
                    slave = next;
                }
                Err(err) => {
                    for addr in mapped.iter().rev() {
                        if let Err(rollback) = self.table.unmap_with(&mut self.hal, *addr) {
                            log::warn!("{}: map rollback at {:#x}: {}", self.proc_id, addr, rollback);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(dst_addr)
    }

    fn unmap(&mut self, addr: VirtAddr, size: Size) -> Result<()> {
        self.attached()?;
        if size == 0 {
            return Err(error::invalid_argument("zero-sized unmap"));
        }
        let released = self.table.unmap_with(&mut self.hal, addr)?;
        log::trace!("{}: unmap {:#x} -> {:?}", self.proc_id, addr, released);
        Ok(())
    }

    fn translate_addr(&self, slave_virt: VirtAddr) -> Result<PhysAddr> {
        self.table.lookup(slave_virt)
    }

    fn set_loaded(&mut self, loaded: bool) -> Result<()> {
        self.attached()?;
        match (loaded, self.state) {
            (true, ProcState::Reset) | (true, ProcState::Loaded) => self.set_state(ProcState::Loaded),
            (false, ProcState::Loaded) => self.set_state(ProcState::Reset),
            (false, ProcState::Reset) => {}
            (_, state) => {
                return Err(Error::InvalidState(format!(
                    "cannot change image of {} while {}",
                    self.proc_id, state
                )));
            }
        }
        Ok(())
    }

    fn register_notify(
        &mut self,
        states: &[ProcState],
        timeout: Option<Duration>,
        callback: NotifyCallback,
    ) -> Result<ListenerId> {
        self.listeners.register(states, timeout, callback)
    }

    fn unregister_notify(&mut self, id: ListenerId) -> Result<()> {
        self.listeners.unregister(id)
    }

    fn poll_timeouts(&mut self, now: Instant) -> usize {
        self.listeners.expire(self.proc_id, self.state, now)
    }

    fn cancel_listeners(&mut self) -> usize {
        let canceled = self.listeners.cancel_all(self.proc_id, self.state);
        if canceled > 0 {
            log::debug!("{}: {} listeners canceled", self.proc_id, canceled);
        }
        canceled
    }

    fn address_table(&self) -> &AddressTable {
        &self.table
    }
}

impl<H: ProcessorHal> Drop for Processor<H> {
    fn drop(&mut self) {
        self.cancel_listeners();
        if self.config.is_some() {
            log::warn!("{}: backend dropped while attached", self.proc_id);
            if let Err(err) = self.detach() {
                log::warn!("{}: detach on drop: {}", self.proc_id, err);
            }
        }
    }
}

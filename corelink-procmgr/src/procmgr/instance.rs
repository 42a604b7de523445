//! Per-core processor manager instance

use std::fmt;
use std::time::{Duration, Instant};

use corelink_api::error::{ErrorContext, FirstError, Result};
use corelink_api::loader::types::SectionInfo;
use corelink_api::sync::{AtomicU32, Mutex, Ordering};
use corelink_api::{
    AddrInfo, AddressSpaceKind, BootMode, Error, ErrorKind, FileId, HostMemory, LoaderCore, LoaderFile, MapMask,
    PowerManager, ProcId, ProcState, VirtAddr,
};

use super::mapped::{MappedMemEntry, MappedMemTable};
use super::spaces::AddressSpaces;
use crate::config::ProcMgrConfig;
use crate::loader::LoaderBridge;
use crate::processor::{AttachParams, ControlCommand, ListenerId, NotifyCallback, ProcessorBackend};

/// Collaborators an instance is built from
pub struct ProcMgrParts {
    /// Backend driving the slave core
    pub backend: Box<dyn ProcessorBackend>,
    /// Generic executable loader
    pub loader: Box<dyn LoaderCore>,
    /// Power manager of the core's power domain
    pub power: Box<dyn PowerManager>,
    /// Host page mapper
    pub host: Box<dyn HostMemory>,
}

/// Parameters of a start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartParams {
    /// Entry point used when the host did not load the image itself
    pub entry_point: VirtAddr,
}

/// Snapshot of an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    /// Processor id
    pub proc_id: ProcId,
    /// Boot mode of the current attach
    pub boot_mode: Option<BootMode>,
    /// Lifecycle state
    pub state: ProcState,
    /// Number of outstanding attaches
    pub attach_count: u32,
    /// Most recently loaded image
    pub loaded_file: Option<FileId>,
    /// Mappings recorded on the core's behalf
    pub mapped: Vec<MappedMemEntry>,
}

struct InstanceInner {
    backend: Box<dyn ProcessorBackend>,
    loader: LoaderBridge,
    power: Box<dyn PowerManager>,
    host: Box<dyn HostMemory>,
    mapped: MappedMemTable,
    file_id: Option<FileId>,
}

impl InstanceInner {
    fn spaces(&mut self) -> AddressSpaces<'_> {
        AddressSpaces::new(&mut *self.backend, &mut *self.host, &mut self.mapped)
    }

    fn attach_chain(&mut self, proc_id: ProcId, params: &AttachParams) -> Result<()> {
        self.power.attach(proc_id).context("power manager attach")?;

        let info = match self.backend.attach(params) {
            Ok(info) => info,
            Err(err) => {
                if let Err(rollback) = self.power.detach(proc_id) {
                    log::warn!("{}: attach rollback: {}", proc_id, rollback);
                }
                return Err(err);
            }
        };

        let mut result = Ok(());
        for region in &info.regions_to_map {
            let mut addr = AddrInfo::new(region.size, region.is_cached)
                .with(AddressSpaceKind::MasterPhysical, region.master_phys)
                .with(AddressSpaceKind::SlaveVirtual, region.slave_virt);
            result = self
                .spaces()
                .map(
                    MapMask::HOST_KERNEL_VIRTUAL | MapMask::SLAVE_VIRTUAL,
                    &mut addr,
                    AddressSpaceKind::MasterPhysical,
                )
                .context(&region.name);
            if result.is_err() {
                break;
            }
        }
        if result.is_ok() {
            result = self.loader.attach();
        }

        if let Err(err) = result {
            self.rollback_attach(proc_id);
            return Err(err);
        }
        Ok(())
    }

    fn rollback_attach(&mut self, proc_id: ProcId) {
        let steps = [
            self.spaces().unmap_all(),
            self.backend.detach(),
            self.power.detach(proc_id),
        ];
        for step in steps {
            if let Err(err) = step {
                log::warn!("{}: attach rollback: {}", proc_id, err);
            }
        }
    }

    fn detach_chain(&mut self, proc_id: ProcId) -> Result<()> {
        let mut teardown = FirstError::new();
        teardown.record(self.loader.detach());
        teardown.record(self.spaces().unmap_all());
        teardown.record(self.backend.detach());
        teardown.record(self.power.detach(proc_id).context("power manager detach"));
        self.file_id = None;
        if !teardown.is_ok() {
            log::warn!("{}: {} detach steps failed", proc_id, teardown.failures());
        }
        teardown.finish()
    }

    fn read_section(&mut self, section: SectionInfo) -> Result<Vec<u8>> {
        let mut data = vec![0u8; section.size];
        if data.is_empty() {
            return Ok(data);
        }

        let mut spaces = self.spaces();
        match spaces.read(section.addr, &mut data) {
            Ok(_) => return Ok(data),
            Err(err) if err.kind() == ErrorKind::AddressTranslationFailed => {}
            Err(err) => return Err(err),
        }

        // Not host mapped: map the section for the duration of the read.
        let phys = spaces.translate(section.addr, AddressSpaceKind::SlaveVirtual, AddressSpaceKind::MasterPhysical)?;
        let mut info = AddrInfo::new(section.size, false)
            .with(AddressSpaceKind::MasterPhysical, phys)
            .with(AddressSpaceKind::SlaveVirtual, section.addr);
        let both = MapMask::HOST_KERNEL_VIRTUAL | MapMask::SLAVE_VIRTUAL;
        spaces.map(both, &mut info, AddressSpaceKind::MasterPhysical)?;
        let read = spaces.read(section.addr, &mut data);
        let unmapped = spaces.unmap(both, &info, AddressSpaceKind::MasterPhysical);
        read?;
        unmapped?;
        Ok(data)
    }
}

/// Processor manager state of one slave core
pub struct ProcMgrInstance {
    proc_id: ProcId,
    attach_count: AtomicU32,
    inner: Mutex<InstanceInner>,
}

impl ProcMgrInstance {
    pub(crate) fn new(proc_id: ProcId, parts: ProcMgrParts, config: &ProcMgrConfig) -> Self {
        Self {
            proc_id,
            attach_count: AtomicU32::new(0),
            inner: Mutex::new(InstanceInner {
                backend: parts.backend,
                loader: LoaderBridge::new(parts.loader, config.max_load_args),
                power: parts.power,
                host: parts.host,
                mapped: MappedMemTable::new(config.max_mapped_entries),
                file_id: None,
            }),
        }
    }

    /// Processor this instance manages
    pub fn proc_id(&self) -> ProcId {
        self.proc_id
    }

    /// Number of outstanding attaches
    pub fn attach_count(&self) -> u32 {
        self.attach_count.load(Ordering::Acquire)
    }

    /// Returns true while at least one attach is outstanding
    pub fn is_attached(&self) -> bool {
        self.attach_count() > 0
    }

    fn require_attached(&self) -> Result<()> {
        if self.is_attached() {
            Ok(())
        } else {
            Err(Error::InvalidState(format!("{} is not attached", self.proc_id)))
        }
    }

    /// Attaches to the core.
    ///
    /// Reentrant: only the first of any number of nested or concurrent
    /// callers powers, attaches and maps the core; the others return once
    /// that has happened. A failed first attach leaves the count at zero.
    pub fn attach(&self, params: &AttachParams) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.attach_count.fetch_add(1, Ordering::AcqRel) > 0 {
            log::debug!("{}: nested attach ({})", self.proc_id, self.attach_count());
            return Ok(());
        }

        log::debug!("{}: attach {:?}", self.proc_id, params.boot_mode);
        match inner.attach_chain(self.proc_id, params) {
            Ok(()) => {
                log::info!("{}: attached", self.proc_id);
                Ok(())
            }
            Err(err) => {
                self.attach_count.fetch_sub(1, Ordering::AcqRel);
                log::error!("{}: attach failed: {}", self.proc_id, err);
                Err(err)
            }
        }
    }

    /// Drops one attach; the last one tears everything down, best effort
    pub fn detach(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let count = self.attach_count.load(Ordering::Acquire);
        if count == 0 {
            return Err(Error::InvalidState(format!("{} is not attached", self.proc_id)));
        }
        self.attach_count.store(count - 1, Ordering::Release);
        if count > 1 {
            log::debug!("{}: nested detach ({})", self.proc_id, count - 1);
            return Ok(());
        }

        let result = inner.detach_chain(self.proc_id);
        log::info!("{}: detached", self.proc_id);
        result
    }

    /// Loads the image at `path` into the core
    pub fn load(&self, path: &str, argv: &[String]) -> Result<FileId> {
        self.load_with(path, argv, |loader, spaces| loader.load(path, argv, spaces))
    }

    /// Loads an image from an already-open file
    pub fn load_file(&self, name: &str, file: Box<dyn LoaderFile>, argv: &[String]) -> Result<FileId> {
        self.load_with(name, argv, |loader, spaces| loader.load_file(name, file, argv, spaces))
    }

    fn load_with<F>(&self, name: &str, argv: &[String], load: F) -> Result<FileId>
    where
        F: FnOnce(&mut LoaderBridge, &mut AddressSpaces<'_>) -> Result<FileId>,
    {
        log::debug!("{}: load {} with {} args", self.proc_id, name, argv.len());
        let mut inner = self.inner.lock();
        self.require_attached()?;

        let mode = inner.backend.boot_mode().unwrap_or_default();
        if !mode.loads_image() {
            return Err(Error::InvalidState(format!("{:?} does not load images", mode)));
        }
        let state = inner.backend.state();
        if state != ProcState::Reset {
            return Err(Error::InvalidState(format!("cannot load into {} while {}", self.proc_id, state)));
        }

        let InstanceInner {
            backend,
            loader,
            host,
            mapped,
            ..
        } = &mut *inner;
        let mut spaces = AddressSpaces::new(&mut **backend, &mut **host, mapped);
        let file_id = load(loader, &mut spaces)?;

        inner.backend.set_loaded(true)?;
        inner.file_id = Some(file_id);
        Ok(file_id)
    }

    /// Unloads a loaded image
    pub fn unload(&self, file_id: FileId) -> Result<()> {
        log::debug!("{}: unload file {}", self.proc_id, file_id);
        let mut inner = self.inner.lock();
        self.require_attached()?;
        let state = inner.backend.state();
        if matches!(state, ProcState::Running | ProcState::Suspended) {
            return Err(Error::InvalidState(format!("cannot unload from {} while {}", self.proc_id, state)));
        }

        let InstanceInner {
            backend,
            loader,
            host,
            mapped,
            ..
        } = &mut *inner;
        let mut spaces = AddressSpaces::new(&mut **backend, &mut **host, mapped);
        loader.unload(file_id, &mut spaces)?;

        if inner.file_id == Some(file_id) {
            inner.file_id = None;
            inner.backend.set_loaded(false)?;
        }
        Ok(())
    }

    /// Starts the core, at the loaded image's entry point in `Boot` mode
    pub fn start(&self, params: &StartParams) -> Result<()> {
        let mut inner = self.inner.lock();
        self.require_attached()?;

        let mode = inner.backend.boot_mode().unwrap_or_default();
        let entry_point = if mode.loads_image() {
            let file_id = inner
                .file_id
                .ok_or_else(|| Error::InvalidState(format!("no image loaded on {}", self.proc_id)))?;
            inner.loader.entry_point(file_id)?
        } else {
            params.entry_point
        };
        inner.backend.start(entry_point)
    }

    /// Stops the core
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        inner.backend.stop()
    }

    /// Runs a backend control command
    pub fn control(&self, command: ControlCommand) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        inner.backend.control(command)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcState {
        self.inner.lock().backend.state()
    }

    /// Most recently loaded image
    pub fn loaded_file_id(&self) -> Option<FileId> {
        self.inner.lock().file_id
    }

    /// Snapshot of the instance
    pub fn proc_info(&self) -> ProcInfo {
        let inner = self.inner.lock();
        ProcInfo {
            proc_id: self.proc_id,
            boot_mode: inner.backend.boot_mode(),
            state: inner.backend.state(),
            attach_count: self.attach_count(),
            loaded_file: inner.file_id,
            mapped: inner.mapped.iter().map(|(_, entry)| *entry).collect(),
        }
    }

    /// Maps a region into the spaces in `map_type`; see [`AddressSpaces::map`]
    pub fn map(&self, map_type: MapMask, info: &mut AddrInfo, src: AddressSpaceKind) -> Result<()> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        inner.spaces().map(map_type, info, src)
    }

    /// Unmaps a region from the spaces in `map_type`; see [`AddressSpaces::unmap`]
    pub fn unmap(&self, map_type: MapMask, info: &AddrInfo, src: AddressSpaceKind) -> Result<()> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        inner.spaces().unmap(map_type, info, src)
    }

    /// Translates an address between address spaces
    pub fn translate(&self, addr: usize, src: AddressSpaceKind, dst: AddressSpaceKind) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        inner.spaces().translate(addr, src, dst)
    }

    /// Reads host-mapped slave memory
    pub fn read(&self, slave_addr: VirtAddr, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        inner.spaces().read(slave_addr, buf)
    }

    /// Writes host-mapped slave memory
    pub fn write(&self, slave_addr: VirtAddr, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        inner.spaces().write(slave_addr, data)
    }

    /// Address of a symbol in a loaded image
    pub fn symbol_address(&self, file_id: FileId, name: &str) -> Result<VirtAddr> {
        self.inner.lock().loader.symbol_address(file_id, name)
    }

    /// Address and size of a section in a loaded image
    pub fn section_info(&self, file_id: FileId, name: &str) -> Result<SectionInfo> {
        self.inner.lock().loader.section_info(file_id, name)
    }

    /// Contents of a section in a loaded image, read from slave memory
    pub fn section_data(&self, file_id: FileId, name: &str) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        self.require_attached()?;
        let section = inner.loader.section_info(file_id, name)?;
        inner.read_section(section)
    }

    /// Registers a one-shot state-change listener
    pub fn register_notify(
        &self,
        states: &[ProcState],
        timeout: Option<Duration>,
        callback: NotifyCallback,
    ) -> Result<ListenerId> {
        self.inner.lock().backend.register_notify(states, timeout, callback)
    }

    /// Removes a listener without firing it
    pub fn unregister_notify(&self, id: ListenerId) -> Result<()> {
        self.inner.lock().backend.unregister_notify(id)
    }

    /// Fires `Timeout` for every listener whose deadline has passed
    pub fn poll_timeouts(&self, now: Instant) -> usize {
        self.inner.lock().backend.poll_timeouts(now)
    }

    pub(crate) fn cancel_listeners(&self) -> usize {
        self.inner.lock().backend.cancel_listeners()
    }

    /// Detaches until no attach is outstanding, returning the first failure
    pub(crate) fn force_detach(&self) -> Result<()> {
        let mut teardown = FirstError::new();
        while self.is_attached() {
            teardown.record(self.detach());
        }
        teardown.finish()
    }
}

impl fmt::Debug for ProcMgrInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcMgrInstance")
            .field("proc_id", &self.proc_id)
            .field("attach_count", &self.attach_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(ProcMgrInstance: Send, Sync);

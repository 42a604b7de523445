//! Core types used throughout the corelink control plane

use core::fmt;

/// Physical address type
pub type PhysAddr = usize;

/// Virtual address type (host or slave side)
pub type VirtAddr = usize;

/// Size type
pub type Size = usize;

/// Identifier handed out by the loader for a loaded executable
pub type FileId = u32;

/// Number of slave cores a single control plane can manage
pub const MAX_PROCESSORS: u16 = 8;

/// Stable small integer naming one of the known slave cores
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcId(u16);

impl ProcId {
    /// Creates a processor id, rejecting values outside the known range
    pub fn new(id: u16) -> crate::error::Result<Self> {
        if id >= MAX_PROCESSORS {
            return Err(crate::error::invalid_argument("processor id out of range"));
        }
        Ok(Self(id))
    }

    /// Returns the raw id
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the raw id as a table index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc{}", self.0)
    }
}

/// The address spaces an address can be expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpaceKind {
    /// Host kernel virtual address
    MasterKernelVirtual,
    /// Host user virtual address
    MasterUserVirtual,
    /// Host physical address
    MasterPhysical,
    /// Slave virtual address (behind the slave MMU)
    SlaveVirtual,
    /// Slave physical address
    SlavePhysical,
}

impl AddressSpaceKind {
    /// Number of address-space kinds
    pub const COUNT: usize = 5;

    /// All kinds, in index order
    pub const ALL: [AddressSpaceKind; Self::COUNT] = [
        AddressSpaceKind::MasterKernelVirtual,
        AddressSpaceKind::MasterUserVirtual,
        AddressSpaceKind::MasterPhysical,
        AddressSpaceKind::SlaveVirtual,
        AddressSpaceKind::SlavePhysical,
    ];

    /// Index of this kind in per-kind address arrays
    pub const fn index(self) -> usize {
        match self {
            AddressSpaceKind::MasterKernelVirtual => 0,
            AddressSpaceKind::MasterUserVirtual => 1,
            AddressSpaceKind::MasterPhysical => 2,
            AddressSpaceKind::SlaveVirtual => 3,
            AddressSpaceKind::SlavePhysical => 4,
        }
    }

    /// Returns true for the virtual kinds backed by a mapping
    pub const fn is_virtual(self) -> bool {
        matches!(
            self,
            AddressSpaceKind::MasterKernelVirtual
                | AddressSpaceKind::MasterUserVirtual
                | AddressSpaceKind::SlaveVirtual
        )
    }
}

bitflags::bitflags! {
    /// Address spaces currently backing a mapped region
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapMask: u32 {
        /// Region is mapped into the host kernel's virtual space
        const HOST_KERNEL_VIRTUAL = 0b0000_0001;
        /// Region is mapped into the slave's virtual space
        const SLAVE_VIRTUAL = 0b0000_0010;
    }
}

impl MapMask {
    /// Returns the mask bit backing `kind`, empty for kinds without one
    pub const fn from_kind(kind: AddressSpaceKind) -> MapMask {
        match kind {
            AddressSpaceKind::MasterKernelVirtual => MapMask::HOST_KERNEL_VIRTUAL,
            AddressSpaceKind::SlaveVirtual => MapMask::SLAVE_VIRTUAL,
            _ => MapMask::empty(),
        }
    }
}

/// Policy controlling how much of the slave's life this host owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BootMode {
    /// Host powers, resets, loads and starts the slave
    #[default]
    Boot,
    /// Image is preloaded; host powers and starts the slave
    NoLoadPwr,
    /// Image is preloaded and power is handled elsewhere; host starts the slave
    NoLoadNoPwr,
    /// Slave is already running and owned by someone else
    NoBoot,
}

impl BootMode {
    /// Returns true if this host owns the slave's execution (start/stop)
    pub const fn owns_execution(self) -> bool {
        !matches!(self, BootMode::NoBoot)
    }

    /// Returns true if this host loads the executable image
    pub const fn loads_image(self) -> bool {
        matches!(self, BootMode::Boot)
    }
}

/// Lifecycle state of a slave processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcState {
    /// Not attached, or state not known
    #[default]
    Unknown,
    /// Held in hardware reset
    Reset,
    /// Held in reset with an executable image loaded
    Loaded,
    /// Released from reset and executing
    Running,
    /// Context saved and held in reset, resumable
    Suspended,
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcState::Unknown => "unknown",
            ProcState::Reset => "reset",
            ProcState::Loaded => "loaded",
            ProcState::Running => "running",
            ProcState::Suspended => "suspended",
        };
        f.write_str(name)
    }
}

/// Address of one region expressed in every address space it is known in.
///
/// Kinds the region has no address in are `None`; no real address is
/// reserved as an "unset" marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrInfo {
    addrs: [Option<usize>; AddressSpaceKind::COUNT],
    /// Region size in bytes
    pub size: Size,
    /// Whether the region is mapped cacheable
    pub is_cached: bool,
}

impl AddrInfo {
    /// Creates an address record with no addresses set
    pub const fn new(size: Size, is_cached: bool) -> Self {
        Self {
            addrs: [None; AddressSpaceKind::COUNT],
            size,
            is_cached,
        }
    }

    /// Builder-style setter for one address
    pub const fn with(mut self, kind: AddressSpaceKind, addr: usize) -> Self {
        self.addrs[kind.index()] = Some(addr);
        self
    }

    /// Returns the address in `kind`, if known
    pub const fn addr(&self, kind: AddressSpaceKind) -> Option<usize> {
        self.addrs[kind.index()]
    }

    /// Sets the address in `kind`
    pub fn set_addr(&mut self, kind: AddressSpaceKind, addr: usize) {
        self.addrs[kind.index()] = Some(addr);
    }

    /// Forgets the address in `kind`
    pub fn clear_addr(&mut self, kind: AddressSpaceKind) {
        self.addrs[kind.index()] = None;
    }

    /// Returns true if `addr` in `kind` falls inside this region
    pub fn contains(&self, kind: AddressSpaceKind, addr: usize) -> bool {
        match self.addr(kind) {
            Some(base) => addr >= base && addr - base < self.size,
            None => false,
        }
    }

    /// Returns true if `[addr, addr + len)` in `kind` lies inside this region
    pub fn contains_range(&self, kind: AddressSpaceKind, addr: usize, len: Size) -> bool {
        match self.addr(kind) {
            Some(base) => addr >= base && len <= self.size && addr - base <= self.size - len,
            None => false,
        }
    }

    /// Translates `addr` from `src` to `dst` by base plus offset
    pub fn translate(&self, src: AddressSpaceKind, addr: usize, dst: AddressSpaceKind) -> Option<usize> {
        if !self.contains(src, addr) {
            return None;
        }
        let src_base = self.addr(src)?;
        let dst_base = self.addr(dst)?;
        dst_base.checked_add(addr - src_base)
    }
}

static_assertions::assert_eq_size!(ProcId, u16);

//! SoC variant profiles
//!
//! The DSP, DSP-with-shared-L2 and IPU backends differ only in their valid
//! processor ids, their boot-time memory map and how they treat the slave
//! MMU around start/stop. Each is one `SocProfile` value driving the same
//! generic [`Processor`](super::backend::Processor).

use corelink_api::ProcId;
use corelink_memory_management::MemoryRegion;

/// Static description of one SoC backend variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocProfile {
    /// Variant name for diagnostics
    pub name: &'static str,
    /// Processor ids this variant can drive
    pub proc_ids: &'static [u16],
    /// Boot-time regions, folded into every backend's translation table
    pub static_map: Vec<MemoryRegion>,
    /// Whether the slave MMU is used unless an attach overrides it
    pub mmu_enabled: bool,
    /// Enable the MMU at `start` and disable it at `stop` instead of at attach/detach
    pub mmu_follows_execution: bool,
}

impl SocProfile {
    /// C64x+ style DSP: internal L2/L1 memories at fixed slave addresses
    pub fn dsp() -> Self {
        Self {
            name: "dsp",
            proc_ids: &[1],
            static_map: vec![
                MemoryRegion::new("L2RAM", 0x0080_0000, 0x4080_0000, 0x0004_0000),
                MemoryRegion::new("L1PRAM", 0x00e0_0000, 0x40e0_0000, 0x0000_8000),
                MemoryRegion::new("L1DRAM", 0x00f0_0000, 0x40f0_0000, 0x0000_8000),
            ],
            mmu_enabled: true,
            mmu_follows_execution: false,
        }
    }

    /// DSP variant that additionally sees the shared L2 RAM window
    pub fn dsp_with_l2() -> Self {
        let mut profile = Self::dsp();
        profile.name = "dsp-l2";
        profile
            .static_map
            .push(MemoryRegion::new("SL2RAM", 0x5c00_0000, 0x5c00_0000, 0x0010_0000).cached());
        profile
    }

    /// Cortex-M style IPU: two cores sharing one MMU that is live only while running
    pub fn ipu() -> Self {
        Self {
            name: "ipu",
            proc_ids: &[2, 3],
            static_map: vec![
                MemoryRegion::new("L2ROM", 0x0000_0000, 0x5500_0000, 0x0000_4000),
                MemoryRegion::new("L2RAM", 0x2000_0000, 0x5502_0000, 0x0001_0000),
            ],
            mmu_enabled: true,
            mmu_follows_execution: true,
        }
    }

    /// Every variant shipped with the crate
    pub fn builtin() -> [SocProfile; 3] {
        [Self::dsp(), Self::dsp_with_l2(), Self::ipu()]
    }

    /// Returns true if this variant can drive `proc_id`
    pub fn supports(&self, proc_id: ProcId) -> bool {
        self.proc_ids.contains(&proc_id.as_u16())
    }

    /// Returns the static region overlapping `[addr, addr + len)`, if any
    pub fn static_overlap(&self, addr: usize, len: usize) -> Option<&MemoryRegion> {
        self.static_map.iter().find(|region| region.overlaps(addr, len))
    }
}

//! Loader contract types

use alloc::vec::Vec;
use crate::core::types::{PhysAddr, Size, VirtAddr};

/// Origin of a loader file seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    /// Absolute offset from the start of the file
    Start,
    /// Offset relative to the current position
    Current,
    /// Offset relative to the end of the file
    End,
}

/// Handle the loader core assigns to a loaded module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleHandle(pub u32);

/// Target memory request passed to the allocation callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRequest {
    /// Slave address the executable's layout fixes for this region
    pub target_addr: VirtAddr,
    /// Region size in bytes
    pub size: Size,
    /// Required alignment in bytes
    pub align: Size,
}

/// Host mapping held for a segment between `copy` and `write`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMapping {
    /// Host kernel virtual address of the mapped slave memory
    pub host_virt: VirtAddr,
    /// Host physical address backing the segment
    pub phys: PhysAddr,
    /// Mapped size in bytes
    pub size: Size,
}

/// One loadable segment of an executable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSegment {
    /// Slave virtual address the segment is linked at
    pub target_addr: VirtAddr,
    /// Offset of the file-backed bytes in the image
    pub file_offset: u64,
    /// Number of file-backed bytes
    pub file_size: Size,
    /// Size of the segment in slave memory (file bytes plus zeroed tail)
    pub mem_size: Size,
    /// Host buffer holding the segment contents, relocated in place
    pub contents: Vec<u8>,
    /// Host mapping of the target memory, while one is held
    pub mapping: Option<SegmentMapping>,
}

impl TargetSegment {
    /// Creates a segment description with no staged contents
    pub fn new(target_addr: VirtAddr, file_offset: u64, file_size: Size, mem_size: Size) -> Self {
        Self {
            target_addr,
            file_offset,
            file_size,
            mem_size,
            contents: Vec::new(),
            mapping: None,
        }
    }
}

/// Address and size of a named section of a loaded image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo {
    /// Slave address of the first byte of the section
    pub addr: VirtAddr,
    /// Section size in bytes
    pub size: Size,
}

//! Loader interfaces

use alloc::string::String;
use alloc::vec::Vec;

use crate::core::types::{AddrInfo, AddressSpaceKind, MapMask, Size, VirtAddr};
use crate::error::Result;
use crate::loader::types::{ModuleHandle, SeekOrigin, TargetRequest, TargetSegment};

/// An open executable image
pub trait LoaderFile: Send {
    /// Moves the file position, returning the new absolute position
    fn seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64>;

    /// Returns the current absolute position
    fn tell(&mut self) -> Result<u64>;

    /// Reads up to `count` records of `record_size` bytes into `buf`,
    /// returning the number of whole records read
    fn read(&mut self, buf: &mut [u8], record_size: Size, count: usize) -> Result<usize>;

    /// Closes the file; further calls fail
    fn close(&mut self) -> Result<()>;
}

/// Callback table the generic loader core drives during a load or unload
pub trait LoaderClient {
    /// Seeks the image being loaded
    fn file_seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64>;

    /// Returns the position in the image being loaded
    fn file_tell(&mut self) -> Result<u64>;

    /// Reads fixed-size records from the image being loaded
    fn file_read(&mut self, buf: &mut [u8], record_size: Size, count: usize) -> Result<usize>;

    /// Closes the image being loaded
    fn file_close(&mut self) -> Result<()>;

    /// Allocates zeroed host memory for loader bookkeeping
    fn host_alloc(&mut self, size: Size) -> Result<Vec<u8>>;

    /// Releases memory obtained from `host_alloc`
    fn host_free(&mut self, buffer: Vec<u8>);

    /// Reserves target memory for a region of the executable
    fn target_allocate(&mut self, request: &mut TargetRequest) -> Result<()>;

    /// Releases a target memory reservation
    fn target_free(&mut self, request: &TargetRequest) -> Result<()>;

    /// Stages a segment: maps its target memory and fills its host buffer
    fn copy(&mut self, segment: &mut TargetSegment) -> Result<()>;

    /// Writes a relocated segment to slave memory and drops its host mapping
    fn write(&mut self, segment: &mut TargetSegment) -> Result<()>;

    /// Maps a region into the spaces named by `map_type`
    fn map(&mut self, map_type: MapMask, info: &mut AddrInfo, src: AddressSpaceKind) -> Result<()>;

    /// Unmaps a region from the spaces named by `map_type`
    fn unmap(&mut self, map_type: MapMask, info: &AddrInfo, src: AddressSpaceKind) -> Result<()>;

    /// Translates an address between address spaces
    fn translate(&mut self, addr: VirtAddr, src: AddressSpaceKind, dst: AddressSpaceKind) -> Result<usize>;

    /// Loads a module the executable depends on
    fn load_dependent(&mut self, name: &str) -> Result<ModuleHandle>;

    /// Unloads a module loaded by `load_dependent`
    fn unload_dependent(&mut self, module: ModuleHandle) -> Result<()>;
}

/// The generic relocating executable loader
pub trait LoaderCore: Send {
    /// Loads the image reachable through `client`, returning its module handle
    fn load(&mut self, client: &mut dyn LoaderClient, argv: &[String]) -> Result<ModuleHandle>;

    /// Unloads a module previously returned by `load`
    fn unload(&mut self, client: &mut dyn LoaderClient, module: ModuleHandle) -> Result<()>;

    /// Entry point of a loaded module
    fn entry_point(&self, module: ModuleHandle) -> Option<VirtAddr>;

    /// Address of a symbol exported by a loaded module
    fn symbol_address(&self, module: ModuleHandle, name: &str) -> Option<VirtAddr>;
}

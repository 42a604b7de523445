//! Adapter between the generic loader core and the slave memory model

use std::fmt;

use hashbrown::HashMap;

use corelink_api::error::{self, Result};
use corelink_api::loader::types::{ModuleHandle, SectionInfo, SeekOrigin, SegmentMapping, TargetRequest, TargetSegment};
use corelink_api::{
    AddrInfo, AddressSpaceKind, Error, FileId, LoaderClient, LoaderCore, LoaderFile, MapMask, Size, VirtAddr,
};

use super::file::ImageFile;
use crate::procmgr::spaces::AddressSpaces;

/// Suffix of the symbol marking the first byte of a section
pub const SECTION_START_SUFFIX: &str = "_Start";
/// Suffix of the symbol marking the end of a section
pub const SECTION_END_SUFFIX: &str = "_End";

/// Mapping a segment needs to be written through
const SEGMENT_MAP: MapMask = MapMask::HOST_KERNEL_VIRTUAL.union(MapMask::SLAVE_VIRTUAL);

#[derive(Debug, Clone)]
struct LoadedImage {
    name: String,
    module: ModuleHandle,
}

/// Loader state of one processor instance
pub struct LoaderBridge {
    core: Box<dyn LoaderCore>,
    attached: bool,
    images: HashMap<FileId, LoadedImage>,
    next_file_id: FileId,
    max_args: usize,
}

impl LoaderBridge {
    /// Wraps `core`, accepting at most `max_args` load arguments
    pub fn new(core: Box<dyn LoaderCore>, max_args: usize) -> Self {
        Self {
            core,
            attached: false,
            images: HashMap::new(),
            next_file_id: 1,
            max_args,
        }
    }

    /// Makes the bridge ready to load
    pub fn attach(&mut self) -> Result<()> {
        if self.attached {
            return Err(error::invalid_state("loader already attached"));
        }
        self.attached = true;
        Ok(())
    }

    /// Forgets every loaded image; the slave memory they occupied is gone with the attach
    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            return Err(error::invalid_state("loader not attached"));
        }
        if !self.images.is_empty() {
            log::debug!("loader: dropping {} loaded images on detach", self.images.len());
        }
        self.images.clear();
        self.attached = false;
        Ok(())
    }

    /// Returns true between `attach` and `detach`
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Loads the image at `path` from the host filesystem
    pub fn load(&mut self, path: &str, argv: &[String], spaces: &mut AddressSpaces<'_>) -> Result<FileId> {
        let file = ImageFile::open(path).map_err(Error::into_load_failed)?;
        self.load_file(path, Box::new(file), argv, spaces)
    }

    /// Loads an image from an already-open file
    pub fn load_file(
        &mut self,
        name: &str,
        file: Box<dyn LoaderFile>,
        argv: &[String],
        spaces: &mut AddressSpaces<'_>,
    ) -> Result<FileId> {
        if !self.attached {
            return Err(error::invalid_state("loader not attached"));
        }
        if argv.len() > self.max_args {
            return Err(Error::InvalidArgument(format!(
                "{} load arguments, at most {} allowed",
                argv.len(),
                self.max_args
            )));
        }
        log::debug!("{}: loading {}", spaces.proc_id(), name);

        let mut session = LoadSession::new(Some(file), spaces);
        let loaded = self.core.load(&mut session, argv);
        let closed = session.close();
        let module = loaded.map_err(|err| {
            log::error!("{}: load of {} failed: {}", session.spaces.proc_id(), name, err);
            err.into_load_failed()
        })?;
        if let Err(err) = closed {
            log::warn!("{}: closing {}: {}", session.spaces.proc_id(), name, err);
        }

        let file_id = self.next_file_id;
        self.next_file_id = self.next_file_id.wrapping_add(1).max(1);
        self.images.insert(
            file_id,
            LoadedImage {
                name: name.to_string(),
                module,
            },
        );
        log::info!("{}: loaded {} as file {}", session.spaces.proc_id(), name, file_id);
        Ok(file_id)
    }

    /// Unloads a loaded image
    pub fn unload(&mut self, file_id: FileId, spaces: &mut AddressSpaces<'_>) -> Result<()> {
        let image = self.image(file_id)?.clone();
        log::debug!("{}: unloading {}", spaces.proc_id(), image.name);

        let mut session = LoadSession::new(None, spaces);
        self.core
            .unload(&mut session, image.module)
            .map_err(Error::into_unload_failed)?;
        self.images.remove(&file_id);
        Ok(())
    }

    /// Entry point of a loaded image
    pub fn entry_point(&self, file_id: FileId) -> Result<VirtAddr> {
        let image = self.image(file_id)?;
        self.core
            .entry_point(image.module)
            .ok_or_else(|| Error::HandleNotFound(format!("{} has no entry point", image.name)))
    }

    /// Address of a symbol exported by a loaded image
    pub fn symbol_address(&self, file_id: FileId, name: &str) -> Result<VirtAddr> {
        let image = self.image(file_id)?;
        self.core
            .symbol_address(image.module, name)
            .ok_or_else(|| Error::HandleNotFound(format!("symbol {} in {}", name, image.name)))
    }

    /// Address and size of a section, from its `<name>_Start`/`<name>_End` symbols
    pub fn section_info(&self, file_id: FileId, name: &str) -> Result<SectionInfo> {
        let start = self.symbol_address(file_id, &format!("{}{}", name, SECTION_START_SUFFIX))?;
        let end = self.symbol_address(file_id, &format!("{}{}", name, SECTION_END_SUFFIX))?;
        if end < start {
            return Err(Error::InvalidState(format!(
                "section {} ends at {:#x} before it starts at {:#x}",
                name, end, start
            )));
        }
        Ok(SectionInfo {
            addr: start,
            size: end - start,
        })
    }

    /// Ids of every loaded image
    pub fn loaded_files(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self.images.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn image(&self, file_id: FileId) -> Result<&LoadedImage> {
        self.images
            .get(&file_id)
            .ok_or_else(|| Error::HandleNotFound(format!("file {}", file_id)))
    }
}

impl fmt::Debug for LoaderBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderBridge")
            .field("attached", &self.attached)
            .field("images", &self.images)
            .finish()
    }
}

/// Callback table handed to the loader core for one load or unload
pub struct LoadSession<'a, 's> {
    file: Option<Box<dyn LoaderFile>>,
    spaces: &'a mut AddressSpaces<'s>,
}

impl<'a, 's> LoadSession<'a, 's> {
    fn new(file: Option<Box<dyn LoaderFile>>, spaces: &'a mut AddressSpaces<'s>) -> Self {
        Self { file, spaces }
    }

    fn file(&mut self) -> Result<&mut Box<dyn LoaderFile>> {
        self.file
            .as_mut()
            .ok_or_else(|| error::invalid_state("no image file open"))
    }

    fn close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(mut file) => file.close(),
            None => Ok(()),
        }
    }

    fn segment_info(segment: &TargetSegment, phys: usize) -> AddrInfo {
        AddrInfo::new(segment.mem_size, false)
            .with(AddressSpaceKind::MasterPhysical, phys)
            .with(AddressSpaceKind::SlaveVirtual, segment.target_addr)
    }

    fn map_segment(&mut self, segment: &mut TargetSegment) -> Result<SegmentMapping> {
        let phys = self.spaces.translate(
            segment.target_addr,
            AddressSpaceKind::SlaveVirtual,
            AddressSpaceKind::MasterPhysical,
        )?;
        let mut info = Self::segment_info(segment, phys);
        self.spaces.map(SEGMENT_MAP, &mut info, AddressSpaceKind::MasterPhysical)?;

        let host_virt = info
            .addr(AddressSpaceKind::MasterKernelVirtual)
            .ok_or_else(|| Error::MapFailed(format!("{:#x} has no host address", segment.target_addr)))?;
        let mapping = SegmentMapping {
            host_virt,
            phys,
            size: segment.mem_size,
        };
        segment.mapping = Some(mapping);
        Ok(mapping)
    }

    fn unmap_segment(&mut self, segment: &mut TargetSegment) -> Result<()> {
        match segment.mapping.take() {
            Some(mapping) => {
                let info = Self::segment_info(segment, mapping.phys)
                    .with(AddressSpaceKind::MasterKernelVirtual, mapping.host_virt);
                self.spaces.unmap(SEGMENT_MAP, &info, AddressSpaceKind::MasterPhysical)
            }
            None => Ok(()),
        }
    }

    fn fill(&mut self, segment: &mut TargetSegment) -> Result<()> {
        let mut contents = self.host_alloc(segment.mem_size)?;
        if segment.file_size > 0 {
            let offset = i64::try_from(segment.file_offset)
                .map_err(|_| error::invalid_argument("segment file offset out of range"))?;
            self.file_seek(offset, SeekOrigin::Start)?;
            let read = self.file_read(&mut contents[..segment.file_size], segment.file_size, 1)?;
            if read != 1 {
                return Err(Error::LoadFailed(format!(
                    "short read of segment at {:#x}",
                    segment.target_addr
                )));
            }
        }
        segment.contents = contents;
        Ok(())
    }
}

impl LoaderClient for LoadSession<'_, '_> {
    fn file_seek(&mut self, offset: i64, origin: SeekOrigin) -> Result<u64> {
        self.file()?.seek(offset, origin)
    }

    fn file_tell(&mut self) -> Result<u64> {
        self.file()?.tell()
    }

    fn file_read(&mut self, buf: &mut [u8], record_size: Size, count: usize) -> Result<usize> {
        self.file()?.read(buf, record_size, count)
    }

    fn file_close(&mut self) -> Result<()> {
        match self.file.take() {
            Some(mut file) => file.close(),
            None => Err(error::invalid_state("no image file open")),
        }
    }

    fn host_alloc(&mut self, size: Size) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(size).map_err(|_| error::out_of_memory())?;
        buffer.resize(size, 0);
        Ok(buffer)
    }

    fn host_free(&mut self, buffer: Vec<u8>) {
        drop(buffer);
    }

    fn target_allocate(&mut self, request: &mut TargetRequest) -> Result<()> {
        if request.size == 0 {
            return Err(error::invalid_argument("zero-sized target region"));
        }
        if request.align > 1 && !request.align.is_power_of_two() {
            return Err(Error::InvalidArgument(format!("alignment {} is not a power of two", request.align)));
        }
        log::trace!("loader: target region {:#x}+{:#x} fixed by image", request.target_addr, request.size);
        Ok(())
    }

    fn target_free(&mut self, _request: &TargetRequest) -> Result<()> {
        Ok(())
    }

    fn copy(&mut self, segment: &mut TargetSegment) -> Result<()> {
        if segment.mem_size == 0 || segment.file_size > segment.mem_size {
            return Err(Error::InvalidArgument(format!(
                "segment at {:#x}: file size {:#x}, memory size {:#x}",
                segment.target_addr, segment.file_size, segment.mem_size
            )));
        }
        log::trace!("loader: copy segment {:#x}+{:#x}", segment.target_addr, segment.mem_size);

        if segment.mapping.is_none() {
            self.map_segment(segment)?;
        }
        if let Err(err) = self.fill(segment) {
            if let Err(unmap) = self.unmap_segment(segment) {
                log::warn!("loader: segment rollback: {}", unmap);
            }
            return Err(err);
        }
        Ok(())
    }

    fn write(&mut self, segment: &mut TargetSegment) -> Result<()> {
        if segment.contents.len() != segment.mem_size {
            return Err(Error::InvalidArgument(format!(
                "segment at {:#x} holds {:#x} bytes, expected {:#x}",
                segment.target_addr,
                segment.contents.len(),
                segment.mem_size
            )));
        }
        if segment.mapping.is_none() {
            self.map_segment(segment)?;
        }

        let written = self.spaces.write(segment.target_addr, &segment.contents);
        let unmapped = self.unmap_segment(segment);
        written?;
        unmapped
    }

    fn map(&mut self, map_type: MapMask, info: &mut AddrInfo, src: AddressSpaceKind) -> Result<()> {
        self.spaces.map(map_type, info, src)
    }

    fn unmap(&mut self, map_type: MapMask, info: &AddrInfo, src: AddressSpaceKind) -> Result<()> {
        self.spaces.unmap(map_type, info, src)
    }

    fn translate(&mut self, addr: VirtAddr, src: AddressSpaceKind, dst: AddressSpaceKind) -> Result<usize> {
        self.spaces.translate(addr, src, dst)
    }

    fn load_dependent(&mut self, name: &str) -> Result<ModuleHandle> {
        Err(Error::NotImplemented(format!("dependent module {}", name)))
    }

    fn unload_dependent(&mut self, module: ModuleHandle) -> Result<()> {
        Err(Error::NotImplemented(format!("dependent module {}", module.0)))
    }
}

//! Shared fixtures for the processor manager integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use corelink_api::error::Result;
use corelink_api::loader::types::{ModuleHandle, SeekOrigin, TargetRequest, TargetSegment};
use corelink_api::{Error, LoaderClient, LoaderCore, ProcId, VirtAddr};
use corelink_memory_management::MemoryRegion;
use corelink_procmgr::sim::{SimHal, SimHalProbe, SimHostMemory, SimHostProbe, SimPowerManager, SimPowerProbe};
use corelink_procmgr::{
    NotifyCallback, NotifyEvent, Processor, ProcMgr, ProcMgrConfig, ProcMgrInstance, ProcMgrParts, SocProfile,
};

/// Simulated physical window: covers the DSP internal memories and `SHM`
pub const PHYS_BASE: usize = 0x4080_0000;
pub const PHYS_SIZE: usize = 0x0100_0000;

/// Host-mapped shared memory resource
pub const SHM_SLAVE: usize = 0x9000_0000;
pub const SHM_PHYS: usize = 0x4100_0000;
pub const SHM_SIZE: usize = 0x0010_0000;

/// DSP L2 RAM, a static region
pub const L2_SLAVE: usize = 0x0080_0000;
pub const L2_PHYS: usize = 0x4080_0000;

pub fn dsp_id() -> ProcId {
    ProcId::new(1).unwrap()
}

pub fn shm_region() -> MemoryRegion {
    MemoryRegion::new("SHM", SHM_SLAVE, SHM_PHYS, SHM_SIZE).host_mapped()
}

/// Probes onto the simulated hardware behind one instance
pub struct Probes {
    pub hal: SimHalProbe,
    pub host: SimHostProbe,
    pub power: SimPowerProbe,
}

/// Builds the parts of a DSP instance around the simulated hardware
pub fn dsp_parts(config: &ProcMgrConfig) -> (ProcMgrParts, Probes) {
    let hal = SimHal::new();
    let host = SimHostMemory::new(PHYS_BASE, PHYS_SIZE);
    let power = SimPowerManager::new();
    let probes = Probes {
        hal: hal.probe(),
        host: host.probe(),
        power: power.probe(),
    };
    let backend = Processor::new(dsp_id(), SocProfile::dsp(), hal, config).unwrap();
    let parts = ProcMgrParts {
        backend: Box::new(backend),
        loader: Box::new(TestLoader::default()),
        power: Box::new(power),
        host: Box::new(host),
    };
    (parts, probes)
}

/// Sets up a module with one DSP instance
pub fn dsp_instance(config: ProcMgrConfig) -> (ProcMgr, Arc<ProcMgrInstance>, Probes) {
    let (parts, probes) = dsp_parts(&config);
    let procmgr = ProcMgr::setup(config).unwrap();
    let instance = procmgr.create(dsp_id(), parts).unwrap();
    (procmgr, instance, probes)
}

/// Listener callback that records every event it receives
pub fn recorder() -> (Arc<Mutex<Vec<NotifyEvent>>>, NotifyCallback) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: NotifyCallback = Box::new(move |event: &NotifyEvent| sink.lock().unwrap().push(*event));
    (events, callback)
}

/// Segment of a test image
#[derive(Debug, Clone)]
pub struct TestSegment {
    pub target: u32,
    pub data: Vec<u8>,
    pub mem_size: u32,
}

/// Writer of the test image format.
///
/// ```text
/// "CLNK" entry:u32 segments:u32 symbols:u32 dependencies:u32
/// { target:u32 offset:u32 file_size:u32 mem_size:u32 } * segments
/// { addr:u32 len:u8 name } * symbols
/// { len:u8 name } * dependencies
/// segment bytes
/// ```
///
/// If the image exports `__argc`, the loader patches the argument count
/// into the segment holding it before the segment is written.
#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    entry: u32,
    segments: Vec<TestSegment>,
    symbols: Vec<(u32, String)>,
    dependencies: Vec<String>,
}

impl ImageBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            ..Self::default()
        }
    }

    pub fn segment(mut self, target: u32, data: &[u8], mem_size: u32) -> Self {
        self.segments.push(TestSegment {
            target,
            data: data.to_vec(),
            mem_size,
        });
        self
    }

    pub fn symbol(mut self, name: &str, addr: u32) -> Self {
        self.symbols.push((addr, name.to_string()));
        self
    }

    pub fn depends_on(mut self, name: &str) -> Self {
        self.dependencies.push(name.to_string());
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = Vec::new();
        header.extend_from_slice(b"CLNK");
        for value in [
            self.entry,
            self.segments.len() as u32,
            self.symbols.len() as u32,
            self.dependencies.len() as u32,
        ] {
            header.extend_from_slice(&value.to_le_bytes());
        }

        let table_len: usize = 16 * self.segments.len()
            + self.symbols.iter().map(|(_, name)| 5 + name.len()).sum::<usize>()
            + self.dependencies.iter().map(|name| 1 + name.len()).sum::<usize>();
        let mut offset = (header.len() + table_len) as u32;
        let mut body = Vec::new();
        for segment in &self.segments {
            for value in [segment.target, offset, segment.data.len() as u32, segment.mem_size] {
                header.extend_from_slice(&value.to_le_bytes());
            }
            offset += segment.data.len() as u32;
            body.extend_from_slice(&segment.data);
        }
        for (addr, name) in &self.symbols {
            header.extend_from_slice(&addr.to_le_bytes());
            header.push(name.len() as u8);
            header.extend_from_slice(name.as_bytes());
        }
        for name in &self.dependencies {
            header.push(name.len() as u8);
            header.extend_from_slice(name.as_bytes());
        }
        header.extend_from_slice(&body);
        header
    }
}

#[derive(Debug, Clone)]
struct TestModule {
    entry: u32,
    symbols: HashMap<String, u32>,
}

/// Loader core for the test image format
#[derive(Debug, Default)]
pub struct TestLoader {
    modules: HashMap<u32, TestModule>,
    next_handle: u32,
}

fn read_u32(client: &mut dyn LoaderClient) -> Result<u32> {
    let mut bytes = [0u8; 4];
    if client.file_read(&mut bytes, 4, 1)? != 1 {
        return Err(Error::LoadFailed("truncated image".to_string()));
    }
    Ok(u32::from_le_bytes(bytes))
}

fn read_name(client: &mut dyn LoaderClient) -> Result<String> {
    let mut len = [0u8; 1];
    if client.file_read(&mut len, 1, 1)? != 1 {
        return Err(Error::LoadFailed("truncated image".to_string()));
    }
    let mut name = vec![0u8; len[0] as usize];
    let len = name.len();
    if len > 0 && client.file_read(&mut name, len, 1)? != 1 {
        return Err(Error::LoadFailed("truncated image".to_string()));
    }
    String::from_utf8(name).map_err(|_| Error::LoadFailed("bad symbol name".to_string()))
}

impl LoaderCore for TestLoader {
    fn load(&mut self, client: &mut dyn LoaderClient, argv: &[String]) -> Result<ModuleHandle> {
        client.file_seek(0, SeekOrigin::Start)?;
        let mut magic = [0u8; 4];
        if client.file_read(&mut magic, 4, 1)? != 1 || &magic != b"CLNK" {
            return Err(Error::LoadFailed("not a test image".to_string()));
        }
        let entry = read_u32(client)?;
        let segment_count = read_u32(client)?;
        let symbol_count = read_u32(client)?;
        let dependency_count = read_u32(client)?;

        let mut segments = Vec::new();
        for _ in 0..segment_count {
            let target = read_u32(client)? as VirtAddr;
            let offset = read_u32(client)? as u64;
            let file_size = read_u32(client)? as usize;
            let mem_size = read_u32(client)? as usize;
            segments.push(TargetSegment::new(target, offset, file_size, mem_size));
        }
        let mut symbols = HashMap::new();
        for _ in 0..symbol_count {
            let addr = read_u32(client)?;
            symbols.insert(read_name(client)?, addr);
        }
        let mut dependencies = Vec::new();
        for _ in 0..dependency_count {
            dependencies.push(read_name(client)?);
        }
        for dependency in &dependencies {
            client.load_dependent(dependency)?;
        }

        let bookkeeping = client.host_alloc(64)?;
        for segment in &mut segments {
            let mut request = TargetRequest {
                target_addr: segment.target_addr,
                size: segment.mem_size,
                align: 4,
            };
            client.target_allocate(&mut request)?;
            client.copy(segment)?;

            if let Some(&argc_addr) = symbols.get("__argc") {
                let argc_addr = argc_addr as usize;
                if argc_addr >= segment.target_addr && argc_addr + 4 <= segment.target_addr + segment.mem_size {
                    let at = argc_addr - segment.target_addr;
                    segment.contents[at..at + 4].copy_from_slice(&(argv.len() as u32).to_le_bytes());
                }
            }
            client.write(segment)?;
        }
        client.host_free(bookkeeping);

        self.next_handle += 1;
        self.modules.insert(self.next_handle, TestModule { entry, symbols });
        Ok(ModuleHandle(self.next_handle))
    }

    fn unload(&mut self, _client: &mut dyn LoaderClient, module: ModuleHandle) -> Result<()> {
        self.modules
            .remove(&module.0)
            .map(|_| ())
            .ok_or_else(|| Error::UnloadFailed(format!("module {} not loaded", module.0)))
    }

    fn entry_point(&self, module: ModuleHandle) -> Option<VirtAddr> {
        self.modules.get(&module.0).map(|module| module.entry as VirtAddr)
    }

    fn symbol_address(&self, module: ModuleHandle, name: &str) -> Option<VirtAddr> {
        self.modules
            .get(&module.0)
            .and_then(|module| module.symbols.get(name))
            .map(|addr| *addr as VirtAddr)
    }
}

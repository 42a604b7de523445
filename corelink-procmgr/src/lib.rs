//! Corelink Processor Manager
//!
//! Host-side lifecycle management of the slave cores of a heterogeneous
//! SoC: attaching to a core, mapping shared memory into its address space,
//! loading an executable image into it and starting or stopping it.
//!
//! # Architecture
//!
//! - [`processor`]: the per-core backend, its HAL seam, SoC profiles and
//!   state-change listeners
//! - [`loader`]: the bridge between the generic loader core and the
//!   slave memory model
//! - [`procmgr`]: the module context and the per-core instances that
//!   orchestrate backend, loader and power manager
//! - [`sim`]: software models of the hardware collaborators
//!
//! # Usage
//!
//! ```rust
//! use corelink_procmgr::{ProcMgr, ProcMgrConfig};
//!
//! let procmgr = ProcMgr::setup(ProcMgrConfig::default()).unwrap();
//! assert!(procmgr.proc_ids().is_empty());
//! procmgr.destroy().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod loader;
pub mod processor;
pub mod procmgr;
pub mod sim;

pub use config::ProcMgrConfig;
pub use loader::{ImageFile, LoadSession, LoaderBridge};
pub use processor::{
    AttachParams, BackendAttachInfo, BackendConfig, ControlCommand, ListenerId, MemSegment, NotifyCallback,
    NotifyEvent, NotifyStatus, Processor, ProcessorBackend, ProcessorHal, ResetLine, SocProfile,
};
pub use procmgr::{AddressSpaces, MappedMemEntry, MappedMemTable, ProcInfo, ProcMgr, ProcMgrInstance, ProcMgrParts, StartParams};

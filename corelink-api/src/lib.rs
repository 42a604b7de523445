//! Corelink API - Core interfaces and types for the slave-core control plane
//!
//! This crate provides the types and collaborator interfaces shared by the
//! memory-management and processor-manager crates. A host (master) processor
//! uses them to attach to, load, start and stop secondary slave cores that
//! share physical memory with it but run behind their own MMU.
//!
//! # Architecture
//!
//! - **Core**: processor ids, address-space kinds, boot modes and states
//! - **Error**: the error taxonomy shared by every public operation
//! - **Power**: the power-manager collaborator interface
//! - **Host**: the host page-mapping collaborator interface
//! - **Loader**: the callback contract between the generic executable
//!   loader and the host/slave memory model
//!
//! # Usage
//!
//! ```rust
//! use corelink_api::core::types::{AddressSpaceKind, MapMask};
//!
//! let mask = MapMask::from_kind(AddressSpaceKind::SlaveVirtual);
//! assert!(mask.contains(MapMask::SLAVE_VIRTUAL));
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

// Core modules
pub mod core;
pub mod error;
pub mod power;
pub mod host;
pub mod loader;
pub mod sync;

// Re-export commonly used types
pub use crate::core::types::*;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::power::interface::PowerManager;
pub use crate::host::interface::HostMemory;
pub use crate::loader::interface::{LoaderClient, LoaderCore, LoaderFile};

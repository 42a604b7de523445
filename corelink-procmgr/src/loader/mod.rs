//! Executable loading
//!
//! The generic relocating loader core is a black box behind
//! [`LoaderCore`](corelink_api::LoaderCore). [`LoaderBridge`] owns it for one
//! processor instance and hands it a [`LoadSession`] callback table that
//! stages segments in host memory and writes them into the slave's
//! address space. Only statically linked executables are supported:
//! dependent-module callbacks answer `NotImplemented`.

pub mod bridge;
pub mod file;

pub use bridge::{LoadSession, LoaderBridge, SECTION_END_SUFFIX, SECTION_START_SUFFIX};
pub use file::ImageFile;

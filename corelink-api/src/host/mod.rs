//! Host page-mapping collaborator

pub mod interface;

pub use interface::HostMemory;

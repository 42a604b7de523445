//! Loader callback contract
//!
//! The generic relocating loader is a black box. It drives the host/slave
//! memory model exclusively through [`LoaderClient`].

pub mod interface;
pub mod types;

pub use interface::{LoaderClient, LoaderCore, LoaderFile};
pub use types::*;

//! Core types shared by every corelink crate

pub mod types;

pub use types::*;

//! Corelink Memory Management
//!
//! This crate provides the slave address-translation engine: the per-backend
//! translation table with static and reference-counted dynamic entries, the
//! slave MMU entry model, and the page layout helpers used to program it.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

// Re-export API types
pub use corelink_api::*;

// Memory management modules
pub mod layout;
pub mod mmu;
pub mod translation;
pub mod address_table;

// Re-export commonly used types and functions
pub use layout::{MemoryRegion, PAGE_SIZE, PAGE_SHIFT, page_round_up, page_round_down, page_offset, is_page_aligned};
pub use mmu::{MmuEntry, MmuProgrammer, ElementSize, Endianness, MixedSize, split_into_pages};
pub use translation::{EntryOrigin, TranslationEntry};
pub use address_table::{Acquired, AddressTable, Released};

/// Default number of slots in a backend's translation table
pub const DEFAULT_TABLE_CAPACITY: usize = 32;

static_assertions::const_assert!(mmu::SIZE_4K == PAGE_SIZE);
static_assertions::const_assert!(1 << PAGE_SHIFT == PAGE_SIZE);

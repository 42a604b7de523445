//! Synchronization primitives shared by the corelink crates
//!
//! Module and instance state is guarded by spin locks so the memory
//! crates stay usable without the standard library.

pub use spin::Mutex;
pub use spin::MutexGuard;
pub use spin::RwLock;
pub use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

//! Processor manager
//!
//! [`ProcMgr`] is the module context created by `setup()`; it owns one
//! [`ProcMgrInstance`] per slave core. An instance ties together the
//! core's backend, its loader bridge, its power manager and the host-side
//! record of everything mapped on the core's behalf.

pub mod instance;
pub mod mapped;
pub mod module;
pub mod spaces;

pub use instance::{ProcInfo, ProcMgrInstance, ProcMgrParts, StartParams};
pub use mapped::{MappedMemEntry, MappedMemTable};
pub use module::ProcMgr;
pub use spaces::AddressSpaces;

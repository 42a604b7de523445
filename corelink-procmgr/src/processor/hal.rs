//! Hardware-abstraction interface of a slave core

use corelink_api::error::Result;
use corelink_api::{Error, ProcId};
use corelink_memory_management::{MmuEntry, MmuProgrammer};

use super::profile::SocProfile;

/// Reset lines a backend can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetLine {
    /// The slave core itself
    Core,
    /// The slave MMU
    Mmu,
}

/// Register-level control calls of one SoC variant.
///
/// The generic [`Processor`](super::backend::Processor) drives these in
/// the order its state machine requires; implementations only touch the
/// hardware.
pub trait ProcessorHal: MmuProgrammer + Send {
    /// Brings up the control object for `proc_id`
    fn init(&mut self, proc_id: ProcId, profile: &SocProfile) -> Result<()>;

    /// Tears the control object down
    fn deinit(&mut self) -> Result<()>;

    /// Asserts a reset line
    fn reset_assert(&mut self, line: ResetLine) -> Result<()>;

    /// Releases a reset line
    fn reset_release(&mut self, line: ResetLine) -> Result<()>;

    /// Enables the slave MMU
    fn mmu_enable(&mut self) -> Result<()>;

    /// Disables the slave MMU
    fn mmu_disable(&mut self) -> Result<()>;

    /// Writes the boot (entry point) register
    fn set_boot_address(&mut self, entry_point: u32) -> Result<()>;

    /// Reads back the entries currently programmed in the slave MMU
    fn save_mmu_context(&mut self) -> Result<Vec<MmuEntry>>;

    /// Re-programs a context captured by `save_mmu_context`
    fn restore_mmu_context(&mut self, context: &[MmuEntry]) -> Result<()> {
        for entry in context {
            self.add_entry(entry)?;
        }
        Ok(())
    }

    /// Variant-specific control command
    fn control(&mut self, cmd: u32, arg: usize) -> Result<usize> {
        let _ = arg;
        Err(Error::NotImplemented(format!("control command {:#x}", cmd)))
    }
}

/// Maps a HAL failure onto the backend error kind, keeping its text
pub(crate) fn hal_failed(step: &str, err: Error) -> Error {
    match err {
        Error::OutOfMemory => Error::OutOfMemory,
        Error::BackendOperationFailed(msg) => Error::BackendOperationFailed(format!("{}: {}", step, msg)),
        other => Error::BackendOperationFailed(format!("{}: {}", step, other)),
    }
}

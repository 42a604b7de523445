//! Power manager interface

use crate::core::types::ProcId;
use crate::error::Result;

/// Trait for the power manager that gates a slave core's power domain.
///
/// The processor manager calls `attach` before touching the slave's
/// hardware and `detach` after it has let go of it.
pub trait PowerManager: Send {
    /// Takes a power reference on the slave core
    fn attach(&mut self, proc_id: ProcId) -> Result<()>;

    /// Drops the power reference taken by `attach`
    fn detach(&mut self, proc_id: ProcId) -> Result<()>;
}

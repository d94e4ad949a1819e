//! Interrupt controller interface
//!
//! The controller owns the per-vector handler table. A vector has at most one
//! handler; kernel objects install a closure that runs in interrupt context
//! and returns how the controller should finish the interrupt.

use crate::Result;
use std::sync::Arc;

/// Bitmask of physical CPUs, bit `n` is CPU `n`
pub type CpuMask = u64;

/// How the controller completes an interrupt after the handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqEoi {
    /// Drop priority and deactivate the line
    Deactivate,
    /// Drop priority only; something else (a guest) deactivates the line
    PriorityDrop,
}

/// Electrical trigger mode of a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Edge,
    Level,
}

/// Active polarity of a vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    ActiveLow,
    ActiveHigh,
}

/// Handler invoked in interrupt context
pub type IrqHandler = Arc<dyn Fn() -> IrqEoi + Send + Sync>;

/// Hardware interrupt controller (GIC, APIC, or a mock)
pub trait InterruptController: Send + Sync {
    /// Whether `vector` names a real, routable interrupt
    fn is_valid(&self, vector: u32) -> bool;

    /// Translate a bus-level vector into the controller's numbering
    fn remap(&self, vector: u32) -> u32;

    /// Program trigger mode and polarity for `vector`
    fn configure(&self, vector: u32, mode: TriggerMode, polarity: Polarity) -> Result<()>;

    /// Install (`Some`) or remove (`None`) the handler for `vector`
    ///
    /// # Errors
    /// Installing over an existing handler fails with `VectorBound`.
    fn register_handler(&self, vector: u32, handler: Option<IrqHandler>) -> Result<()>;

    fn mask(&self, vector: u32);

    fn unmask(&self, vector: u32);

    /// Send an inter-processor interrupt to every CPU in `mask`
    fn send_ipi(&self, mask: CpuMask);
}

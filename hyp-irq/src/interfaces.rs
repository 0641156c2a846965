//! Contracts of the collaborators the dispatch engine drives.
//!
//! The virtual distributor model, the transport registry, the debug manager
//! and the timer subsystem live outside this crate; the engine only depends
//! on these call surfaces.

use crate::exception::ExceptionStackFrame;

/// Virtual interrupt controller model, owner of the list registers.
pub trait VirtualGic {
    /// One-time state initialization, called under the configuration lock
    /// before any interrupt is unmasked on the calling core.
    fn init(&self);

    /// Queue a physical interrupt for injection into the guest. Ownership of
    /// the active interrupt transfers with the call: the virtual distributor
    /// deactivates the line when the guest completes it.
    fn enqueue_physical_irq(&self, id: u16);

    /// Maintenance interrupt servicing (list register housekeeping).
    fn maintenance_handler(&self);

    /// Recompute the injection / list register state. Called after every
    /// finalize step, still under the configuration lock.
    fn update_state(&self);
}

/// Opaque handle for a transport whose top half ran and whose bottom half is
/// still owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportToken(pub usize);

/// Registry mapping interrupt lines to host-implemented transport handlers.
pub trait TransportRegistry {
    /// Whether any transport claims this line. Claimed lines never route to
    /// the guest.
    fn claims_irq(&self, id: u16) -> bool;

    /// Run the registered top half, if any, with IRQ delivery still masked.
    /// A returned token means a bottom half must run once interrupts are
    /// re-enabled.
    fn top_half(&self, id: u16) -> Option<TransportToken>;

    /// Deferred bottom half, invoked outside any lock with IRQ delivery
    /// enabled.
    fn bottom_half(&self, token: TransportToken);
}

/// Debug-manager entry points reached through host software-generated
/// interrupts.
pub trait DebugSignals {
    /// A debug-pause request arrived from `src_core`.
    fn pause_handler(&self, src_core: u32);

    /// A broadcast-call request arrived from `src_core`.
    fn execute_function_handler(&self, src_core: u32);
}

/// Timer subsystem surface consumed by the dispatch engine and the guest
/// timer validity gate.
pub trait GuestTimers {
    /// Host (hypervisor) timer servicing.
    fn interrupt_handler(&self);

    /// Guest-visible virtual counter derived from the counter sample in the
    /// trapped frame.
    fn current_virtual_count(&self, frame: &ExceptionStackFrame) -> u64;

    /// Reprogram the emulated physical timer to fire at `cval` in guest
    /// virtual time.
    fn write_emulated_compare(&self, frame: &mut ExceptionStackFrame, cval: u64);
}

//! Single-step debug state machine.
//!
//! The state is not stored anywhere: it is a pure function of two hardware
//! bits, MDSCR_EL1.SS and the trapped frame's SPSR_EL2.SS.

use crate::arch;
use crate::core_ctx::CoreCtx;
use crate::exception::{ExceptionStackFrame, ExceptionSyndrome, SPSR_SS};

/// MDSCR_EL1 software step enable.
pub const MDSCR_SS: u64 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleStepState {
    /// Stepping disabled.
    Inactive,
    /// Stepping enabled; the next instruction executes, then traps.
    ActiveNotPending,
    /// Stepping enabled with the step already consumed; the trap is
    /// immediate. Decodable, but nothing here ever produces it because
    /// pstate.SS resets to zero.
    ActivePending,
}

impl SingleStepState {
    /// Decode from the two hardware bits.
    pub const fn decode(mdscr_ss: bool, pstate_ss: bool) -> Self {
        if !mdscr_ss {
            SingleStepState::Inactive
        } else if pstate_ss {
            SingleStepState::ActiveNotPending
        } else {
            SingleStepState::ActivePending
        }
    }
}

/// Current single-step state for the trapped context.
pub fn get_next_state(frame: &ExceptionStackFrame) -> SingleStepState {
    SingleStepState::decode(
        arch::read_mdscr() & MDSCR_SS != 0,
        frame.spsr_el2 & SPSR_SS != 0,
    )
}

const fn apply_state(state: SingleStepState, mdscr: u64, spsr: u64) -> (u64, u64) {
    match state {
        SingleStepState::Inactive => (mdscr & !MDSCR_SS, spsr),
        SingleStepState::ActiveNotPending => (mdscr | MDSCR_SS, spsr | SPSR_SS),
        SingleStepState::ActivePending => (mdscr | MDSCR_SS, spsr & !SPSR_SS),
    }
}

/// Program the single-step state machine for the trapped context.
pub fn set_next_state(frame: &mut ExceptionStackFrame, state: SingleStepState) {
    let (mdscr, spsr) = apply_state(state, arch::read_mdscr(), frame.spsr_el2);
    frame.spsr_el2 = spsr;
    arch::write_mdscr(mdscr);
    // Mandated before the next instruction for debug register visibility.
    arch::isb();
}

/// Software step trap entry point.
///
/// Inside the configured stepping range the step re-arms itself; outside it,
/// stepping is disarmed and the trap is left for the debug-protocol forwarder
/// to report.
pub fn handle_single_step(
    ctx: &CoreCtx,
    frame: &mut ExceptionStackFrame,
    syndrome: ExceptionSyndrome,
) {
    let addr = frame.elr_el2;
    let (start, end) = ctx.stepping_range();

    if addr >= start && addr < end {
        set_next_state(frame, SingleStepState::ActiveNotPending);
    } else {
        set_next_state(frame, SingleStepState::Inactive);
    }

    log::debug!(
        "single-step trap at {:#x}, isv={}, ex={}",
        addr,
        (syndrome.iss() >> 24) & 1,
        (syndrome.iss() >> 6) & 1
    );
}

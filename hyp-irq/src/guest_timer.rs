//! Guest timer interrupt validity gate.
//!
//! The guest-visible timer lines can fire before they are due from the
//! guest's point of view: delivery races against the guest reprogramming its
//! timer, and the emulated physical timer is re-armed with imprecise
//! hardware. The dispatch engine consults this gate before honoring either
//! line; everything else passes unconditionally.

use crate::arch;
use crate::core_ctx::CoreCtx;
use crate::exception::ExceptionStackFrame;
use crate::gic::{PHYS_TIMER_IRQ_ID, VIRT_TIMER_IRQ_ID};
use crate::interfaces::GuestTimers;

/// Whether `irq_id` should be honored. A `false` return means the interrupt
/// was early; the emulated physical timer has already been re-armed in that
/// case and the caller must drop and retire the interrupt without forwarding.
pub(crate) fn check_guest_timer_interrupts(
    frame: &mut ExceptionStackFrame,
    ctx: &CoreCtx,
    timers: &dyn GuestTimers,
    irq_id: u16,
) -> bool {
    match irq_id {
        VIRT_TIMER_IRQ_ID => {
            arch::read_guest_timer_compare() <= timers.current_virtual_count(frame)
        }
        PHYS_TIMER_IRQ_ID => check_reschedule_emulated_ptimer(frame, ctx, timers),
        _ => true,
    }
}

/// Evaluate whether the emulated physical timer has really expired for the
/// guest; if not, re-arm it at the missed deadline and report "not due".
fn check_reschedule_emulated_ptimer(
    frame: &mut ExceptionStackFrame,
    ctx: &CoreCtx,
    timers: &dyn GuestTimers,
) -> bool {
    let cval = ctx.emul_ptimer_cval();
    let vct = timers.current_virtual_count(frame);

    if cval > vct {
        // Re-arming is not exact (worse under emulation), so this can take
        // several rounds before the corrected deadline actually elapses.
        timers.write_emulated_compare(frame, cval);
        return false;
    }

    true
}

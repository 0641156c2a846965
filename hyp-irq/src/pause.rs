//! Cross-core pause/unpause coordination over the debug-pause SGI.
//!
//! Pause is a barrier: the caller blocks until every targeted core has
//! checked in on its way to the pause-wait loop. Unpause is fire-and-forget:
//! it only arms resumption. A pausing core keeps servicing hypervisor
//! interrupts while it waits, so the dispatch engine stays live underneath.
//!
//! Not reentrant across distinct core masks from different initiators; the
//! single allowed reentrant use is a core pausing only itself.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch;
use crate::core_ctx::CoreCtx;
use crate::exception::ExceptionStackFrame;
use crate::gic::{HostSgi, IrqManager, SgiTarget};
use crate::single_step::{self, SingleStepState};

pub struct PauseCoordinator {
    /// Cores currently requested to pause.
    paused_cores: AtomicU32,
    /// Cores that still have to check in for the current pause request.
    pending_checkins: AtomicU32,
    /// Cores that must re-arm single-step when they resume.
    single_step_cores: AtomicU32,
}

impl PauseCoordinator {
    pub const fn new() -> Self {
        Self {
            paused_cores: AtomicU32::new(0),
            pending_checkins: AtomicU32::new(0),
            single_step_cores: AtomicU32::new(0),
        }
    }

    /// Pause every core in `core_mask`, blocking until all of them have
    /// entered their pause-wait path. Including the calling core is the
    /// degenerate (and only reentrant) case: the caller parks itself on its
    /// next exception return.
    pub fn pause_cores(&self, mgr: &IrqManager, ctx: &CoreCtx, core_mask: u32) {
        let self_bit = 1u32 << ctx.core_id();
        let others = core_mask & !self_bit;

        debug_assert_eq!(
            self.paused_cores.load(Ordering::Relaxed) & others,
            0,
            "pause while a distinct pause request is still in flight"
        );

        self.paused_cores.fetch_or(core_mask, Ordering::Release);
        self.pending_checkins.store(others, Ordering::Release);
        if others != 0 {
            mgr.send_sgi(HostSgi::DebugPause, SgiTarget::List(others as u8));
        }
        while self.pending_checkins.load(Ordering::Acquire) != 0 {
            arch::wfe();
        }
    }

    /// Arm resumption for every core in `core_mask` and single-step re-entry
    /// for those also in `single_step_mask`. Never waits for the targets.
    pub fn unpause_cores(&self, core_mask: u32, single_step_mask: u32) {
        self.single_step_cores
            .fetch_or(core_mask & single_step_mask, Ordering::Release);
        self.paused_cores.fetch_and(!core_mask, Ordering::Release);
        arch::sev();
    }

    /// Debug-pause SGI entry, called by the dispatch engine on the target
    /// core. Checks this core in so the pausing core's barrier can complete;
    /// the actual wait happens on the exception return path.
    pub fn sgi_handler(&self, ctx: &CoreCtx) {
        self.check_in(ctx);
    }

    fn check_in(&self, ctx: &CoreCtx) {
        let bit = 1u32 << ctx.core_id();
        if self.pending_checkins.fetch_and(!bit, Ordering::AcqRel) & bit != 0 {
            arch::sev();
        }
    }

    #[inline]
    pub fn is_paused(&self, ctx: &CoreCtx) -> bool {
        self.paused_cores.load(Ordering::Acquire) & (1 << ctx.core_id()) != 0
    }

    /// Exception-return hook: while this core is paused, wait with interrupt
    /// delivery enabled (hypervisor interrupts keep being serviced), then
    /// apply the armed single-step state to the frame about to be resumed.
    pub fn wait_for_unpause_and_update_single_step(
        &self,
        ctx: &CoreCtx,
        frame: &mut ExceptionStackFrame,
    ) {
        let bit = 1u32 << ctx.core_id();

        if self.paused_cores.load(Ordering::Acquire) & bit != 0 {
            // A pause can land before the SGI path had a chance to check in.
            self.check_in(ctx);
            arch::unmask_irq();
            while self.paused_cores.load(Ordering::Acquire) & bit != 0 {
                arch::wfe();
            }
            arch::mask_irq();
        }

        if self.single_step_cores.fetch_and(!bit, Ordering::AcqRel) & bit != 0 {
            single_step::set_next_state(frame, SingleStepState::ActiveNotPending);
        }
    }
}

impl Default for PauseCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

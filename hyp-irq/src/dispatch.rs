//! Exception-time interrupt dispatch.
//!
//! One invocation per trapped physical interrupt. Not reentrant on a single
//! core except through the bottom-half preemption point at the very end;
//! concurrent invocations on different cores are expected.

use arbitrary_int::Number;

use crate::arch;
use crate::core_ctx::CoreCtx;
use crate::exception::ExceptionStackFrame;
use crate::gic::{HYP_TIMER_IRQ_ID, HostSgi, IrqManager, MAINTENANCE_IRQ_ID, SPURIOUS_IRQ_ID};
use crate::guest_timer;
use crate::interfaces::{DebugSignals, GuestTimers, TransportRegistry, VirtualGic};

/// The collaborators a dispatch invocation calls out to.
pub struct IrqHooks<'a> {
    pub vgic: &'a dyn VirtualGic,
    pub transport: &'a dyn TransportRegistry,
    pub debug: &'a dyn DebugSignals,
    pub timers: &'a dyn GuestTimers,
}

/// The closed set of statically-known interrupt IDs, plus the dynamic rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnownIrq {
    HostSgi(HostSgi),
    Maintenance,
    HypTimer,
    Dynamic(u16),
}

impl KnownIrq {
    fn classify(id: u16) -> Self {
        if let Ok(sgi) = HostSgi::try_from(id) {
            return KnownIrq::HostSgi(sgi);
        }
        match id {
            MAINTENANCE_IRQ_ID => KnownIrq::Maintenance,
            HYP_TIMER_IRQ_ID => KnownIrq::HypTimer,
            other => KnownIrq::Dynamic(other),
        }
    }
}

/// What finally happens to a non-spurious, gate-passed interrupt: exactly one
/// of the two, decided once and carried as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeAction {
    Deactivate { maintenance: bool },
    ForwardToGuest,
}

/// IRQ exception entry point.
pub fn handle_irq_exception(
    mgr: &IrqManager,
    ctx: &CoreCtx,
    frame: &mut ExceptionStackFrame,
    hooks: &IrqHooks,
) {
    let mut gicc = mgr.gic().gicc();

    // Acknowledge: the interrupt goes from pending to active.
    let iar = gicc.read_iar();
    let irq_id = iar.int_id().as_u32() as u16;
    let src_core = iar.cpu_id().as_u32();

    log::trace!("core {}: irq {:#x}", ctx.core_id(), irq_id);

    if irq_id == SPURIOUS_IRQ_ID {
        return;
    }

    if !guest_timer::check_guest_timer_interrupts(frame, ctx, hooks.timers, irq_id) {
        // Fired early and has been re-armed: drop priority and retire, the
        // corrected deadline will deliver it again.
        gicc.write_eoir(iar);
        gicc.write_dir(iar);
        return;
    }

    let mut maintenance = false;
    let mut guest_candidate = false;
    match KnownIrq::classify(irq_id) {
        KnownIrq::HostSgi(HostSgi::ExecuteFunction) => {
            hooks.debug.execute_function_handler(src_core)
        }
        KnownIrq::HostSgi(HostSgi::VgicUpdate) => {
            // Nothing to do here; the finalize step recomputes the virtual
            // distributor state anyway.
        }
        KnownIrq::HostSgi(HostSgi::DebugPause) => hooks.debug.pause_handler(src_core),
        KnownIrq::Maintenance => maintenance = true,
        KnownIrq::HypTimer => hooks.timers.interrupt_handler(),
        // IDs below 16 that are not host SGIs are reserved.
        KnownIrq::Dynamic(id) => guest_candidate = id >= 16,
    }

    // Transport overlay: a registered top half runs now and unconditionally
    // takes the line away from the guest.
    let transport_token = if irq_id >= 32 {
        hooks.transport.top_half(irq_id)
    } else {
        None
    };

    // Priority drop. Deactivation is decided below.
    gicc.write_eoir(iar);

    let routed_to_guest =
        guest_candidate && transport_token.is_none() && mgr.irq_is_guest(irq_id, hooks.transport);
    let action = if routed_to_guest {
        FinalizeAction::ForwardToGuest
    } else {
        FinalizeAction::Deactivate { maintenance }
    };

    {
        let _guard = mgr.lock.lock(ctx.core_id());
        match action {
            FinalizeAction::Deactivate { maintenance } => {
                if maintenance {
                    hooks.vgic.maintenance_handler();
                }
                gicc.write_dir(iar);
            }
            FinalizeAction::ForwardToGuest => {
                // Ownership transfers: the virtual distributor deactivates
                // the line on guest EOI.
                hooks.vgic.enqueue_physical_irq(irq_id);
            }
        }
        hooks.vgic.update_state();
    }

    if let Some(token) = transport_token {
        // Preemption point: deeper interrupts may nest through this same
        // engine while the bottom half runs.
        ctx.set_in_interruptible_hyp_code(true);
        arch::unmask_irq();
        hooks.transport.bottom_half(token);
    }
}

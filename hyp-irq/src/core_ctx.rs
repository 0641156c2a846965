//! Per-core hypervisor contexts.
//!
//! One [CoreCtx] per physical core, owned by that core except for the fields
//! the debug protocol writes remotely (the stepping range); those are atomics
//! and the external coordinator orders the writes against the remote core's
//! reads.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crate::arch;

/// GICv2 limit: ITARGETSR holds one bit per CPU interface in a byte.
pub const MAX_CORES: usize = 8;

pub struct CoreCtx {
    core_id: u32,
    is_boot_core: AtomicBool,
    warmboot: AtomicBool,
    /// This core's bit in the distributor targets bitmap, captured at init.
    gic_interface_mask: AtomicU32,
    stepping_range_start: AtomicU64,
    stepping_range_end: AtomicU64,
    /// Software-emulated physical timer compare value for the guest.
    emul_ptimer_cval: AtomicU64,
    /// Set while the core runs hypervisor code with IRQ delivery enabled
    /// (transport bottom halves); cleared by the exception return path.
    in_interruptible_hyp_code: AtomicBool,
}

impl CoreCtx {
    pub const fn new(core_id: u32) -> Self {
        Self {
            core_id,
            is_boot_core: AtomicBool::new(false),
            warmboot: AtomicBool::new(false),
            gic_interface_mask: AtomicU32::new(0),
            stepping_range_start: AtomicU64::new(0),
            stepping_range_end: AtomicU64::new(0),
            emul_ptimer_cval: AtomicU64::new(0),
            in_interruptible_hyp_code: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn core_id(&self) -> u32 {
        self.core_id
    }

    #[inline]
    pub fn is_boot_core(&self) -> bool {
        self.is_boot_core.load(Ordering::Relaxed)
    }

    /// Called once by the first core to come up.
    pub fn mark_boot_core(&self) {
        self.is_boot_core.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_warmboot(&self) -> bool {
        self.warmboot.load(Ordering::Relaxed)
    }

    /// Set by the bring-up path on reboots that keep the controller state.
    pub fn set_warmboot(&self, warmboot: bool) {
        self.warmboot.store(warmboot, Ordering::Relaxed);
    }

    #[inline]
    pub fn interface_mask(&self) -> u32 {
        self.gic_interface_mask.load(Ordering::Relaxed)
    }

    pub(crate) fn set_interface_mask(&self, mask: u32) {
        self.gic_interface_mask.store(mask, Ordering::Relaxed);
    }

    /// Instruction-pointer window in which single-step re-arms itself.
    #[inline]
    pub fn stepping_range(&self) -> (u64, u64) {
        (
            self.stepping_range_start.load(Ordering::Acquire),
            self.stepping_range_end.load(Ordering::Acquire),
        )
    }

    pub fn set_stepping_range(&self, start: u64, end: u64) {
        self.stepping_range_start.store(start, Ordering::Release);
        self.stepping_range_end.store(end, Ordering::Release);
    }

    #[inline]
    pub fn emul_ptimer_cval(&self) -> u64 {
        self.emul_ptimer_cval.load(Ordering::Relaxed)
    }

    pub fn set_emul_ptimer_cval(&self, cval: u64) {
        self.emul_ptimer_cval.store(cval, Ordering::Relaxed);
    }

    #[inline]
    pub fn in_interruptible_hyp_code(&self) -> bool {
        self.in_interruptible_hyp_code.load(Ordering::Relaxed)
    }

    pub fn set_in_interruptible_hyp_code(&self, value: bool) {
        self.in_interruptible_hyp_code.store(value, Ordering::Relaxed);
    }
}

/// The pre-sized per-core context array, constructed at startup and passed by
/// reference into every component.
pub struct CoreCtxs {
    cores: [CoreCtx; MAX_CORES],
}

impl CoreCtxs {
    pub const fn new() -> Self {
        Self {
            cores: [
                CoreCtx::new(0),
                CoreCtx::new(1),
                CoreCtx::new(2),
                CoreCtx::new(3),
                CoreCtx::new(4),
                CoreCtx::new(5),
                CoreCtx::new(6),
                CoreCtx::new(7),
            ],
        }
    }

    /// Context of a core by ID. Out-of-range IDs are a hardware-contract
    /// violation and panic.
    #[inline]
    pub fn get(&self, core_id: u32) -> &CoreCtx {
        &self.cores[core_id as usize]
    }

    /// Context of the core executing this call.
    #[inline]
    pub fn current(&self) -> &CoreCtx {
        self.get(arch::core_id())
    }
}

impl Default for CoreCtxs {
    fn default() -> Self {
        Self::new()
    }
}

//! CPU-level primitives: interrupt masking, core identity, event signaling
//! and the debug/timer system registers driven by the modules above.
//!
//! On non-aarch64 targets the register state is backed by process-local
//! shadow values so that everything layered on top stays host-testable.

#[cfg(target_arch = "aarch64")]
mod imp {
    use aarch64_cpu::asm;
    use aarch64_cpu::asm::barrier;
    use aarch64_cpu::registers::{CNTP_CVAL_EL0, DAIF, MPIDR_EL1, Readable, Writeable};
    use core::arch::asm as asm_;

    #[inline]
    pub fn core_id() -> u32 {
        (MPIDR_EL1.get() & 0xFF) as u32
    }

    /// Mask IRQ delivery on this core, returning the previous mask state.
    #[inline]
    pub fn save_and_mask_irq() -> u64 {
        let flags = DAIF.get();
        mask_irq();
        flags
    }

    /// Restore a mask state previously returned by [save_and_mask_irq].
    #[inline]
    pub fn restore_irq(flags: u64) {
        DAIF.set(flags);
    }

    #[inline]
    pub fn mask_irq() {
        unsafe { asm_!("msr daifset, #2", options(nomem, nostack, preserves_flags)) };
    }

    #[inline]
    pub fn unmask_irq() {
        unsafe { asm_!("msr daifclr, #2", options(nomem, nostack, preserves_flags)) };
    }

    #[inline]
    pub fn irqs_masked() -> bool {
        DAIF.is_set(DAIF::I)
    }

    /// MDSCR_EL1, not covered by the register crate.
    #[inline]
    pub fn read_mdscr() -> u64 {
        let value: u64;
        unsafe { asm_!("mrs {}, mdscr_el1", out(reg) value, options(nomem, nostack)) };
        value
    }

    #[inline]
    pub fn write_mdscr(value: u64) {
        unsafe { asm_!("msr mdscr_el1, {}", in(reg) value, options(nomem, nostack)) };
    }

    /// Compare value backing the guest-visible virtual timer. The guest runs
    /// under a virtual offset, so the physical compare register holds it.
    #[inline]
    pub fn read_guest_timer_compare() -> u64 {
        CNTP_CVAL_EL0.get()
    }

    #[inline]
    pub fn isb() {
        barrier::isb(barrier::SY);
    }

    #[inline]
    pub fn wfe() {
        asm::wfe();
    }

    #[inline]
    pub fn sev() {
        asm::sev();
    }
}

#[cfg(not(target_arch = "aarch64"))]
mod imp {
    //! Shadow register file. Thread-local under test so concurrently running
    //! tests each see their own CPU state.

    const DAIF_I: u64 = 1 << 7;

    #[cfg(not(test))]
    mod state {
        use core::sync::atomic::{AtomicU64, Ordering};

        static DAIF: AtomicU64 = AtomicU64::new(0);
        static MDSCR: AtomicU64 = AtomicU64::new(0);
        static CNTP_CVAL: AtomicU64 = AtomicU64::new(0);

        pub fn daif() -> u64 {
            DAIF.load(Ordering::Relaxed)
        }
        pub fn set_daif(value: u64) {
            DAIF.store(value, Ordering::Relaxed);
        }
        pub fn mdscr() -> u64 {
            MDSCR.load(Ordering::Relaxed)
        }
        pub fn set_mdscr(value: u64) {
            MDSCR.store(value, Ordering::Relaxed);
        }
        pub fn cntp_cval() -> u64 {
            CNTP_CVAL.load(Ordering::Relaxed)
        }
    }

    #[cfg(test)]
    mod state {
        use std::cell::Cell;

        std::thread_local! {
            static DAIF: Cell<u64> = const { Cell::new(0) };
            static MDSCR: Cell<u64> = const { Cell::new(0) };
            static CNTP_CVAL: Cell<u64> = const { Cell::new(0) };
        }

        pub fn daif() -> u64 {
            DAIF.with(|c| c.get())
        }
        pub fn set_daif(value: u64) {
            DAIF.with(|c| c.set(value));
        }
        pub fn mdscr() -> u64 {
            MDSCR.with(|c| c.get())
        }
        pub fn set_mdscr(value: u64) {
            MDSCR.with(|c| c.set(value));
        }
        pub fn cntp_cval() -> u64 {
            CNTP_CVAL.with(|c| c.get())
        }
        pub fn set_cntp_cval(value: u64) {
            CNTP_CVAL.with(|c| c.set(value));
        }
    }

    pub fn core_id() -> u32 {
        0
    }

    pub fn save_and_mask_irq() -> u64 {
        let flags = state::daif();
        state::set_daif(flags | DAIF_I);
        flags
    }

    pub fn restore_irq(flags: u64) {
        state::set_daif(flags);
    }

    pub fn mask_irq() {
        state::set_daif(state::daif() | DAIF_I);
    }

    pub fn unmask_irq() {
        state::set_daif(state::daif() & !DAIF_I);
    }

    pub fn irqs_masked() -> bool {
        state::daif() & DAIF_I != 0
    }

    pub fn read_mdscr() -> u64 {
        state::mdscr()
    }

    pub fn write_mdscr(value: u64) {
        state::set_mdscr(value);
    }

    pub fn read_guest_timer_compare() -> u64 {
        state::cntp_cval()
    }

    /// Test hook for the guest timer compare shadow.
    #[cfg(test)]
    pub fn write_guest_timer_compare(value: u64) {
        state::set_cntp_cval(value);
    }

    pub fn isb() {}

    pub fn wfe() {
        core::hint::spin_loop();
    }

    pub fn sev() {}
}

pub use imp::*;

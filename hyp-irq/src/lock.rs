//! Recursive spinlock with IRQ masking.
//!
//! Serializes distributor configuration across cores. The lock is reentrant
//! on the owning core so that nested call paths (the dispatch engine's
//! finalize step running under a configuration API caller, for instance) do
//! not deadlock. Acquisition through [RecursiveSpinlock::lock_mask_irq]
//! records the previous interrupt-mask state; release restores it exactly.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::arch;

const UNOWNED: u32 = u32::MAX;

pub struct RecursiveSpinlock {
    owner: AtomicU32,
    depth: AtomicUsize,
}

impl RecursiveSpinlock {
    pub const fn new() -> Self {
        Self {
            owner: AtomicU32::new(UNOWNED),
            depth: AtomicUsize::new(0),
        }
    }

    /// Acquire without touching the interrupt mask. Only valid where IRQ
    /// delivery is already masked (exception context), otherwise an interrupt
    /// taken while holding the lock could spin on it forever.
    pub fn lock(&self, core_id: u32) -> SpinlockGuard<'_> {
        debug_assert!(arch::irqs_masked());
        self.acquire(core_id);
        SpinlockGuard {
            lock: self,
            saved_mask: None,
        }
    }

    /// Acquire, masking IRQ delivery on this core first; dropping the guard
    /// restores the prior mask state.
    pub fn lock_mask_irq(&self, core_id: u32) -> SpinlockGuard<'_> {
        let flags = arch::save_and_mask_irq();
        self.acquire(core_id);
        SpinlockGuard {
            lock: self,
            saved_mask: Some(flags),
        }
    }

    fn acquire(&self, core_id: u32) {
        debug_assert_ne!(core_id, UNOWNED);
        if self.owner.load(Ordering::Relaxed) == core_id {
            // Nested acquisition on the owning core; only this core can have
            // written its own ID, so the check cannot race.
            self.depth.fetch_add(1, Ordering::Relaxed);
            return;
        }
        while self
            .owner
            .compare_exchange_weak(UNOWNED, core_id, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
        self.depth.store(1, Ordering::Relaxed);
    }

    fn release(&self) {
        if self.depth.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(UNOWNED, Ordering::Release);
        }
    }

    #[cfg(test)]
    fn held_by(&self, core_id: u32) -> bool {
        self.owner.load(Ordering::Relaxed) == core_id
    }
}

impl Default for RecursiveSpinlock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinlockGuard<'a> {
    lock: &'a RecursiveSpinlock,
    saved_mask: Option<u64>,
}

impl Drop for SpinlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
        if let Some(flags) = self.saved_mask {
            arch::restore_irq(flags);
        }
    }
}

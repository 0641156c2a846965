//! Shared test fixtures: in-memory controller frames driven through the real
//! MMIO code paths, plus recording collaborator mocks.

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::vec::Vec;

use gicv2::MmioRegion;

use crate::core_ctx::CoreCtxs;
use crate::exception::ExceptionStackFrame;
use crate::gic::{Gic, GicRegions, IrqManager};
use crate::interfaces::{
    DebugSignals, GuestTimers, TransportRegistry, TransportToken, VirtualGic,
};

pub const GICD_TYPER: usize = 0x004;
pub const GICD_SGIR: usize = 0xF00;
pub const GICD_PIDR2: usize = 0xFE8;
pub const GICD_IPRIORITYR: usize = 0x400;
pub const GICD_ITARGETSR: usize = 0x800;
pub const GICD_ICFGR: usize = 0xC00;
pub const GICD_ISENABLER: usize = 0x100;
pub const GICD_ICPENDR: usize = 0x280;

pub const GICC_CTLR: usize = 0x000;
pub const GICC_PMR: usize = 0x004;
pub const GICC_BPR: usize = 0x008;
pub const GICC_IAR: usize = 0x00C;
pub const GICC_EOIR: usize = 0x010;
pub const GICC_DIR: usize = 0x1000;

pub const GICH_VTR: usize = 0x004;

pub fn poke32(addr: usize, value: u32) {
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
}

pub fn peek32(addr: usize) -> u32 {
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

pub fn peek8(addr: usize) -> u8 {
    unsafe { core::ptr::read_volatile(addr as *const u8) }
}

#[repr(C, align(4096))]
struct Frame<const N: usize>([u8; N]);

/// An [IrqManager] over zeroed in-memory frames emulating a GICv2 with 64
/// shared lines, 4 CPU interfaces and 4 list registers. The in-memory banks
/// hold the last written value; they do not emulate W1S/W1C semantics.
pub struct TestGic {
    pub mgr: IrqManager,
    pub ctxs: CoreCtxs,
    gicd_base: usize,
    gicc_base: usize,
}

impl TestGic {
    pub fn new() -> Self {
        let gicd = Box::leak(Box::new(Frame::<0x1000>([0; 0x1000])));
        let gicc = Box::leak(Box::new(Frame::<0x2000>([0; 0x2000])));
        let gich = Box::leak(Box::new(Frame::<0x200>([0; 0x200])));
        let gicd_base = gicd.0.as_ptr() as usize;
        let gicc_base = gicc.0.as_ptr() as usize;
        let gich_base = gich.0.as_ptr() as usize;

        // Topology: 64 shared lines, 4 CPU interfaces, GICv2 rev, 4 list
        // registers.
        poke32(gicd_base + GICD_TYPER, 0x62);
        poke32(gicd_base + GICD_PIDR2, 2 << 4);
        poke32(gich_base + GICH_VTR, 3);

        let gic = unsafe {
            Gic::new(GicRegions {
                gicd: MmioRegion {
                    base: gicd_base,
                    size: 0x1000,
                },
                gicc: MmioRegion {
                    base: gicc_base,
                    size: 0x2000,
                },
                gich: MmioRegion {
                    base: gich_base,
                    size: 0x200,
                },
            })
        }
        .unwrap();

        Self {
            mgr: IrqManager::new(gic),
            ctxs: CoreCtxs::new(),
            gicd_base,
            gicc_base,
        }
    }

    /// Cold-boot core 0 and bring up interrupt handling on it.
    pub fn init_boot_core(&self) {
        let ctx = self.ctxs.get(0);
        ctx.mark_boot_core();
        self.mgr.init_irq(ctx, &NullVgic);
    }

    pub fn seed_iar(&self, value: u32) {
        poke32(self.gicc_base + GICC_IAR, value);
    }

    pub fn peek_gicc(&self, offset: usize) -> u32 {
        peek32(self.gicc_base + offset)
    }

    pub fn peek_gicd(&self, offset: usize) -> u32 {
        peek32(self.gicd_base + offset)
    }

    pub fn peek_gicd_u8(&self, offset: usize) -> u8 {
        peek8(self.gicd_base + offset)
    }

    pub fn gicc_addr(&self, offset: usize) -> usize {
        self.gicc_base + offset
    }
}

pub struct NullVgic;

impl VirtualGic for NullVgic {
    fn init(&self) {}
    fn enqueue_physical_irq(&self, _id: u16) {}
    fn maintenance_handler(&self) {}
    fn update_state(&self) {}
}

pub struct RecordingVgic {
    pub inits: Cell<u32>,
    pub enqueued: RefCell<Vec<u16>>,
    pub maintenance: Cell<u32>,
    pub updates: Cell<u32>,
}

impl RecordingVgic {
    pub fn new() -> Self {
        Self {
            inits: Cell::new(0),
            enqueued: RefCell::new(Vec::new()),
            maintenance: Cell::new(0),
            updates: Cell::new(0),
        }
    }
}

impl VirtualGic for RecordingVgic {
    fn init(&self) {
        self.inits.set(self.inits.get() + 1);
    }
    fn enqueue_physical_irq(&self, id: u16) {
        self.enqueued.borrow_mut().push(id);
    }
    fn maintenance_handler(&self) {
        self.maintenance.set(self.maintenance.get() + 1);
    }
    fn update_state(&self) {
        self.updates.set(self.updates.get() + 1);
    }
}

pub struct NullTransport;

impl TransportRegistry for NullTransport {
    fn claims_irq(&self, _id: u16) -> bool {
        false
    }
    fn top_half(&self, _id: u16) -> Option<TransportToken> {
        None
    }
    fn bottom_half(&self, _token: TransportToken) {}
}

/// Transport claiming exactly one line, recording both halves.
pub struct ClaimingTransport {
    id: u16,
    pub top_halves: Cell<u32>,
    pub bottom_halves: Cell<u32>,
    /// EOIR content observed by the top half, when armed through
    /// [Self::observe_eoir_at].
    pub eoir_at_top_half: Cell<u32>,
    eoir_addr: Cell<Option<usize>>,
}

impl ClaimingTransport {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            top_halves: Cell::new(0),
            bottom_halves: Cell::new(0),
            eoir_at_top_half: Cell::new(0),
            eoir_addr: Cell::new(None),
        }
    }

    pub fn observe_eoir_at(&self, addr: usize) {
        self.eoir_addr.set(Some(addr));
    }
}

impl TransportRegistry for ClaimingTransport {
    fn claims_irq(&self, id: u16) -> bool {
        id == self.id
    }
    fn top_half(&self, id: u16) -> Option<TransportToken> {
        if id != self.id {
            return None;
        }
        if let Some(addr) = self.eoir_addr.get() {
            self.eoir_at_top_half.set(peek32(addr));
        }
        self.top_halves.set(self.top_halves.get() + 1);
        Some(TransportToken(usize::from(id)))
    }
    fn bottom_half(&self, token: TransportToken) {
        assert_eq!(token, TransportToken(usize::from(self.id)));
        self.bottom_halves.set(self.bottom_halves.get() + 1);
    }
}

pub struct MockDebug {
    pub pauses: RefCell<Vec<u32>>,
    pub exec_calls: RefCell<Vec<u32>>,
}

impl MockDebug {
    pub fn new() -> Self {
        Self {
            pauses: RefCell::new(Vec::new()),
            exec_calls: RefCell::new(Vec::new()),
        }
    }
}

impl DebugSignals for MockDebug {
    fn pause_handler(&self, src_core: u32) {
        self.pauses.borrow_mut().push(src_core);
    }
    fn execute_function_handler(&self, src_core: u32) {
        self.exec_calls.borrow_mut().push(src_core);
    }
}

pub struct MockTimers {
    vct: Cell<u64>,
    pub rescheduled: RefCell<Vec<u64>>,
    pub hyp_timer_fires: Cell<u32>,
}

impl MockTimers {
    pub fn with_virtual_count(vct: u64) -> Self {
        Self {
            vct: Cell::new(vct),
            rescheduled: RefCell::new(Vec::new()),
            hyp_timer_fires: Cell::new(0),
        }
    }

    pub fn set_virtual_count(&self, vct: u64) {
        self.vct.set(vct);
    }
}

impl GuestTimers for MockTimers {
    fn interrupt_handler(&self) {
        self.hyp_timer_fires.set(self.hyp_timer_fires.get() + 1);
    }
    fn current_virtual_count(&self, _frame: &ExceptionStackFrame) -> u64 {
        self.vct.get()
    }
    fn write_emulated_compare(&self, _frame: &mut ExceptionStackFrame, cval: u64) {
        self.rescheduled.borrow_mut().push(cval);
    }
}

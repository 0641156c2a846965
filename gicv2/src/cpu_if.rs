//! # CPU interface (GICC) register block.
use arbitrary_int::{u3, u10};
use static_assertions::const_assert_eq;

use crate::{MmioRegion, RegionError, check_region};

/// CPU Interface Control Register (GICC_CTLR), non-secure view.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct CpuInterfaceControl {
    /// Split completion: EOIR only drops the running priority, retirement
    /// requires a separate DIR write.
    #[bit(9, rw)]
    eoi_mode_ns: bool,
    /// Signaling of pending interrupts to the core.
    #[bit(0, rw)]
    enable: bool,
}

/// Priority Mask Register (GICC_PMR).
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct PriorityMask {
    /// Only interrupts with a priority strictly higher (numerically lower)
    /// than this value are signaled to the core.
    #[bits(0..=7, rw)]
    priority: u8,
}

/// Binary Point Register (GICC_BPR).
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct BinaryPoint {
    /// Split between the group and subpriority priority fields; 7 disables
    /// preemption entirely.
    #[bits(0..=2, rw)]
    binary_point: u3,
}

/// Layout shared by the acknowledge, EOI and deactivate registers.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct InterruptSignal {
    /// Requesting core, valid for software-generated interrupts only.
    #[bits(10..=12, rw)]
    cpu_id: u3,
    #[bits(0..=9, rw)]
    int_id: u10,
}

/// GIC CPU interface registers, banked per core.
///
/// Reading [iar](GicCpuInterface::iar) acknowledges the highest-priority
/// pending interrupt (pending goes to active). With
/// [eoi_mode_ns](CpuInterfaceControl::eoi_mode_ns) set, writing
/// [eoir](GicCpuInterface::eoir) performs the priority drop only and the
/// interrupt stays active until the same value is written to
/// [dir](GicCpuInterface::dir).
#[derive(derive_mmio::Mmio)]
#[repr(C, align(8))]
pub struct GicCpuInterface {
    /// CPU Interface Control Register.
    pub ctlr: CpuInterfaceControl,
    /// Interrupt Priority Mask Register.
    pub pmr: PriorityMask,
    /// Binary Point Register.
    pub bpr: BinaryPoint,
    /// Interrupt Acknowledge Register. Reads have side effects.
    pub iar: InterruptSignal,
    /// End of Interrupt Register (priority drop in split EOI mode).
    pub eoir: InterruptSignal,
    /// Running Priority Register.
    #[mmio(PureRead)]
    pub rpr: PriorityMask,
    /// Highest Priority Pending Interrupt Register.
    #[mmio(PureRead)]
    pub hppir: InterruptSignal,
    /// Aliased Binary Point Register.
    pub abpr: BinaryPoint,
    /// Aliased Interrupt Acknowledge Register (group 1).
    pub aiar: InterruptSignal,
    /// Aliased End of Interrupt Register (group 1).
    pub aeoir: InterruptSignal,
    /// Aliased Highest Priority Pending Interrupt Register (group 1).
    #[mmio(PureRead)]
    pub ahppir: InterruptSignal,
    _reserved_0: [u32; 0x29],
    /// Active Priorities Registers.
    pub apr: [u32; 0x4],
    /// Non-secure Active Priorities Registers.
    pub nsapr: [u32; 0x4],
    _reserved_1: [u32; 0x3],
    /// CPU Interface Identification Register.
    #[mmio(PureRead)]
    pub iidr: u32,
    _reserved_2: [u32; 0x3C0],
    /// Deactivate Interrupt Register, used to retire an interrupt after a
    /// split-EOI priority drop.
    pub dir: InterruptSignal,
    _reserved_3: [u32; 0x3FF],
}

const_assert_eq!(core::mem::size_of::<GicCpuInterface>(), 0x2000);

impl GicCpuInterface {
    /// Create a CPU interface MMIO instance over a platform-reported frame.
    ///
    /// # Safety
    ///
    /// The region must map the (banked) CPU interface frame of a real GICv2,
    /// or memory emulating one in tests. This API can create aliasing
    /// instances of the same peripheral; the caller must ensure concurrent
    /// accesses do not interfere with each other.
    pub unsafe fn new_mmio_checked(
        region: MmioRegion,
    ) -> Result<MmioGicCpuInterface<'static>, RegionError> {
        check_region(region, core::mem::size_of::<Self>())?;
        Ok(unsafe { Self::new_mmio_at(region.base) })
    }
}

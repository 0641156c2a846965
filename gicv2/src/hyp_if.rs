//! # Virtual interface control (GICH) register block.
use arbitrary_int::{u2, u3, u5, u6, u10};
use static_assertions::const_assert_eq;

use crate::{MmioRegion, RegionError, check_region};

/// Hypervisor Control Register (GICH_HCR).
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct HypControl {
    /// No-pending maintenance interrupt enable.
    #[bit(3, rw)]
    npie: bool,
    /// List-register-entry-not-present maintenance interrupt enable.
    #[bit(2, rw)]
    lrenpie: bool,
    /// Underflow maintenance interrupt enable.
    #[bit(1, rw)]
    uie: bool,
    /// Virtual CPU interface operation enable.
    #[bit(0, rw)]
    en: bool,
}

/// VGIC Type Register (GICH_VTR). Read-only topology.
#[bitbybit::bitfield(u32, debug)]
pub struct VtrRegister {
    /// Implemented virtual priority bits, minus one.
    #[bits(29..=31, r)]
    pri_bits: u3,
    /// Implemented virtual preemption bits, minus one.
    #[bits(26..=28, r)]
    pre_bits: u3,
    /// Implemented list registers, minus one.
    #[bits(0..=5, r)]
    list_regs: u6,
}

/// List register (GICH_LRn): one virtual interrupt presented to the guest.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct ListRegister {
    /// Hardware interrupt: deactivation of the virtual interrupt also
    /// deactivates the physical line named by `physical_id`.
    #[bit(31, rw)]
    hw: bool,
    #[bit(30, rw)]
    group1: bool,
    /// 00 invalid, 01 pending, 10 active, 11 pending-and-active.
    #[bits(28..=29, rw)]
    state: u2,
    #[bits(23..=27, rw)]
    priority: u5,
    #[bits(10..=19, rw)]
    physical_id: u10,
    #[bits(0..=9, rw)]
    virtual_id: u10,
}

/// GIC virtual interface control registers, banked per core.
#[derive(derive_mmio::Mmio)]
#[repr(C, align(8))]
pub struct GicHypInterface {
    /// Hypervisor Control Register.
    pub hcr: HypControl,
    /// VGIC Type Register.
    #[mmio(PureRead)]
    pub vtr: VtrRegister,
    /// Virtual Machine Control Register.
    pub vmcr: u32,
    _reserved_0: u32,
    /// Maintenance Interrupt Status Register.
    #[mmio(PureRead)]
    pub misr: u32,
    _reserved_1: [u32; 0x3],
    /// End of Interrupt Status Registers.
    pub eisr0: u32,
    pub eisr1: u32,
    _reserved_2: [u32; 0x2],
    /// Empty List Register Status Registers.
    pub elsr0: u32,
    pub elsr1: u32,
    _reserved_3: [u32; 0x2E],
    /// Active Priorities Register.
    pub apr: u32,
    _reserved_4: [u32; 0x3],
    /// List Registers.
    pub lr: [ListRegister; 0x40],
}

const_assert_eq!(core::mem::size_of::<GicHypInterface>(), 0x200);

impl GicHypInterface {
    /// Create a virtual interface control MMIO instance over a
    /// platform-reported frame.
    ///
    /// # Safety
    ///
    /// The region must map the (banked) GICH frame of a real GICv2 with the
    /// virtualization extensions, or memory emulating one in tests. This API
    /// can create aliasing instances of the same peripheral; the caller must
    /// ensure concurrent accesses do not interfere with each other.
    pub unsafe fn new_mmio_checked(
        region: MmioRegion,
    ) -> Result<MmioGicHypInterface<'static>, RegionError> {
        check_region(region, core::mem::size_of::<Self>())?;
        Ok(unsafe { Self::new_mmio_at(region.base) })
    }
}

//! # Distributor (GICD) register block.
use arbitrary_int::{Number, u3, u4, u5};
use static_assertions::const_assert_eq;

use crate::{MmioRegion, RegionError, check_region};

/// Distributor Control Register (GICD_CTLR), non-secure view.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct DistributorControl {
    /// Global forwarding of pending interrupts to the CPU interfaces.
    #[bit(0, rw)]
    enable: bool,
}

/// Interrupt Controller Type Register (GICD_TYPER). Read-only topology.
#[bitbybit::bitfield(u32, debug)]
pub struct TypeRegister {
    /// Number of lockable SPIs (Security Extensions only).
    #[bits(11..=15, r)]
    lspi: u5,
    #[bit(10, r)]
    security_extensions: bool,
    /// Number of implemented CPU interfaces, minus one.
    #[bits(5..=7, r)]
    cpu_number: u3,
    /// Shared interrupt lines are `32 * it_lines_number`, up to 1020 total.
    #[bits(0..=4, r)]
    it_lines_number: u5,
}

/// Target-list filter field of [SoftwareGeneratedInterrupt].
#[bitbybit::bitenum(u2, exhaustive = true)]
#[derive(Debug, PartialEq, Eq)]
pub enum SgiTargetFilter {
    /// Forward to the CPU interfaces named in the target list.
    TargetList = 0b00,
    /// Forward to every CPU interface except the requester's.
    AllOthers = 0b01,
    /// Forward to the requesting CPU interface only.
    SelfOnly = 0b10,
    Reserved = 0b11,
}

/// Software Generated Interrupt Register (GICD_SGIR). Write-only trigger.
#[bitbybit::bitfield(u32, default = 0x0, debug)]
pub struct SoftwareGeneratedInterrupt {
    #[bits(24..=25, rw)]
    target_list_filter: SgiTargetFilter,
    #[bits(16..=23, rw)]
    cpu_target_list: u8,
    /// Group of the forwarded SGI (Security Extensions only).
    #[bit(15, rw)]
    nsatt: bool,
    #[bits(0..=3, rw)]
    sgi_int_id: u4,
}

/// Peripheral ID 2 (ICPIDR2); the architecture revision identifies GICv2.
#[bitbybit::bitfield(u32, debug)]
pub struct PeripheralId2 {
    #[bits(4..=7, r)]
    arch_rev: u4,
}

/// GIC distributor registers.
///
/// The enable/pending/active banks are write-1-to-set / write-1-to-clear;
/// the priority and target banks are byte-accessible, one byte per line.
/// The first 32 lines of every bank are banked per CPU interface.
#[derive(derive_mmio::Mmio)]
#[repr(C, align(8))]
pub struct GicDistributor {
    /// Distributor Control Register.
    pub ctlr: DistributorControl,
    /// Interrupt Controller Type Register.
    #[mmio(PureRead)]
    pub typer: TypeRegister,
    /// Distributor Implementer Identification Register.
    #[mmio(PureRead)]
    pub iidr: u32,
    _reserved_0: [u32; 0x1D],
    /// Interrupt Group Registers.
    pub igroupr: [u32; 0x20],
    /// Interrupt Set-Enable Registers.
    pub isenabler: [u32; 0x20],
    /// Interrupt Clear-Enable Registers.
    pub icenabler: [u32; 0x20],
    /// Interrupt Set-Pending Registers.
    pub ispendr: [u32; 0x20],
    /// Interrupt Clear-Pending Registers.
    pub icpendr: [u32; 0x20],
    /// Interrupt Set-Active Registers.
    pub isactiver: [u32; 0x20],
    /// Interrupt Clear-Active Registers.
    pub icactiver: [u32; 0x20],
    /// Interrupt Priority Registers, one byte per line. Unimplemented
    /// low-order priority bits are RAZ/WI.
    pub ipriorityr: [u8; 0x3FC],
    _reserved_1: [u8; 0x4],
    /// Interrupt Processor Targets Registers, one byte per line. The first
    /// 32 entries are read-only and report the reading core's own bit.
    pub itargetsr: [u8; 0x3FC],
    _reserved_2: [u8; 0x4],
    /// Interrupt Configuration Registers, 2 bits per line (edge/level).
    pub icfgr: [u32; 0x40],
    _reserved_3: [u32; 0x80],
    /// Software Generated Interrupt Register.
    pub sgir: SoftwareGeneratedInterrupt,
    _reserved_4: [u32; 0x3],
    /// SGI Clear-Pending Registers.
    pub cpendsgir: [u32; 0x4],
    /// SGI Set-Pending Registers.
    pub spendsgir: [u32; 0x4],
    _reserved_5: [u32; 0x28],
    pub pidr_4: u32,
    pub pidr_5: u32,
    pub pidr_6: u32,
    pub pidr_7: u32,
    pub pidr_0: u32,
    pub pidr_1: u32,
    /// Peripheral ID 2, holds the GIC architecture revision.
    #[mmio(PureRead)]
    pub pidr_2: PeripheralId2,
    pub pidr_3: u32,
    pub cidr: [u32; 4],
}

const_assert_eq!(core::mem::size_of::<GicDistributor>(), 0x1000);

impl GicDistributor {
    /// Create a distributor MMIO instance over a platform-reported frame,
    /// validating alignment, size and the reported architecture revision.
    ///
    /// # Safety
    ///
    /// The region must map the distributor frame of a real GICv2 (or, in
    /// tests, memory that emulates one). This API can create aliasing
    /// instances of the same peripheral; the caller must ensure concurrent
    /// accesses do not interfere with each other.
    pub unsafe fn new_mmio_checked(
        region: MmioRegion,
    ) -> Result<MmioGicDistributor<'static>, RegionError> {
        check_region(region, core::mem::size_of::<Self>())?;
        let mmio = unsafe { Self::new_mmio_at(region.base) };
        let arch_rev = mmio.read_pidr_2().arch_rev().as_u8();
        if arch_rev != 2 {
            return Err(RegionError::UnsupportedRevision(arch_rev));
        }
        Ok(mmio)
    }
}

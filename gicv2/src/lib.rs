//! # Register model for the Arm Generic Interrupt Controller v2
//!
//! Fixed-layout MMIO register blocks for the three frames a non-secure
//! hypervisor programs directly:
//!
//! - [dist::GicDistributor], the shared distributor (GICD),
//! - [cpu_if::GicCpuInterface], the banked per-core CPU interface (GICC),
//!   including the deactivate register used in split EOI mode,
//! - [hyp_if::GicHypInterface], the virtual interface control block (GICH)
//!   owning the list registers.
//!
//! The blocks have no fixed base address; platform code discovers the frames
//! (device tree or a platform constant) and constructs the MMIO handles from
//! a validated [MmioRegion].
#![no_std]

pub mod cpu_if;
pub mod dist;
pub mod hyp_if;

pub use cpu_if::{CpuInterfaceControl, GicCpuInterface, InterruptSignal, MmioGicCpuInterface};
pub use dist::{
    DistributorControl, GicDistributor, MmioGicDistributor, SgiTargetFilter,
    SoftwareGeneratedInterrupt, TypeRegister,
};
pub use hyp_if::{GicHypInterface, MmioGicHypInterface, VtrRegister};

/// Reserved "no interrupt pending" ID returned by the acknowledge register.
pub const SPURIOUS_INTERRUPT_ID: u16 = 1023;

/// A memory-mapped register frame as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmioRegion {
    pub base: usize,
    pub size: usize,
}

/// Rejected MMIO region or an unexpected controller identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("region base {base:#x} is not aligned to {required:#x}")]
    Misaligned { base: usize, required: usize },
    #[error("region size {size:#x} does not match the register block size {required:#x}")]
    SizeMismatch { size: usize, required: usize },
    #[error("distributor reports architecture revision {0}, expected 2")]
    UnsupportedRevision(u8),
}

pub(crate) fn check_region(region: MmioRegion, required_size: usize) -> Result<(), RegionError> {
    if region.base % 0x1000 != 0 {
        return Err(RegionError::Misaligned {
            base: region.base,
            required: 0x1000,
        });
    }
    if region.size != required_size {
        return Err(RegionError::SizeMismatch {
            size: region.size,
            required: required_size,
        });
    }
    Ok(())
}

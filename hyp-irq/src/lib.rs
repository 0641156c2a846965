//! # Interrupt virtualization core for an Armv8-A EL2 hypervisor
//!
//! This crate owns the physical GICv2 and decides, for every trapped
//! interrupt, whether it is handled by the hypervisor itself, forwarded into
//! the guest's virtual interrupt controller, or consumed as controller
//! maintenance. It also carries the privileged debug plumbing the dispatch
//! path must interoperate with: single-instruction stepping and the
//! SGI-based whole-machine pause protocol.
//!
//! The virtual distributor model, the transport registry, the debug manager
//! and the timer subsystem are external collaborators reached through the
//! traits in [interfaces].
//!
//! All process-wide state is explicit: one [gic::IrqManager] plus one
//! [core_ctx::CoreCtxs] array, constructed at startup and passed by
//! reference into every entry point.
#![no_std]

#[cfg(test)]
extern crate std;

pub mod arch;
pub mod core_ctx;
pub mod dispatch;
pub mod exception;
pub mod gic;
mod guest_timer;
pub mod interfaces;
pub mod lock;
pub mod pause;
pub mod single_step;

#[cfg(test)]
mod test_util;

pub use dispatch::{IrqHooks, handle_irq_exception};
pub use gic::{Gic, GicRegions, IrqManager};

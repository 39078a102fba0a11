// SPDX-License-Identifier: MPL-2.0

//! The device access layer for PCIe ASIC drivers.
//!
//! The layer solves two problems a switch-class device driver cannot
//! avoid: handing the chip large physically-contiguous DMA windows on
//! hosts that only hand out scattered pages, and fanning a handful of
//! hardware interrupt lines out to kernel consumers, chained consumers
//! and user-space waiters.
//!
//! The DMA side assembles windows out of independently allocated blocks
//! by hunting for the largest run of address-adjacent blocks in a pool
//! that grows on demand ([`mm::dma`]), then slices each window into
//! descriptor and data zones with a first-fit interval allocator
//! ([`mm::mpool`]). The interrupt side multiplexes up to
//! [`irq::IRQ_SLOT_COUNT`] lines per device instance and follows the
//! device between legacy lines and MSI vector ranges ([`irq::msi`]).
//!
//! Everything host-specific sits behind the traits in [`hal`]; a
//! [`Device`] instance owns one implementation of each and shares no
//! state with other instances.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;
#[cfg(test)]
extern crate std;

pub mod abi;
mod device;
mod error;
pub mod hal;
pub mod irq;
pub mod mm;
#[cfg(test)]
mod mock;
pub mod prelude;

pub use self::{
    device::Device,
    error::Error,
    irq::{msi::MsiInfo, IrqMode, IrqRegistration, WaitStatus},
    mm::{DmaRegion, Mpool, ZoneKind},
    prelude::Result,
};

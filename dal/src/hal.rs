// SPDX-License-Identifier: MPL-2.0

//! Host abstraction layer.
//!
//! The device access layer does not talk to the host OS directly. Every
//! service it needs from its surroundings (the physical-page allocator,
//! uncached device mappings, the interrupt controller, the MSI capability
//! of the device, and a monotonic clock) is reached through one of the
//! traits below. A [`Device`] instance owns one implementation of each,
//! so two instances backed by different hosts never share state.
//!
//! [`Device`]: crate::Device

use alloc::sync::Arc;
use core::time::Duration;

use crate::prelude::*;

/// Type alias for the interrupt dispatch shim installed with the host
/// interrupt controller.
///
/// The shim is invoked in interrupt context: it must not block and must
/// not allocate.
pub type IrqDispatchFn = dyn Fn() + Send + Sync + 'static;

/// Host physical memory services.
///
/// Pages are requested in power-of-two batches (`order` pages of
/// 2<sup>order</sup> × [`PAGE_SIZE`] bytes), mirroring how host page
/// allocators hand out memory. A returned base address is always aligned
/// to the batch size.
///
/// [`PAGE_SIZE`]: crate::mm::PAGE_SIZE
pub trait HostMem: Send + Sync {
    /// Allocates `2^order` physically contiguous pages.
    ///
    /// Returns `None` when the host allocator has no such batch free.
    fn alloc_pages(&self, order: u32) -> Option<Paddr>;

    /// Returns a page batch previously obtained from [`Self::alloc_pages`].
    fn free_pages(&self, paddr: Paddr, order: u32);

    /// Marks a page batch reserved: non-swappable and non-reclaimable for
    /// as long as the reservation holds.
    fn reserve_pages(&self, paddr: Paddr, order: u32);

    /// Drops the reservation made by [`Self::reserve_pages`].
    fn unreserve_pages(&self, paddr: Paddr, order: u32);

    /// Total bytes of host RAM, used as the hard ceiling on pool growth.
    fn total_ram(&self) -> usize;

    /// Establishes an uncached, device-visible virtual mapping over a
    /// physically contiguous range.
    fn map_uncached(&self, paddr: Paddr, len: usize) -> Vaddr;

    /// Tears down a mapping established by [`Self::map_uncached`].
    fn unmap(&self, vaddr: Vaddr, len: usize);
}

/// Host interrupt controller services.
///
/// All methods may be called from process context; `mask` is additionally
/// called from the dispatch shim in interrupt context and must be
/// non-blocking.
pub trait IrqChip: Send + Sync {
    /// Installs `shim` as the handler for the physical line `irq`.
    ///
    /// The controller invokes the shim, in interrupt context, each time
    /// the line fires.
    fn install(&self, irq: u32, shim: Arc<IrqDispatchFn>) -> Result<()>;

    /// Removes the shim installed for `irq` and releases the line.
    fn remove(&self, irq: u32);

    /// Masks the physical line.
    fn mask(&self, irq: u32);

    /// Unmasks the physical line.
    fn unmask(&self, irq: u32);
}

/// The MSI/MSI-X capability of the device.
pub trait MsiConfig: Send + Sync {
    /// Enables MSI with `count` vectors and returns the base vector
    /// granted by the device.
    ///
    /// Fails with [`Error::Unsupported`] if the device cannot honor
    /// `count`.
    fn enable(&self, count: u32) -> Result<u32>;

    /// Disables MSI, reverting the device to legacy line interrupts.
    fn disable(&self);
}

/// A monotonic clock, used to honor `wait` timeouts.
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn monotonic(&self) -> Duration;

    /// Invoked between polls of the trigger flag while waiting.
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

// SPDX-License-Identifier: MPL-2.0

//! The per-instance control-plane surface.

use core::time::Duration;

use spin::Mutex;

use crate::{
    hal::{Clock, HostMem, IrqChip, MsiConfig},
    irq::{
        msi::{MsiController, MsiInfo},
        IrqHandlerFn, IrqMode, IrqMux, IrqRegistration, WaitStatus,
    },
    mm::{DmaRegion, RegionList},
    prelude::*,
};

struct DeviceInner {
    regions: RegionList,
    irq: IrqMux,
    msi: MsiController,
}

/// One device instance of the access layer.
///
/// The instance owns all of its state: the region list, the interrupt
/// slot table and the MSI assignment. Two instances never share
/// anything, and one exclusive lock per instance serializes the
/// process-context operations. The interrupt dispatch path never takes
/// that lock.
///
/// Nothing is released automatically: callers drive `free_dma_region`,
/// `unregister_interrupt` and [`Self::shutdown`] explicitly on every
/// exit path.
pub struct Device {
    mem: Arc<dyn HostMem>,
    msi_cfg: Arc<dyn MsiConfig>,
    clock: Arc<dyn Clock>,
    inner: Mutex<DeviceInner>,
}

impl Device {
    /// Brings up an instance on top of the given host services.
    pub fn new(
        mem: Arc<dyn HostMem>,
        chip: Arc<dyn IrqChip>,
        msi_cfg: Arc<dyn MsiConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mem,
            msi_cfg,
            clock,
            inner: Mutex::new(DeviceInner {
                regions: RegionList::new(),
                irq: IrqMux::new(chip),
                msi: MsiController::new(),
            }),
        }
    }

    /// Allocates a DMA region of `size` bytes assembled from blocks of
    /// roughly `block_hint` bytes.
    ///
    /// The returned region may be shorter than requested; callers must
    /// check [`DmaRegion::size`].
    pub fn alloc_dma_region(&self, size: usize, block_hint: usize) -> Result<DmaRegion> {
        self.inner
            .lock()
            .regions
            .alloc(self.mem.as_ref(), size, block_hint)
    }

    /// Releases the region whose virtual base is `vaddr`.
    pub fn free_dma_region(&self, vaddr: Vaddr) -> Result<()> {
        self.inner.lock().regions.free(self.mem.as_ref(), vaddr)
    }

    /// Total bytes held by live DMA regions.
    pub fn dma_usage(&self) -> usize {
        self.inner.lock().regions.usage()
    }

    /// The number of live DMA regions.
    pub fn dma_region_count(&self) -> usize {
        self.inner.lock().regions.len()
    }

    /// Registers a consumer of the interrupt line `irq`.
    pub fn register_interrupt(
        &self,
        irq: u32,
        mode: IrqMode,
        primary: Option<Box<IrqHandlerFn>>,
    ) -> Result<IrqRegistration> {
        self.inner.lock().irq.register(irq, mode, primary)
    }

    /// Drops one registration of the line `irq`.
    pub fn unregister_interrupt(&self, irq: u32) -> Result<()> {
        self.inner.lock().irq.unregister(irq)
    }

    /// Attaches a chained handler observing `irq` alongside the primary.
    pub fn connect_secondary(&self, irq: u32, handler: Box<IrqHandlerFn>) -> Result<()> {
        self.inner.lock().irq.connect_secondary(irq, handler)
    }

    /// Detaches the chained handler of `irq`.
    pub fn disconnect_secondary(&self, irq: u32) -> Result<()> {
        self.inner.lock().irq.disconnect_secondary(irq)
    }

    /// Masks or unmasks `irq` without touching its registration.
    pub fn set_interrupt_enable(&self, irq: u32, enabled: bool) -> Result<()> {
        self.inner.lock().irq.set_enabled(irq, enabled)
    }

    /// Blocks until `irq` triggers or `timeout` elapses.
    ///
    /// The device lock is dropped before blocking, so other threads keep
    /// allocating and registering while a waiter sleeps.
    pub fn wait_interrupt(&self, irq: u32, timeout: Duration) -> Result<WaitStatus> {
        let shared = self.inner.lock().irq.shared(irq)?;
        Ok(shared.wait(self.clock.as_ref(), timeout))
    }

    /// Whether `irq` has an unconsumed trigger, for pollers that cannot
    /// block.
    pub fn interrupt_pending(&self, irq: u32) -> Result<bool> {
        Ok(self.inner.lock().irq.shared(irq)?.pending())
    }

    /// Switches the device to `count` MSI vectors (0 reverts to legacy
    /// lines) and reports the resulting assignment.
    pub fn set_msi_vector_count(&self, count: u32) -> Result<MsiInfo> {
        let inner = &mut *self.inner.lock();
        inner
            .msi
            .set_vector_count(self.msi_cfg.as_ref(), &mut inner.irq, count)
    }

    /// The current MSI vector assignment.
    pub fn msi_info(&self) -> MsiInfo {
        self.inner.lock().msi.info()
    }

    /// Releases every live region, interrupt slot and the MSI
    /// assignment. The module-exit path of the hosting driver.
    pub fn shutdown(&self) {
        let inner = &mut *self.inner.lock();
        inner.irq.release_all();
        if inner.msi.info().count > 0 {
            self.msi_cfg.disable();
            inner.msi = MsiController::new();
        }
        inner.regions.free_all(self.mem.as_ref());
        log::debug!("device shut down");
    }
}

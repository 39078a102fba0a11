// SPDX-License-Identifier: MPL-2.0

//! Demultiplexing of hardware interrupt lines.
//!
//! Up to [`IRQ_SLOT_COUNT`] lines are owned per device instance. A line
//! may carry one kernel-mode primary handler, one secondary (chained)
//! handler piggybacking on the same line, and an implicit user-space
//! waiter. The dispatch shim installed with the host controller runs in
//! interrupt context: it never takes the device lock, only reads its own
//! slot's handler table, sets the trigger flag and lets the waiter
//! observe it.

pub mod msi;

use core::{
    ops::Range,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use id_alloc::IdAlloc;
use spin::Mutex;

use crate::{
    hal::{Clock, IrqChip},
    prelude::*,
};

/// The number of interrupt slots per device instance.
pub const IRQ_SLOT_COUNT: usize = 8;

/// Type alias for interrupt handler functions.
///
/// Handlers are invoked in interrupt context and must neither block nor
/// allocate.
pub type IrqHandlerFn = dyn Fn() + Send + Sync + 'static;

bitflags::bitflags! {
    /// How an interrupt line is consumed.
    pub struct IrqMode: u32 {
        /// A kernel-mode consumer supplying a primary handler.
        const KERNEL = 1 << 0;
        /// A user-space consumer observing the line through `wait`.
        const USER = 1 << 1;
    }
}

/// The outcome of a `wait` on an interrupt line.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WaitStatus {
    /// The line fired and the trigger flag was consumed.
    Triggered,
    /// The timeout elapsed first.
    TimedOut,
}

/// A registration token for one `register` call.
///
/// The token is deliberately inert: releasing the line stays an explicit
/// `unregister` call, matching the rule that no resource of this crate
/// is reclaimed by a finalizer.
#[must_use]
#[derive(Debug)]
pub struct IrqRegistration {
    irq: u32,
}

impl IrqRegistration {
    /// The line this registration refers to.
    pub fn irq(&self) -> u32 {
        self.irq
    }
}

#[derive(Default)]
struct SlotHandlers {
    primary: Option<Arc<IrqHandlerFn>>,
    secondary: Option<Arc<IrqHandlerFn>>,
}

/// The slot state shared with the dispatch shim.
pub(crate) struct SlotShared {
    irq_num: u32,
    triggered: AtomicBool,
    handlers: Mutex<SlotHandlers>,
}

impl SlotShared {
    fn new(irq_num: u32) -> Self {
        Self {
            irq_num,
            triggered: AtomicBool::new(false),
            handlers: Mutex::new(SlotHandlers::default()),
        }
    }

    /// The dispatch shim body, run in interrupt context.
    ///
    /// A trigger arriving while one is already pending is dropped, not
    /// queued; consumers re-arm explicitly before the next event is
    /// observable. Otherwise the line is masked before any consumer runs
    /// so a storm cannot re-enter ahead of the acknowledgment.
    pub(crate) fn dispatch(&self, chip: &dyn IrqChip) {
        if self.triggered.load(Ordering::Acquire) {
            return;
        }
        chip.mask(self.irq_num);
        let (primary, secondary) = {
            let handlers = self.handlers.lock();
            (handlers.primary.clone(), handlers.secondary.clone())
        };
        let mut consumed = false;
        if let Some(handler) = primary {
            handler();
            consumed = true;
        }
        if let Some(handler) = secondary {
            handler();
            consumed = true;
        }
        if !consumed {
            self.triggered.store(true, Ordering::Release);
        }
    }

    /// Blocks until the trigger flag is set or `timeout` elapses,
    /// consuming the flag on wake.
    pub(crate) fn wait(&self, clock: &dyn Clock, timeout: Duration) -> WaitStatus {
        let deadline = clock.monotonic() + timeout;
        loop {
            if self.triggered.swap(false, Ordering::AcqRel) {
                return WaitStatus::Triggered;
            }
            if clock.monotonic() >= deadline {
                return WaitStatus::TimedOut;
            }
            clock.relax();
        }
    }

    pub(crate) fn pending(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }
}

struct IrqSlot {
    irq_num: u32,
    slot_id: usize,
    refs: usize,
    mode: IrqMode,
    enabled: bool,
    shared: Arc<SlotShared>,
}

/// The fixed table of interrupt slots of one device instance.
///
/// All mutating methods run under the owning device's lock; only the
/// dispatch shims reached through [`SlotShared`] run outside it.
pub(crate) struct IrqMux {
    chip: Arc<dyn IrqChip>,
    slots: [Option<IrqSlot>; IRQ_SLOT_COUNT],
    ids: IdAlloc,
}

impl IrqMux {
    pub(crate) fn new(chip: Arc<dyn IrqChip>) -> Self {
        Self {
            chip,
            slots: core::array::from_fn(|_| None),
            ids: IdAlloc::with_capacity(IRQ_SLOT_COUNT),
        }
    }

    fn slot(&self, irq: u32) -> Option<&IrqSlot> {
        self.slots
            .iter()
            .flatten()
            .find(|slot| slot.irq_num == irq)
    }

    fn slot_mut(&mut self, irq: u32) -> Option<&mut IrqSlot> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|slot| slot.irq_num == irq)
    }

    /// Takes, or takes another reference on, the slot for `irq`.
    ///
    /// The first registration installs the dispatch shim with the host
    /// controller; later ones only bump the reference count. A primary
    /// handler is recorded only if the slot has none yet; trying to
    /// install a second one fails with [`Error::AlreadyRegistered`] and
    /// leaves the slot untouched.
    pub(crate) fn register(
        &mut self,
        irq: u32,
        mode: IrqMode,
        primary: Option<Box<IrqHandlerFn>>,
    ) -> Result<IrqRegistration> {
        if mode.is_empty() || (mode.contains(IrqMode::KERNEL) != primary.is_some()) {
            return Err(Error::InvalidArgs);
        }

        if let Some(slot) = self.slot_mut(irq) {
            if let Some(handler) = primary {
                let mut handlers = slot.shared.handlers.lock();
                if handlers.primary.is_some() {
                    return Err(Error::AlreadyRegistered);
                }
                handlers.primary = Some(Arc::from(handler));
            }
            slot.refs += 1;
            slot.mode |= mode;
            return Ok(IrqRegistration { irq });
        }

        let slot_id = self.ids.alloc().ok_or(Error::NotEnoughResources)?;
        let shared = Arc::new(SlotShared::new(irq));
        if let Some(handler) = primary {
            shared.handlers.lock().primary = Some(Arc::from(handler));
        }

        let shim = {
            let chip = self.chip.clone();
            let shared = shared.clone();
            Arc::new(move || shared.dispatch(chip.as_ref()))
        };
        if let Err(e) = self.chip.install(irq, shim) {
            self.ids.free(slot_id);
            return Err(e);
        }

        log::debug!("irq {}: slot {} taken, mode {:?}", irq, slot_id, mode);
        self.slots[slot_id] = Some(IrqSlot {
            irq_num: irq,
            slot_id,
            refs: 1,
            mode,
            enabled: true,
            shared,
        });
        Ok(IrqRegistration { irq })
    }

    /// Drops one reference on the slot for `irq`, releasing the physical
    /// line when the count reaches zero.
    pub(crate) fn unregister(&mut self, irq: u32) -> Result<()> {
        let slot = self.slot_mut(irq).ok_or(Error::NotRegistered)?;
        slot.refs -= 1;
        if slot.refs > 0 {
            return Ok(());
        }
        let slot_id = slot.slot_id;
        self.chip.remove(irq);
        self.ids.free(slot_id);
        self.slots[slot_id] = None;
        log::debug!("irq {}: slot {} released", irq, slot_id);
        Ok(())
    }

    /// Attaches the chained handler to an already-registered slot,
    /// replacing any previous one.
    pub(crate) fn connect_secondary(
        &mut self,
        irq: u32,
        handler: Box<IrqHandlerFn>,
    ) -> Result<()> {
        let slot = self.slot(irq).ok_or(Error::NotRegistered)?;
        slot.shared.handlers.lock().secondary = Some(Arc::from(handler));
        Ok(())
    }

    /// Detaches the chained handler.
    pub(crate) fn disconnect_secondary(&mut self, irq: u32) -> Result<()> {
        let slot = self.slot(irq).ok_or(Error::NotRegistered)?;
        slot.shared.handlers.lock().secondary = None;
        Ok(())
    }

    /// Masks or unmasks the physical line without touching the
    /// registration state.
    pub(crate) fn set_enabled(&mut self, irq: u32, enabled: bool) -> Result<()> {
        let chip = self.chip.clone();
        let slot = self.slot_mut(irq).ok_or(Error::NotRegistered)?;
        if enabled {
            chip.unmask(irq);
        } else {
            chip.mask(irq);
        }
        slot.enabled = enabled;
        Ok(())
    }

    pub(crate) fn shared(&self, irq: u32) -> Result<Arc<SlotShared>> {
        self.slot(irq)
            .map(|slot| slot.shared.clone())
            .ok_or(Error::NotRegistered)
    }

    #[cfg(test)]
    pub(crate) fn refs(&self, irq: u32) -> Option<usize> {
        self.slot(irq).map(|slot| slot.refs)
    }

    /// Forcibly releases every slot whose line falls in `range`,
    /// regardless of reference counts. Used when an MSI reconfiguration
    /// retires the old vector range.
    pub(crate) fn release_range(&mut self, range: Range<u32>) {
        for entry in self.slots.iter_mut() {
            let Some(slot) = entry else {
                continue;
            };
            if range.contains(&slot.irq_num) {
                self.chip.remove(slot.irq_num);
                self.ids.free(slot.slot_id);
                *entry = None;
            }
        }
    }

    /// Quiesces and releases every slot, for the device teardown path.
    pub(crate) fn release_all(&mut self) {
        for entry in self.slots.iter_mut() {
            if let Some(slot) = entry.take() {
                if slot.enabled {
                    self.chip.mask(slot.irq_num);
                }
                log::debug!("irq {}: released at teardown, mode {:?}", slot.irq_num, slot.mode);
                self.chip.remove(slot.irq_num);
                self.ids.free(slot.slot_id);
            }
        }
    }
}

// SPDX-License-Identifier: MPL-2.0

//! The MSI/MSI-X capability toggle.
//!
//! Reconfiguration is a `Disabled → Enabled(count)` state transition that
//! retires every interrupt slot bound to the old vector range before the
//! new range comes up. The owning device runs these methods under its
//! instance lock, so no interrupt can be dispatched mid-transition.

use crate::{hal::MsiConfig, irq::IrqMux, prelude::*};

/// The active MSI vector assignment of a device.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MsiInfo {
    /// The first vector of the active range, 0 when disabled.
    pub base: u32,
    /// The number of vectors in the active range, 0 when disabled.
    pub count: u32,
}

#[derive(Clone, Copy, Debug)]
enum MsiState {
    Disabled,
    Enabled { base: u32, count: u32 },
}

/// The per-device MSI control state.
#[derive(Debug)]
pub(crate) struct MsiController {
    state: MsiState,
}

impl MsiController {
    pub(crate) fn new() -> Self {
        Self {
            state: MsiState::Disabled,
        }
    }

    /// Switches the device to `count` MSI vectors, or back to legacy
    /// line interrupts when `count` is zero.
    ///
    /// Requesting the count that is already active is a no-op returning
    /// the unchanged assignment. Any other transition first force-releases
    /// the slots of the old vector range and disables the capability. If
    /// the device refuses a multi-vector count, a single vector is tried
    /// once before the refusal is surfaced.
    pub(crate) fn set_vector_count(
        &mut self,
        cfg: &dyn MsiConfig,
        mux: &mut IrqMux,
        count: u32,
    ) -> Result<MsiInfo> {
        match self.state {
            MsiState::Enabled { base, count: cur } if cur == count => {
                return Ok(MsiInfo { base, count: cur });
            }
            MsiState::Disabled if count == 0 => {
                return Ok(MsiInfo { base: 0, count: 0 });
            }
            MsiState::Enabled { base, count: cur } => {
                log::debug!("msi: retiring vectors [{}, {})", base, base + cur);
                mux.release_range(base..base + cur);
                cfg.disable();
                self.state = MsiState::Disabled;
            }
            MsiState::Disabled => {}
        }

        if count == 0 {
            return Ok(MsiInfo { base: 0, count: 0 });
        }

        let (base, granted) = match cfg.enable(count) {
            Ok(base) => (base, count),
            Err(Error::Unsupported) if count > 1 => (cfg.enable(1)?, 1),
            Err(e) => return Err(e),
        };
        self.state = MsiState::Enabled {
            base,
            count: granted,
        };
        log::debug!("msi: enabled vectors [{}, {})", base, base + granted);
        Ok(MsiInfo {
            base,
            count: granted,
        })
    }

    /// The current vector assignment.
    pub(crate) fn info(&self) -> MsiInfo {
        match self.state {
            MsiState::Disabled => MsiInfo { base: 0, count: 0 },
            MsiState::Enabled { base, count } => MsiInfo { base, count },
        }
    }
}
